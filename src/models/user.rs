use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use time::{Date, OffsetDateTime};

#[derive(Clone, Debug)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<Date>,
    pub passport_number: Option<String>,
    pub is_traveler: bool,
    pub is_staff: bool,
    pub is_active: bool,
    pub balance: f64,
    pub date_joined: OffsetDateTime,
    pub last_login: Option<OffsetDateTime>,
}

impl User {
    /// Public representation, never carries the password hash.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone_number: self.phone_number.clone(),
            address: self.address.clone(),
            date_of_birth: self.date_of_birth,
            passport_number: self.passport_number.clone(),
            is_traveler: self.is_traveler,
            balance: self.balance,
            date_joined: self.date_joined,
            last_login: self.last_login,
        }
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    #[serde(default, with = "super::iso_date::option")]
    pub date_of_birth: Option<Date>,
    pub passport_number: Option<String>,
    pub is_traveler: bool,
    pub balance: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub date_joined: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
}

/// Fields accepted when a new account is created.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
}

/// Partial update of the caller's own profile.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    #[serde(default, with = "super::iso_date::option")]
    pub date_of_birth: Option<Date>,
    pub passport_number: Option<String>,
    pub password: Option<String>,
}
