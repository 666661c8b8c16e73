use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A user's application to become a traveler.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TravelerAccountRequest {
    pub id: i64,
    pub user_id: i64,
    pub passport_number: Option<String>,
    pub address: Option<String>,
    pub is_approved: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct TravelerAccountPayload {
    pub passport_number: Option<String>,
    pub address: Option<String>,
}
