use std::fmt;
use std::str::FromStr;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use time::OffsetDateTime;
use crate::helpers::validation::{ValidationErrors, NON_FIELD_ERRORS};
use crate::models::listing::Listing;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(anyhow!("Unknown request status: {}", other)),
        }
    }
}

/// A requester's bid to ship goods on a listing.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TransportRequest {
    pub id: i64,
    pub user_id: i64,
    pub listing_id: i64,
    pub status: RequestStatus,
    pub weight: Option<f64>,
    pub volume: Option<f64>,
    pub total_price: Option<f64>,
    pub payment_link: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub accepted_at: Option<OffsetDateTime>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TransportRequestPayload {
    pub listing_id: i64,
    pub weight: Option<f64>,
    pub volume: Option<f64>,
}

impl TransportRequestPayload {
    /// Checks the bid against the listing it targets.
    pub fn validate(&self, listing: &Listing, requester_id: i64) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if listing.creator_id == requester_id {
            errors.add(NON_FIELD_ERRORS, "You cannot request transport on your own listing.");
        }
        if listing.is_completed {
            errors.add("listing_id", "This listing is already completed.");
        }
        if let Some(weight) = self.weight {
            if weight <= 0.0 {
                errors.add("weight", "Weight must be a positive number.");
            } else if weight > listing.max_weight {
                errors.add("weight", format!("Weight exceeds the listing capacity of {}.", listing.max_weight));
            }
        }
        if let Some(volume) = self.volume {
            if volume <= 0.0 {
                errors.add("volume", "Volume must be a positive number.");
            } else if volume > f64::from(listing.max_volume) {
                errors.add("volume", format!("Volume exceeds the listing capacity of {}.", listing.max_volume));
            }
        }
        errors.into_result()
    }
}

#[derive(Clone, Debug)]
pub struct NewTransportRequest {
    pub user_id: i64,
    pub listing_id: i64,
    pub weight: Option<f64>,
    pub volume: Option<f64>,
    pub total_price: Option<f64>,
}

/// Contact details of the requester, enough to address a notification.
#[derive(Clone, Debug, PartialEq)]
pub struct Requester {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// A pending request joined with the listing it targets and its requester.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingRequest {
    pub request: TransportRequest,
    pub listing: Listing,
    pub requester: Requester,
}

/// An accepted request as shown on the staff payments screen.
#[skip_serializing_none]
#[derive(Serialize, Clone, Debug)]
pub struct PaymentRecord {
    pub request_id: i64,
    pub listing_id: i64,
    pub requester_username: String,
    pub requester_email: String,
    pub total_price: Option<f64>,
    pub payment_link: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub accepted_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_column_text() {
        for status in [RequestStatus::Pending, RequestStatus::Accepted, RequestStatus::Rejected] {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("approved".parse::<RequestStatus>().is_err());
    }

    fn listing() -> Listing {
        Listing {
            id: 5,
            creator_id: 1,
            origin: "Tunis".to_string(),
            destination: "Rome".to_string(),
            max_weight: 10.0,
            max_volume: 2,
            departure_at: time::macros::datetime!(2030-05-01 08:00 UTC),
            arrival_at: time::macros::datetime!(2030-05-01 10:00 UTC),
            is_completed: false,
            created_at: time::macros::datetime!(2030-01-01 00:00 UTC),
            updated_at: time::macros::datetime!(2030-01-01 00:00 UTC),
        }
    }

    #[test]
    fn request_within_capacity_is_valid() {
        let payload = TransportRequestPayload { listing_id: 5, weight: Some(4.0), volume: Some(1.5) };
        assert!(payload.validate(&listing(), 2).is_ok());
    }

    #[test]
    fn request_is_checked_against_listing() {
        let payload = TransportRequestPayload { listing_id: 5, weight: Some(12.0), volume: Some(-1.0) };
        let errors = payload.validate(&listing(), 1).unwrap_err();

        assert_eq!(errors.messages(NON_FIELD_ERRORS).len(), 1);
        assert_eq!(errors.messages("weight").len(), 1);
        assert_eq!(errors.messages("volume"), ["Volume must be a positive number."]);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RequestStatus::Accepted).unwrap(), "\"accepted\"");
    }
}
