use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use crate::helpers::validation::{ValidationErrors, NON_FIELD_ERRORS};
use crate::models::price_tier::{NewPriceTier, PriceTier};
use crate::models::tag::Tag;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Listing {
    pub id: i64,
    pub creator_id: i64,
    pub origin: String,
    pub destination: String,
    pub max_weight: f64,
    pub max_volume: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub departure_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub arrival_at: OffsetDateTime,
    pub is_completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Listing {
    pub fn route(&self) -> String {
        format!("{} -> {}", self.origin, self.destination)
    }
}

/// Scalar rules shared by creation and update.
pub fn validate_listing_fields(
    errors: &mut ValidationErrors,
    origin: &str,
    destination: &str,
    max_weight: f64,
    max_volume: i32,
    departure_at: OffsetDateTime,
    arrival_at: OffsetDateTime,
) {
    if origin.trim().is_empty() {
        errors.add("origin", "This field may not be blank.");
    }
    if destination.trim().is_empty() {
        errors.add("destination", "This field may not be blank.");
    }
    if max_weight < 0.1 {
        errors.add("max_weight", "Ensure this value is greater than or equal to 0.1.");
    }
    if max_volume < 1 {
        errors.add("max_volume", "Ensure this value is greater than or equal to 1.");
    }
    if departure_at >= arrival_at {
        errors.add(NON_FIELD_ERRORS, "Departure date and time must be before arrival date and time.");
    }
}

fn validate_tiers(errors: &mut ValidationErrors, tiers: &[NewPriceTier]) {
    for tier in tiers {
        tier.validate_into(errors, Some("price_tiers"));
    }
}

/// Listing with its tags and price tiers resolved.
#[derive(Serialize, Clone, Debug)]
pub struct ListingDetail {
    #[serde(flatten)]
    pub listing: Listing,
    pub tags: Vec<Tag>,
    pub price_tiers: Vec<PriceTier>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ListingPayload {
    pub origin: String,
    pub destination: String,
    pub max_weight: f64,
    pub max_volume: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub departure_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub arrival_at: OffsetDateTime,
    #[serde(default)]
    pub tags: Vec<i64>,
    #[serde(default)]
    pub price_tiers: Vec<NewPriceTier>,
}

impl ListingPayload {
    pub fn validate(&self, now: OffsetDateTime) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.departure_at < now {
            errors.add("departure_at", "Departure date and time must be in the future.");
        }
        validate_listing_fields(
            &mut errors,
            &self.origin,
            &self.destination,
            self.max_weight,
            self.max_volume,
            self.departure_at,
            self.arrival_at,
        );
        validate_tiers(&mut errors, &self.price_tiers);
        errors.into_result()
    }
}

/// Update body; tags and tiers are replaced only when present and non-empty.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ListingUpdate {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub max_weight: Option<f64>,
    pub max_volume: Option<i32>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub departure_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub arrival_at: Option<OffsetDateTime>,
    pub is_completed: Option<bool>,
    pub tags: Option<Vec<i64>>,
    pub price_tiers: Option<Vec<NewPriceTier>>,
}

impl ListingUpdate {
    /// Applies the update onto `listing` and validates the merged result.
    pub fn apply(&self, listing: &Listing, now: OffsetDateTime) -> Result<Listing, ValidationErrors> {
        let mut merged = listing.clone();
        if let Some(origin) = &self.origin {
            merged.origin = origin.clone();
        }
        if let Some(destination) = &self.destination {
            merged.destination = destination.clone();
        }
        if let Some(max_weight) = self.max_weight {
            merged.max_weight = max_weight;
        }
        if let Some(max_volume) = self.max_volume {
            merged.max_volume = max_volume;
        }
        if let Some(departure_at) = self.departure_at {
            merged.departure_at = departure_at;
        }
        if let Some(arrival_at) = self.arrival_at {
            merged.arrival_at = arrival_at;
        }
        if let Some(is_completed) = self.is_completed {
            merged.is_completed = is_completed;
        }

        let mut errors = ValidationErrors::new();
        if self.departure_at.is_some() && merged.departure_at < now {
            errors.add("departure_at", "Departure date and time must be in the future.");
        }
        validate_listing_fields(
            &mut errors,
            &merged.origin,
            &merged.destination,
            merged.max_weight,
            merged.max_volume,
            merged.departure_at,
            merged.arrival_at,
        );
        if let Some(tiers) = &self.price_tiers {
            validate_tiers(&mut errors, tiers);
        }
        errors.into_result().map(|_| merged)
    }

    pub fn replacement_tags(&self) -> Option<&[i64]> {
        self.tags.as_deref().filter(|tags| !tags.is_empty())
    }

    pub fn replacement_price_tiers(&self) -> Option<&[NewPriceTier]> {
        self.price_tiers.as_deref().filter(|tiers| !tiers.is_empty())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ListingTag {
    pub id: i64,
    pub listing_id: i64,
    pub tag: Tag,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ListingPriceTier {
    pub id: i64,
    pub listing_id: i64,
    pub price_tier: PriceTier,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn now() -> OffsetDateTime {
        datetime!(2030-01-01 00:00 UTC)
    }

    fn payload() -> ListingPayload {
        ListingPayload {
            origin: "Algiers".to_string(),
            destination: "Marseille".to_string(),
            max_weight: 23.0,
            max_volume: 2,
            departure_at: datetime!(2030-03-01 08:00 UTC),
            arrival_at: datetime!(2030-03-01 10:30 UTC),
            tags: vec![1, 2],
            price_tiers: vec![NewPriceTier { min_weight: Some(0.0), max_weight: Some(5.0), price: Some(15.0) }],
        }
    }

    fn listing() -> Listing {
        let p = payload();
        Listing {
            id: 3,
            creator_id: 1,
            origin: p.origin,
            destination: p.destination,
            max_weight: p.max_weight,
            max_volume: p.max_volume,
            departure_at: p.departure_at,
            arrival_at: p.arrival_at,
            is_completed: false,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn valid_payload_passes() {
        assert!(payload().validate(now()).is_ok());
    }

    #[test]
    fn departure_must_precede_arrival_and_be_in_future() {
        let mut p = payload();
        p.departure_at = datetime!(2029-12-31 00:00 UTC);
        p.arrival_at = datetime!(2029-12-30 00:00 UTC);

        let errors = p.validate(now()).unwrap_err();
        assert_eq!(errors.messages("departure_at").len(), 1);
        assert_eq!(
            errors.messages(NON_FIELD_ERRORS),
            ["Departure date and time must be before arrival date and time."]
        );
    }

    #[test]
    fn capacity_and_tier_bounds_are_checked() {
        let mut p = payload();
        p.max_weight = 0.0;
        p.max_volume = 0;
        p.price_tiers = vec![NewPriceTier { min_weight: Some(5.0), max_weight: Some(1.0), price: Some(3.0) }];

        let errors = p.validate(now()).unwrap_err();
        assert!(!errors.messages("max_weight").is_empty());
        assert!(!errors.messages("max_volume").is_empty());
        assert!(!errors.messages("price_tiers").is_empty());
    }

    #[test]
    fn update_merges_and_revalidates() {
        let update = ListingUpdate {
            arrival_at: Some(datetime!(2030-03-01 07:00 UTC)),
            ..ListingUpdate::default()
        };
        assert!(update.apply(&listing(), now()).is_err());

        let update = ListingUpdate {
            destination: Some("Lyon".to_string()),
            is_completed: Some(true),
            tags: Some(vec![]),
            ..ListingUpdate::default()
        };
        let merged = update.apply(&listing(), now()).unwrap();
        assert_eq!(merged.destination, "Lyon");
        assert!(merged.is_completed);
        assert!(update.replacement_tags().is_none());
    }
}
