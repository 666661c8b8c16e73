use serde::{Deserialize, Serialize};
use crate::helpers::validation::{ValidationErrors, NON_FIELD_ERRORS};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PriceTier {
    pub id: i64,
    pub min_weight: Option<f64>,
    pub max_weight: Option<f64>,
    pub price: Option<f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NewPriceTier {
    pub min_weight: Option<f64>,
    pub max_weight: Option<f64>,
    pub price: Option<f64>,
}

impl PriceTier {
    pub fn contains(&self, weight: f64) -> bool {
        let lower = self.min_weight.unwrap_or(0.0);
        let upper = self.max_weight.unwrap_or(f64::INFINITY);
        lower <= weight && weight <= upper
    }
}

impl NewPriceTier {
    /// Adds messages under `field`, or the non-field key when `field` is None.
    pub fn validate_into(&self, errors: &mut ValidationErrors, field: Option<&str>) {
        let key = field.unwrap_or(NON_FIELD_ERRORS);
        if matches!(self.min_weight, Some(min) if min < 0.0) {
            errors.add(field.unwrap_or("min_weight"), "Minimum weight must be at least 0.");
        }
        if matches!(self.max_weight, Some(max) if max < 0.1) {
            errors.add(field.unwrap_or("max_weight"), "Maximum weight must be at least 0.1.");
        }
        if matches!(self.price, Some(price) if price < 0.0) {
            errors.add(field.unwrap_or("price"), "Price must be at least 0.");
        }
        if let (Some(min), Some(max)) = (self.min_weight, self.max_weight) {
            if min >= max {
                errors.add(key, "Minimum weight must be less than maximum weight.");
            }
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        self.validate_into(&mut errors, None);
        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_and_negative_bounds() {
        let tier = NewPriceTier { min_weight: Some(10.0), max_weight: Some(5.0), price: Some(-1.0) };
        let errors = tier.validate().unwrap_err();
        assert_eq!(errors.messages("price"), ["Price must be at least 0."]);
        assert_eq!(errors.messages(NON_FIELD_ERRORS).len(), 1);
    }

    #[test]
    fn open_ended_tier_is_valid_and_unbounded() {
        let tier = NewPriceTier { min_weight: Some(10.0), max_weight: None, price: Some(90.0) };
        assert!(tier.validate().is_ok());

        let stored = PriceTier { id: 1, min_weight: Some(10.0), max_weight: None, price: Some(90.0) };
        assert!(stored.contains(1000.0));
        assert!(!stored.contains(9.9));
    }
}
