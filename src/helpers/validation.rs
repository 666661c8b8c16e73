use std::collections::BTreeMap;
use serde::Serialize;

pub const NON_FIELD_ERRORS: &str = "non_field_errors";
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Field-level validation messages, serialized as `{"field": ["message", ..]}`.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

pub fn validate_new_password(
    errors: &mut ValidationErrors,
    field: &str,
    password: &str,
    confirmation: &str,
) {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.add(field, format!("Ensure this field has at least {} characters.", MIN_PASSWORD_LENGTH));
    }
    if password != confirmation {
        errors.add(field, "Password fields didn't match.");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.add(field, "Password must contain at least one digit.");
    }
    if !password.chars().any(char::is_alphabetic) {
        errors.add(field, "Password must contain at least one letter.");
    }
}

/// Digits only, with one optional leading `+`.
pub fn validate_phone_number(errors: &mut ValidationErrors, phone_number: &str) {
    let digits = phone_number.strip_prefix('+').unwrap_or(phone_number);
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        errors.add("phone_number", "Phone number must contain only digits.");
    }
    let len = digits.chars().count();
    if !(9..=15).contains(&len) {
        errors.add("phone_number", "Phone number must be between 9 and 15 digits.");
    }
}

pub fn validate_passport_number(errors: &mut ValidationErrors, passport_number: &str) {
    if passport_number.is_empty() || !passport_number.chars().all(|c| c.is_ascii_alphanumeric()) {
        errors.add("passport_number", "Passport number must contain only alphanumeric characters.");
    }
}

pub fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_rules_are_reported_per_field() {
        let mut errors = ValidationErrors::new();
        validate_new_password(&mut errors, "password", "short", "shorter");

        let messages = errors.messages("password");
        assert!(messages.iter().any(|m| m.contains("at least 8")));
        assert!(messages.iter().any(|m| m == "Password fields didn't match."));
        assert!(messages.iter().any(|m| m.contains("one digit")));
        assert!(!messages.iter().any(|m| m.contains("one letter")));
    }

    #[test]
    fn valid_password_passes() {
        let mut errors = ValidationErrors::new();
        validate_new_password(&mut errors, "password", "cargo2024", "cargo2024");
        assert!(errors.into_result().is_ok());
    }

    #[test]
    fn phone_numbers_need_nine_to_fifteen_digits() {
        let mut errors = ValidationErrors::new();
        validate_phone_number(&mut errors, "213555123");
        assert!(errors.is_empty());

        validate_phone_number(&mut errors, "+213555123456");
        assert!(errors.is_empty());

        validate_phone_number(&mut errors, "++2135");
        assert_eq!(errors.messages("phone_number").len(), 2);
    }

    #[test]
    fn serializes_as_field_map() {
        let errors = ValidationErrors::single("email", "Email is already in use.");
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            serde_json::json!({ "email": ["Email is already in use."] })
        );
    }

    #[test]
    fn email_shape_check() {
        assert!(looks_like_email("ana@cargo.dz"));
        assert!(!looks_like_email("ana.cargo.dz"));
        assert!(!looks_like_email("@cargo.dz"));
    }
}
