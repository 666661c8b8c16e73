pub mod listing;
pub mod price_tier;
pub mod tag;
pub mod transport_request;
pub mod traveler_account;
pub mod user;

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");
