pub mod api_error;
pub mod auth;
pub mod handler_404;
pub mod validation;
