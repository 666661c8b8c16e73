pub mod confirmation;
pub mod notification;
pub mod payment;
pub mod pricing;
