pub mod auth;
pub mod error;
pub mod identity;
pub mod ports;
pub mod realtime;
pub mod storefront;
pub mod support;
pub mod util;
pub mod views;

pub type DomainResult<T> = Result<T, error::DomainError>;
