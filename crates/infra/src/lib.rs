pub mod config;
pub mod logging;
pub mod realtime;
pub mod repositories;
pub mod storefront;
