//! HTTP request handlers

pub mod health;
pub mod tenant;
pub mod ws;

pub use health::configure as configure_health;
pub use tenant::configure as configure_tenants;
pub use ws::configure as configure_ws;
