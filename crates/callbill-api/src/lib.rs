//! API layer for the call billing engine
//!
//! HTTP handlers for starting and ending calls and reading tenant summaries,
//! plus WebSocket streams carrying live engine events.

#![forbid(unsafe_code)]
#![warn(clippy::all, missing_docs)]

pub mod dto;
pub mod handlers;

pub use dto::ListCallsParams;

pub use handlers::{configure_health, configure_tenants, configure_ws};
