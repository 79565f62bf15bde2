//! Data Transfer Objects (DTOs) for API requests

pub mod calls;

pub use calls::*;
