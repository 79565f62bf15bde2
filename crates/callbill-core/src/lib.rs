//! Callbill Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the call billing engine. It includes:
//!
//! - Domain models (Tenant, Balance, Call, engine events)
//! - Collaborator traits for the tenant directory, ledger, call store and notifier
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::{AppError, ErrorKind};

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
