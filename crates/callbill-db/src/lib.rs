//! Callbill Database Layer
//!
//! This crate provides storage for the billing engine's collaborator traits:
//!
//! - Connection pool management and migrations with sqlx
//! - PostgreSQL repositories for tenants, balances and calls
//! - In-memory implementations of the same traits, with per-tenant locking
//!
//! Both flavours give the same guarantees: balance debits are serialized per
//! tenant and a call can be transitioned to `ended` exactly once. Settling a
//! call ends it and debits its cost together, or not at all.

pub mod memory;
pub mod pool;
pub mod repositories;

pub use memory::{
    MemoryBalanceLedger, MemoryCallSettlement, MemoryCallStore, MemoryTenantDirectory,
};
pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use callbill_core::{AppError, AppResult};
pub use sqlx::PgPool;
