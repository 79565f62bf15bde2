//! Repository implementations
//!
//! Concrete PostgreSQL implementations of the collaborator traits defined in
//! callbill-core, using sqlx.

pub mod balance_repo;
pub mod call_repo;
pub mod settlement_repo;
pub mod tenant_repo;

pub use balance_repo::PgBalanceLedger;
pub use call_repo::PgCallStore;
pub use settlement_repo::PgCallSettlement;
pub use tenant_repo::PgTenantDirectory;
