//! In-memory stores
//!
//! Used by the `memory` storage backend and by tests. Locks are partitioned
//! per tenant: the outer map lock is only held long enough to find or insert
//! a tenant's slot, so two tenants never wait on each other's operations.

mod calls;
mod ledger;
mod settlement;
mod tenants;

pub use calls::MemoryCallStore;
pub use ledger::MemoryBalanceLedger;
pub use settlement::MemoryCallSettlement;
pub use tenants::MemoryTenantDirectory;
