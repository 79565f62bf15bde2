//! Domain models for the call billing engine
//!
//! Plain data entities. Each one is owned by exactly one component: calls by
//! the call store, balances by the ledger, tenants by the external directory.

pub mod balance;
pub mod call;
pub mod event;
pub mod tenant;

pub use balance::Balance;
pub use call::{Call, CallStats, CallStatus, EndOutcome, SettleOutcome};
pub use event::{
    AdminEventType, CallEndedPayload, CallStartedPayload, EngineEvent, TenantEventType,
    TenantUpdatePayload,
};
pub use tenant::{BotRef, Tenant};
