//! Collaborator traits
//!
//! The session engine talks to its collaborators only through these traits:
//! a tenant directory, a balance ledger, a call store, a settlement that ends
//! and charges a call atomically, and an event notifier.
//! `callbill-db` provides PostgreSQL and in-memory implementations.

use crate::error::AppError;
use crate::models::{
    AdminEventType, Balance, Call, CallStats, EndOutcome, SettleOutcome, Tenant, TenantEventType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Tenant lookup (tenants are provisioned elsewhere)
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Find tenant by ID, `TenantNotFound` when absent
    async fn get_tenant(&self, tenant_id: i32) -> Result<Tenant, AppError>;
}

/// Holds each tenant's prepaid balance
///
/// Implementations must serialize `debit` and `can_admit_call` per tenant and
/// must never make two tenants contend on the same lock.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Read current balance, `BalanceNotFound` when the tenant has no row
    async fn get(&self, tenant_id: i32) -> Result<Balance, AppError>;

    /// True iff a balance row exists and is not negative
    async fn can_admit_call(&self, tenant_id: i32) -> Result<bool, AppError>;

    /// Atomically subtract `cost_cents`, returning the new balance
    async fn debit(&self, tenant_id: i32, cost_cents: i64) -> Result<i64, AppError>;
}

/// Holds call records keyed by `(tenant_id, call_id)`
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Create a call in state `started` with a freshly allocated id
    async fn create(
        &self,
        tenant_id: i32,
        bot_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Call, AppError>;

    /// Tenant-scoped lookup, `CallNotFound` when absent
    async fn get(&self, tenant_id: i32, call_id: i64) -> Result<Call, AppError>;

    /// Compare-and-transition `started -> ended`
    ///
    /// Exactly one concurrent caller observes [`EndOutcome::Ended`]; every
    /// other caller gets [`EndOutcome::AlreadyEnded`] with the stored record.
    async fn end(
        &self,
        tenant_id: i32,
        call_id: i64,
        ended_at: DateTime<Utc>,
        billed_seconds: i64,
        cost_cents: i64,
    ) -> Result<EndOutcome, AppError>;

    /// Most recent calls first, capped at `limit`
    async fn list(&self, tenant_id: i32, limit: i64) -> Result<Vec<Call>, AppError>;

    /// Calls still in state `started`, most recent first
    async fn list_active(&self, tenant_id: i32) -> Result<Vec<Call>, AppError>;

    /// Aggregate count and billed seconds across all of a tenant's calls
    async fn stats(&self, tenant_id: i32) -> Result<CallStats, AppError>;
}

/// Ends a call and debits its cost as one unit of work
///
/// Either the call moves to `ended` and the tenant's balance is debited, or
/// neither happens and the call stays `started`. Only one concurrent caller
/// observes [`SettleOutcome::Settled`] for a given call.
#[async_trait]
pub trait CallSettlement: Send + Sync {
    /// `CallNotFound` when no call matches, `BalanceNotFound` when the
    /// tenant has no balance row; the call is left untouched in both cases
    async fn settle(
        &self,
        tenant_id: i32,
        call_id: i64,
        ended_at: DateTime<Utc>,
        billed_seconds: i64,
        cost_cents: i64,
    ) -> Result<SettleOutcome, AppError>;
}

/// Fan-out sink for engine events
///
/// Delivery is best-effort and at-most-once. Implementations log their own
/// failures; publishing never fails the request that triggered it.
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn publish_tenant_event(
        &self,
        tenant_id: i32,
        event_type: TenantEventType,
        payload: serde_json::Value,
    );

    async fn publish_admin_event(&self, event_type: AdminEventType, payload: serde_json::Value);
}
