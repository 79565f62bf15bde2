use async_trait::async_trait;
use callbill_core::{models::SettleOutcome, traits::CallSettlement, AppError, AppResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::{MemoryBalanceLedger, MemoryCallStore};

/// Settles calls across the in-memory call store and ledger
///
/// Holds the tenant's call partition and then the tenant's balance slot while
/// it ends the call and debits, so nobody observes one change without the
/// other.
pub struct MemoryCallSettlement {
    calls: Arc<MemoryCallStore>,
    ledger: Arc<MemoryBalanceLedger>,
}

impl MemoryCallSettlement {
    pub fn new(calls: Arc<MemoryCallStore>, ledger: Arc<MemoryBalanceLedger>) -> Self {
        Self { calls, ledger }
    }
}

#[async_trait]
impl CallSettlement for MemoryCallSettlement {
    #[instrument(skip(self))]
    async fn settle(
        &self,
        tenant_id: i32,
        call_id: i64,
        ended_at: DateTime<Utc>,
        billed_seconds: i64,
        cost_cents: i64,
    ) -> AppResult<SettleOutcome> {
        let partition = self
            .calls
            .partition(tenant_id)
            .ok_or(AppError::CallNotFound { tenant_id, call_id })?;
        let mut calls = partition.lock();
        let call = calls
            .get_mut(&call_id)
            .ok_or(AppError::CallNotFound { tenant_id, call_id })?;

        if call.is_ended() {
            return Ok(SettleOutcome::AlreadyEnded(call.clone()));
        }

        // Resolve the balance before touching the call so a missing row leaves it open
        let slot = self.ledger.slot(tenant_id)?;
        let mut balance = slot.lock();

        call.end(ended_at, billed_seconds, cost_cents);
        let new_balance_cents = balance.apply_debit(cost_cents, Utc::now());
        debug!(
            "Settled call {} for tenant {}, balance now {} cents",
            call_id, tenant_id, new_balance_cents
        );

        Ok(SettleOutcome::Settled {
            call: call.clone(),
            new_balance_cents,
        })
    }
}
