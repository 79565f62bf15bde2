use async_trait::async_trait;
use callbill_core::{models::Balance, traits::BalanceLedger, AppError, AppResult};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

pub(super) type BalanceSlot = Arc<Mutex<Balance>>;

/// Balance ledger with one mutex per tenant
#[derive(Default)]
pub struct MemoryBalanceLedger {
    balances: RwLock<HashMap<i32, BalanceSlot>>,
}

impl MemoryBalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) a tenant's balance row
    pub fn open(&self, tenant_id: i32, current_cents: i64) {
        let slot = Arc::new(Mutex::new(Balance::new(tenant_id, current_cents)));
        self.balances.write().insert(tenant_id, slot);
    }

    pub(super) fn slot(&self, tenant_id: i32) -> AppResult<BalanceSlot> {
        self.balances
            .read()
            .get(&tenant_id)
            .cloned()
            .ok_or(AppError::BalanceNotFound(tenant_id))
    }
}

#[async_trait]
impl BalanceLedger for MemoryBalanceLedger {
    async fn get(&self, tenant_id: i32) -> AppResult<Balance> {
        let slot = self.slot(tenant_id)?;
        let balance = slot.lock().clone();
        Ok(balance)
    }

    async fn can_admit_call(&self, tenant_id: i32) -> AppResult<bool> {
        match self.slot(tenant_id) {
            Ok(slot) => Ok(slot.lock().admits_new_call()),
            Err(AppError::BalanceNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn debit(&self, tenant_id: i32, cost_cents: i64) -> AppResult<i64> {
        let slot = self.slot(tenant_id)?;
        let new_balance = slot.lock().apply_debit(cost_cents, Utc::now());
        debug!("Tenant {} balance is now {} cents", tenant_id, new_balance);
        Ok(new_balance)
    }
}
