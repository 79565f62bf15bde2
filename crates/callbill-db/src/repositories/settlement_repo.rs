//! Call settlement implementation
//!
//! Ending a call and debiting its cost run in one transaction. The call row
//! is locked by the conditional update, so a concurrent settlement of the
//! same call waits and then finds it already ended.

use async_trait::async_trait;
use callbill_core::{models::SettleOutcome, traits::CallSettlement, AppError, AppResult};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};

use super::balance_repo::debit_balance;
use super::call_repo::{end_started_call, fetch_call};

/// PostgreSQL implementation of CallSettlement
pub struct PgCallSettlement {
    pool: PgPool,
}

impl PgCallSettlement {
    /// Create a new settlement over the shared pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallSettlement for PgCallSettlement {
    #[instrument(skip(self))]
    async fn settle(
        &self,
        tenant_id: i32,
        call_id: i64,
        ended_at: DateTime<Utc>,
        billed_seconds: i64,
        cost_cents: i64,
    ) -> AppResult<SettleOutcome> {
        // Start transaction
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        let ended = end_started_call(
            &mut *tx,
            tenant_id,
            call_id,
            ended_at,
            billed_seconds,
            cost_cents,
        )
        .await?;

        let call = match ended {
            Some(call) => call,
            None => {
                // Nothing changed; dropping the transaction rolls it back
                let existing = fetch_call(&mut *tx, tenant_id, call_id).await?;
                info!("Call {} was already ended, nothing to settle", call_id);
                return Ok(SettleOutcome::AlreadyEnded(existing));
            }
        };

        let new_balance_cents = match debit_balance(&mut *tx, tenant_id, cost_cents).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!("Rolling back end of call {}: {}", call_id, e);
                return Err(e);
            }
        };

        // Commit transaction
        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        info!(
            "Settled call {} for tenant {}: {} cents, balance {} cents",
            call_id, tenant_id, cost_cents, new_balance_cents
        );

        Ok(SettleOutcome::Settled {
            call,
            new_balance_cents,
        })
    }
}
