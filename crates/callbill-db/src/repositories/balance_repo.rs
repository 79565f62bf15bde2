//! Balance repository implementation
//!
//! Debits are a single `UPDATE ... RETURNING` statement, so PostgreSQL's row
//! lock serializes concurrent debits on the same tenant while leaving other
//! tenants' rows untouched.

use async_trait::async_trait;
use callbill_core::{models::Balance, traits::BalanceLedger, AppError, AppResult};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgExecutor, PgPool};
use tracing::{debug, error, instrument, warn};

/// PostgreSQL implementation of BalanceLedger
pub struct PgBalanceLedger {
    pool: PgPool,
}

impl PgBalanceLedger {
    /// Create a new balance ledger
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceLedger for PgBalanceLedger {
    #[instrument(skip(self))]
    async fn get(&self, tenant_id: i32) -> AppResult<Balance> {
        debug!("Reading balance for tenant {}", tenant_id);

        let row = sqlx::query_as::<sqlx::Postgres, BalanceRow>(
            r#"
            SELECT tenant_id, current_cents, updated_at
            FROM balances
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Database error reading balance for tenant {}: {}",
                tenant_id, e
            );
            AppError::Database(format!("Failed to read balance: {}", e))
        })?;

        row.map(Into::into)
            .ok_or(AppError::BalanceNotFound(tenant_id))
    }

    #[instrument(skip(self))]
    async fn can_admit_call(&self, tenant_id: i32) -> AppResult<bool> {
        match self.get(tenant_id).await {
            Ok(balance) => Ok(balance.admits_new_call()),
            Err(AppError::BalanceNotFound(_)) => {
                warn!(
                    "Tenant {} has no balance row, refusing admission",
                    tenant_id
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn debit(&self, tenant_id: i32, cost_cents: i64) -> AppResult<i64> {
        debug!("Debiting {} cents from tenant {}", cost_cents, tenant_id);
        debit_balance(&self.pool, tenant_id, cost_cents).await
    }
}

/// Subtract `cost_cents` in one statement through a pool or an open transaction
///
/// The row lock taken by the update is what serializes debits on one tenant.
pub(crate) async fn debit_balance<'e, E>(
    executor: E,
    tenant_id: i32,
    cost_cents: i64,
) -> AppResult<i64>
where
    E: PgExecutor<'e>,
{
    let result: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE balances
        SET current_cents = current_cents - $2,
            updated_at = NOW()
        WHERE tenant_id = $1
        RETURNING current_cents
        "#,
    )
    .bind(tenant_id)
    .bind(cost_cents)
    .fetch_optional(executor)
    .await
    .map_err(|e| {
        error!("Database error debiting tenant {}: {}", tenant_id, e);
        AppError::Database(format!("Failed to debit balance: {}", e))
    })?;

    result
        .map(|(current_cents,)| current_cents)
        .ok_or(AppError::BalanceNotFound(tenant_id))
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct BalanceRow {
    tenant_id: i32,
    current_cents: i64,
    updated_at: DateTime<Utc>,
}

impl From<BalanceRow> for Balance {
    fn from(row: BalanceRow) -> Self {
        Self {
            tenant_id: row.tenant_id,
            current_cents: row.current_cents,
            updated_at: row.updated_at,
        }
    }
}
