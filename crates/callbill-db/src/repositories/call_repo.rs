//! Call repository implementation
//!
//! The `started -> ended` transition is a conditional update on
//! `status = 'started'`; at most one concurrent request can match it.

use async_trait::async_trait;
use callbill_core::{
    models::{Call, CallStats, CallStatus, EndOutcome},
    traits::CallStore,
    AppError, AppResult,
};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgExecutor, PgPool};
use tracing::{debug, error, info, instrument};

const CALL_COLUMNS: &str =
    "id, tenant_id, bot_id, status, started_at, ended_at, billed_seconds, cost_cents";

/// PostgreSQL implementation of CallStore
pub struct PgCallStore {
    pool: PgPool,
}

impl PgCallStore {
    /// Create a new call store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Convert database status string to enum
    fn parse_status(s: &str) -> AppResult<CallStatus> {
        CallStatus::from_str(s).ok_or_else(|| {
            error!("Unknown call status in database: {}", s);
            AppError::Database(format!("Unknown call status: {}", s))
        })
    }
}

#[async_trait]
impl CallStore for PgCallStore {
    #[instrument(skip(self))]
    async fn create(
        &self,
        tenant_id: i32,
        bot_id: &str,
        started_at: DateTime<Utc>,
    ) -> AppResult<Call> {
        debug!("Creating call for tenant {}", tenant_id);

        let row = sqlx::query_as::<sqlx::Postgres, CallRow>(&format!(
            r#"
            INSERT INTO calls (tenant_id, bot_id, status, started_at)
            VALUES ($1, $2, 'started', $3)
            RETURNING {CALL_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(bot_id)
        .bind(started_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Database error creating call for tenant {}: {}",
                tenant_id, e
            );
            AppError::Database(format!("Failed to create call: {}", e))
        })?;

        row.try_into()
    }

    #[instrument(skip(self))]
    async fn get(&self, tenant_id: i32, call_id: i64) -> AppResult<Call> {
        fetch_call(&self.pool, tenant_id, call_id).await
    }

    #[instrument(skip(self))]
    async fn end(
        &self,
        tenant_id: i32,
        call_id: i64,
        ended_at: DateTime<Utc>,
        billed_seconds: i64,
        cost_cents: i64,
    ) -> AppResult<EndOutcome> {
        let ended = end_started_call(
            &self.pool,
            tenant_id,
            call_id,
            ended_at,
            billed_seconds,
            cost_cents,
        )
        .await?;

        match ended {
            Some(call) => Ok(EndOutcome::Ended(call)),
            None => {
                // Either missing for this tenant or someone else ended it first
                let existing = self.get(tenant_id, call_id).await?;
                info!("Call {} was already ended, leaving it unchanged", call_id);
                Ok(EndOutcome::AlreadyEnded(existing))
            }
        }
    }

    #[instrument(skip(self))]
    async fn list(&self, tenant_id: i32, limit: i64) -> AppResult<Vec<Call>> {
        let rows = sqlx::query_as::<sqlx::Postgres, CallRow>(&format!(
            r#"
            SELECT {CALL_COLUMNS}
            FROM calls
            WHERE tenant_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#
        ))
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Database error listing calls for tenant {}: {}",
                tenant_id, e
            );
            AppError::Database(format!("Failed to list calls: {}", e))
        })?;

        rows.into_iter().map(Call::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn list_active(&self, tenant_id: i32) -> AppResult<Vec<Call>> {
        let rows = sqlx::query_as::<sqlx::Postgres, CallRow>(&format!(
            r#"
            SELECT {CALL_COLUMNS}
            FROM calls
            WHERE tenant_id = $1 AND status = 'started'
            ORDER BY id DESC
            "#
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Database error listing active calls for tenant {}: {}",
                tenant_id, e
            );
            AppError::Database(format!("Failed to list active calls: {}", e))
        })?;

        rows.into_iter().map(Call::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn stats(&self, tenant_id: i32) -> AppResult<CallStats> {
        let (total_calls, total_billed_seconds): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(billed_seconds), 0)::BIGINT
            FROM calls
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(
                "Database error aggregating calls for tenant {}: {}",
                tenant_id, e
            );
            AppError::Database(format!("Failed to aggregate calls: {}", e))
        })?;

        Ok(CallStats {
            total_calls,
            total_billed_seconds,
        })
    }
}

/// Read one call through any executor, a pool or an open transaction
pub(crate) async fn fetch_call<'e, E>(executor: E, tenant_id: i32, call_id: i64) -> AppResult<Call>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<sqlx::Postgres, CallRow>(&format!(
        r#"
        SELECT {CALL_COLUMNS}
        FROM calls
        WHERE id = $1 AND tenant_id = $2
        "#
    ))
    .bind(call_id)
    .bind(tenant_id)
    .fetch_optional(executor)
    .await
    .map_err(|e| {
        error!("Database error finding call {}: {}", call_id, e);
        AppError::Database(format!("Failed to find call: {}", e))
    })?;

    row.ok_or(AppError::CallNotFound { tenant_id, call_id })?
        .try_into()
}

/// Conditional `started -> ended` update
///
/// Returns `None` when no started call matched, either because the call does
/// not exist for this tenant or because it has already ended.
pub(crate) async fn end_started_call<'e, E>(
    executor: E,
    tenant_id: i32,
    call_id: i64,
    ended_at: DateTime<Utc>,
    billed_seconds: i64,
    cost_cents: i64,
) -> AppResult<Option<Call>>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<sqlx::Postgres, CallRow>(&format!(
        r#"
        UPDATE calls
        SET status = 'ended',
            ended_at = $3,
            billed_seconds = $4,
            cost_cents = $5
        WHERE id = $1 AND tenant_id = $2 AND status = 'started'
        RETURNING {CALL_COLUMNS}
        "#
    ))
    .bind(call_id)
    .bind(tenant_id)
    .bind(ended_at)
    .bind(billed_seconds)
    .bind(cost_cents)
    .fetch_optional(executor)
    .await
    .map_err(|e| {
        error!("Database error ending call {}: {}", call_id, e);
        AppError::Database(format!("Failed to end call: {}", e))
    })?;

    row.map(Call::try_from).transpose()
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct CallRow {
    id: i64,
    tenant_id: i32,
    bot_id: String,
    status: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    billed_seconds: Option<i64>,
    cost_cents: Option<i64>,
}

impl TryFrom<CallRow> for Call {
    type Error = AppError;

    fn try_from(row: CallRow) -> AppResult<Self> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            bot_id: row.bot_id,
            status: PgCallStore::parse_status(&row.status)?,
            started_at: row.started_at,
            ended_at: row.ended_at,
            billed_seconds: row.billed_seconds,
            cost_cents: row.cost_cents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, run_migrations};

    #[test]
    fn test_parse_status() {
        assert_eq!(PgCallStore::parse_status("ended").unwrap(), CallStatus::Ended);
        assert_eq!(
            PgCallStore::parse_status("started").unwrap(),
            CallStatus::Started
        );
        assert!(matches!(
            PgCallStore::parse_status("garbage"),
            Err(AppError::Database(_))
        ));
    }

    #[test]
    fn test_unknown_status_row_is_rejected() {
        let row = CallRow {
            id: 7,
            tenant_id: 1,
            bot_id: "bot-a".to_string(),
            status: "ringing".to_string(),
            started_at: Utc::now(),
            ended_at: None,
            billed_seconds: None,
            cost_cents: None,
        };
        assert!(matches!(Call::try_from(row), Err(AppError::Database(_))));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_end_is_compare_and_transition() {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/callbill".to_string());
        let pool = create_pool(&database_url, Some(5)).await.unwrap();
        run_migrations(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO tenants (id, name, bot_id) VALUES (9001, 'it', 'bot-it')
             ON CONFLICT (id) DO NOTHING",
        )
        .execute(&pool)
        .await
        .unwrap();

        let store = PgCallStore::new(pool);
        let started_at = Utc::now();
        let call = store.create(9001, "bot-it", started_at).await.unwrap();

        let first = store.end(9001, call.id, started_at, 5, 40).await.unwrap();
        assert!(first.transitioned());

        let second = store.end(9001, call.id, started_at, 99, 400).await.unwrap();
        assert!(!second.transitioned());
        assert_eq!(second.call().cost_cents, Some(40));

        let wrong_tenant = store.end(9002, call.id, started_at, 5, 40).await;
        assert!(matches!(wrong_tenant, Err(AppError::CallNotFound { .. })));
    }
}
