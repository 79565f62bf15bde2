//! Tenant repository implementation
//!
//! Read-only access to the `tenants` table.

use async_trait::async_trait;
use callbill_core::{
    models::{BotRef, Tenant},
    traits::TenantDirectory,
    AppError, AppResult,
};
use sqlx::PgPool;
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of TenantDirectory
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    /// Create a new tenant directory
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    #[instrument(skip(self))]
    async fn get_tenant(&self, tenant_id: i32) -> AppResult<Tenant> {
        debug!("Finding tenant by id: {}", tenant_id);

        let row = sqlx::query_as::<sqlx::Postgres, TenantRow>(
            r#"
            SELECT id, name, bot_id, bot_name
            FROM tenants
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding tenant {}: {}", tenant_id, e);
            AppError::Database(format!("Failed to find tenant: {}", e))
        })?;

        row.map(Into::into)
            .ok_or(AppError::TenantNotFound(tenant_id))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: i32,
    name: String,
    bot_id: String,
    bot_name: Option<String>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            bot: BotRef {
                bot_id: row.bot_id,
                display_name: row.bot_name,
            },
        }
    }
}
