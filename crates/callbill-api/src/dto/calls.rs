//! Call listing DTOs

use serde::Deserialize;
use validator::Validate;

/// Query parameters for `GET /tenants/{tenant_id}/calls`
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ListCallsParams {
    /// Maximum number of calls to return, most recent first
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<i64>,
}
