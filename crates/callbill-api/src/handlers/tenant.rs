//! Tenant call handlers
//!
//! Thin HTTP layer over the session engine. Tenant access is authorized
//! upstream; every route takes the tenant id from the path.

use crate::dto::ListCallsParams;
use actix_web::{web, HttpResponse};
use callbill_core::AppError;
use callbill_services::SessionEngine;
use tracing::{debug, instrument, warn};
use validator::Validate;

/// Usage summary for a tenant
///
/// GET /api/v1/tenants/{tenant_id}/summary
#[instrument(skip(engine))]
pub async fn get_summary(
    engine: web::Data<SessionEngine>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let tenant_id = path.into_inner();
    let summary = engine.summary(tenant_id).await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// Bot assigned to a tenant
///
/// GET /api/v1/tenants/{tenant_id}/bot
#[instrument(skip(engine))]
pub async fn get_bot(
    engine: web::Data<SessionEngine>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let bot = engine.bot(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(bot))
}

/// Recent calls, most recent first
///
/// GET /api/v1/tenants/{tenant_id}/calls?limit=50
#[instrument(skip(engine))]
pub async fn list_calls(
    engine: web::Data<SessionEngine>,
    path: web::Path<i32>,
    query: web::Query<ListCallsParams>,
) -> Result<HttpResponse, AppError> {
    query.validate().map_err(|e| {
        warn!("Call listing validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let tenant_id = path.into_inner();
    let calls = engine.list_calls(tenant_id, query.limit).await?;
    debug!("Listed {} calls for tenant {}", calls.len(), tenant_id);

    Ok(HttpResponse::Ok().json(calls))
}

/// Calls still in progress with running cost estimates
///
/// GET /api/v1/tenants/{tenant_id}/calls/active
#[instrument(skip(engine))]
pub async fn list_active_calls(
    engine: web::Data<SessionEngine>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let calls = engine.active_calls(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(calls))
}

/// Start a call
///
/// POST /api/v1/tenants/{tenant_id}/calls
#[instrument(skip(engine))]
pub async fn start_call(
    engine: web::Data<SessionEngine>,
    path: web::Path<i32>,
) -> Result<HttpResponse, AppError> {
    let call = engine.start_call(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(call))
}

/// End a call; ending an ended call returns it unchanged
///
/// POST /api/v1/tenants/{tenant_id}/calls/{call_id}/end
#[instrument(skip(engine))]
pub async fn end_call(
    engine: web::Data<SessionEngine>,
    path: web::Path<(i32, i64)>,
) -> Result<HttpResponse, AppError> {
    let (tenant_id, call_id) = path.into_inner();
    let call = engine.end_call(tenant_id, call_id).await?;
    Ok(HttpResponse::Ok().json(call))
}

/// Configure tenant routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/tenants/{tenant_id}")
            .route("/summary", web::get().to(get_summary))
            .route("/bot", web::get().to(get_bot))
            .route("/calls", web::get().to(list_calls))
            .route("/calls", web::post().to(start_call))
            .route("/calls/active", web::get().to(list_active_calls))
            .route("/calls/{call_id}/end", web::post().to(end_call)),
    );
}
