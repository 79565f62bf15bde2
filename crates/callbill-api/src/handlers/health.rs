//! Health check

use actix_web::{web, HttpResponse};

/// Liveness probe
///
/// GET /api/v1/health
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "callbill",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Configure health routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check));
}
