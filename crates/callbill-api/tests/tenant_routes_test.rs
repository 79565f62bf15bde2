//! Integration tests for the tenant routes
//!
//! Runs the real handlers against the in-memory stores.

use actix_web::{test, web, App};
use callbill_api::{configure_health, configure_tenants, configure_ws};
use callbill_core::models::Tenant;
use callbill_db::{
    MemoryBalanceLedger, MemoryCallSettlement, MemoryCallStore, MemoryTenantDirectory,
};
use callbill_services::{CostCalculator, EventHub, ManualClock, SessionEngine};
use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::Arc;

struct TestState {
    engine: web::Data<SessionEngine>,
    hub: web::Data<EventHub>,
    clock: Arc<ManualClock>,
}

fn state() -> TestState {
    let tenants = Arc::new(MemoryTenantDirectory::new());
    tenants.insert(Tenant::new(1, "Acme", "bot-acme").with_bot_name("Acme Assistant"));
    tenants.insert(Tenant::new(2, "Overdrawn", "bot-over"));

    let ledger = Arc::new(MemoryBalanceLedger::new());
    ledger.open(1, 100);
    ledger.open(2, -5);

    let calls = Arc::new(MemoryCallStore::new());
    let settlement = Arc::new(MemoryCallSettlement::new(calls.clone(), ledger.clone()));

    let hub = Arc::new(EventHub::new(64));
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = SessionEngine::new(
        tenants,
        ledger,
        calls,
        settlement,
        hub.clone(),
        CostCalculator::new(40),
    )
    .with_clock(clock.clone());

    TestState {
        engine: web::Data::new(engine),
        hub: web::Data::from(hub),
        clock,
    }
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.engine.clone())
                .app_data($state.hub.clone())
                .service(
                    web::scope("/api/v1")
                        .configure(configure_health)
                        .configure(configure_tenants),
                )
                .configure(configure_ws),
        )
        .await
    };
}

#[actix_rt::test]
async fn test_health() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "healthy");
}

#[actix_rt::test]
async fn test_call_lifecycle() {
    let state = state();
    let app = app!(state);
    let mut events = state.hub.subscribe_tenant(1);

    let req = test::TestRequest::post()
        .uri("/api/v1/tenants/1/calls")
        .to_request();
    let call: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(call["status"], "started");
    assert_eq!(call["bot_id"], "bot-acme");
    let call_id = call["id"].as_i64().unwrap();

    state.clock.advance(Duration::seconds(125));

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/tenants/1/calls/{}/end", call_id))
        .to_request();
    let ended: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(ended["status"], "ended");
    assert_eq!(ended["billed_seconds"], 125);
    assert_eq!(ended["cost_cents"], 120);

    // Ending again returns the same record
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/tenants/1/calls/{}/end", call_id))
        .to_request();
    let again: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(again, ended);

    let req = test::TestRequest::get()
        .uri("/api/v1/tenants/1/summary")
        .to_request();
    let summary: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(summary["total_calls"], 1);
    assert_eq!(summary["total_minutes"], 2.08);
    assert_eq!(summary["current_balance_cents"], -20);

    let started = events.try_recv().unwrap();
    assert_eq!(started.event_type, "call_started");
    let ended_event = events.try_recv().unwrap();
    assert_eq!(ended_event.event_type, "call_ended");
    assert_eq!(ended_event.data["new_balance_cents"], -20);
    assert!(events.try_recv().is_err());
}

#[actix_rt::test]
async fn test_negative_balance_is_payment_required() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/tenants/2/calls")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 402);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "insufficient_balance");
}

#[actix_rt::test]
async fn test_not_found() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/tenants/99/calls")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "tenant_not_found");

    let req = test::TestRequest::post()
        .uri("/api/v1/tenants/1/calls/12345/end")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "call_not_found");
}

#[actix_rt::test]
async fn test_wrong_tenant_cannot_end_call() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/tenants/1/calls")
        .to_request();
    let call: Value = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/tenants/2/calls/{}/end", call["id"]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);
}

#[actix_rt::test]
async fn test_list_calls_and_limit_validation() {
    let state = state();
    let app = app!(state);

    for _ in 0..3 {
        let req = test::TestRequest::post()
            .uri("/api/v1/tenants/1/calls")
            .to_request();
        test::call_service(&app, req).await;
    }

    let req = test::TestRequest::get()
        .uri("/api/v1/tenants/1/calls?limit=2")
        .to_request();
    let calls: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(calls.len(), 2);
    assert!(calls[0]["id"].as_i64() > calls[1]["id"].as_i64());

    let req = test::TestRequest::get()
        .uri("/api/v1/tenants/1/calls?limit=0")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);

    let req = test::TestRequest::get()
        .uri("/api/v1/tenants/1/calls/active")
        .to_request();
    let active: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(active.len(), 3);
    assert_eq!(active[0]["estimated_cost_cents"], 40);
}

#[actix_rt::test]
async fn test_bot() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/api/v1/tenants/1/bot")
        .to_request();
    let bot: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(bot["bot_id"], "bot-acme");
    assert_eq!(bot["tenant_name"], "Acme");
    assert_eq!(bot["bot_name"], "Acme Assistant");
}

#[actix_rt::test]
async fn test_tenant_stream_unknown_tenant() {
    let state = state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/ws/tenants/99").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);
}
