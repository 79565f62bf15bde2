//! Session engine
//!
//! Orchestrates the call lifecycle on top of the collaborator traits:
//! - Admission check and call creation
//! - Pricing, and settlement of the end transition with its debit
//! - Event emission to tenant and admin subscribers
//! - Read-side summaries for dashboards
//!
//! The engine holds no mutable state of its own. Ending a call and debiting
//! the balance commit together through [`CallSettlement`], and events go out
//! only after both are visible.

use callbill_core::{
    models::{
        AdminEventType, Call, CallEndedPayload, CallStartedPayload, SettleOutcome,
        TenantEventType, TenantUpdatePayload,
    },
    traits::{BalanceLedger, CallSettlement, CallStore, EventNotifier, TenantDirectory},
    AppError, AppResult,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::constants::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use crate::pricing::CostCalculator;

/// Aggregate view of a tenant's usage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantSummary {
    pub total_calls: i64,
    pub total_minutes: f64,
    pub current_balance_cents: i64,
}

/// Bot a tenant's calls are placed against
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotInfo {
    pub bot_id: String,
    pub tenant_name: String,
    pub bot_name: Option<String>,
}

/// A call in progress with its running figures
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveCall {
    #[serde(flatten)]
    pub call: Call,
    pub elapsed_seconds: i64,
    pub estimated_cost_cents: i64,
}

/// Call session engine
pub struct SessionEngine {
    tenants: Arc<dyn TenantDirectory>,
    ledger: Arc<dyn BalanceLedger>,
    calls: Arc<dyn CallStore>,
    settlement: Arc<dyn CallSettlement>,
    notifier: Arc<dyn EventNotifier>,
    calculator: CostCalculator,
    clock: Arc<dyn Clock>,
    default_list_limit: i64,
}

impl SessionEngine {
    /// Create an engine reading time from the system clock
    pub fn new(
        tenants: Arc<dyn TenantDirectory>,
        ledger: Arc<dyn BalanceLedger>,
        calls: Arc<dyn CallStore>,
        settlement: Arc<dyn CallSettlement>,
        notifier: Arc<dyn EventNotifier>,
        calculator: CostCalculator,
    ) -> Self {
        Self {
            tenants,
            ledger,
            calls,
            settlement,
            notifier,
            calculator,
            clock: Arc::new(SystemClock),
            default_list_limit: DEFAULT_LIST_LIMIT,
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of calls returned when a listing names no limit
    pub fn with_default_list_limit(mut self, limit: i64) -> Self {
        self.default_list_limit = limit.clamp(1, MAX_LIST_LIMIT);
        self
    }

    pub fn calculator(&self) -> &CostCalculator {
        &self.calculator
    }

    /// Start a call for `tenant_id`
    ///
    /// # Errors
    ///
    /// - `TenantNotFound` if the tenant does not exist
    /// - `InsufficientBalance` if the balance is negative or missing; no call
    ///   is created in that case
    #[instrument(skip(self))]
    pub async fn start_call(&self, tenant_id: i32) -> AppResult<Call> {
        let tenant = self.tenants.get_tenant(tenant_id).await?;

        if !self.ledger.can_admit_call(tenant_id).await? {
            let current_cents = match self.ledger.get(tenant_id).await {
                Ok(balance) => balance.current_cents,
                Err(AppError::BalanceNotFound(_)) => 0,
                Err(e) => return Err(e),
            };
            warn!(
                "Rejecting call for tenant {}: balance {} cents",
                tenant_id, current_cents
            );
            return Err(AppError::InsufficientBalance {
                tenant_id,
                current_cents,
            });
        }

        let call = self
            .calls
            .create(tenant_id, &tenant.bot.bot_id, self.clock.now())
            .await?;

        info!(
            "Call {} started for tenant {} on bot {}",
            call.id, tenant_id, call.bot_id
        );

        self.publish(
            tenant_id,
            TenantEventType::CallStarted,
            serde_json::to_value(CallStartedPayload {
                id: call.id,
                started_at: call.started_at,
            })?,
        )
        .await?;

        Ok(call)
    }

    /// End a call, billing it exactly once
    ///
    /// Ending a call that has already ended returns the stored record and
    /// has no side effects. When several requests race, only the one that
    /// settles the call debits the balance and emits events.
    ///
    /// # Errors
    ///
    /// - `CallNotFound` if no call matches `(tenant_id, call_id)`
    /// - `BalanceNotFound` or a storage error if the settlement failed; the
    ///   call is still `started` and a later request can bill it
    #[instrument(skip(self))]
    pub async fn end_call(&self, tenant_id: i32, call_id: i64) -> AppResult<Call> {
        let call = self.calls.get(tenant_id, call_id).await?;
        if call.is_ended() {
            debug!("Call {} already ended, returning stored record", call_id);
            return Ok(call);
        }

        let ended_at = self.clock.now();
        let billed_seconds = call.billable_seconds(ended_at);
        let cost_cents = self.calculator.price(billed_seconds);

        let outcome = self
            .settlement
            .settle(tenant_id, call_id, ended_at, billed_seconds, cost_cents)
            .await
            .map_err(|e| {
                error!(
                    tenant_id,
                    call_id,
                    cost_cents,
                    "Settlement failed, call left open: {}",
                    e
                );
                e
            })?;

        let (call, new_balance_cents) = match outcome {
            SettleOutcome::Settled {
                call,
                new_balance_cents,
            } => (call, new_balance_cents),
            SettleOutcome::AlreadyEnded(call) => {
                debug!("Call {} was ended by a concurrent request", call_id);
                return Ok(call);
            }
        };

        info!(
            "Call {} ended for tenant {}: {}s billed, {} cents charged, balance {} cents",
            call_id, tenant_id, billed_seconds, cost_cents, new_balance_cents
        );

        self.publish(
            tenant_id,
            TenantEventType::CallEnded,
            serde_json::to_value(CallEndedPayload {
                id: call.id,
                billed_seconds,
                cost_cents,
                new_balance_cents,
            })?,
        )
        .await?;

        Ok(call)
    }

    /// Call count, billed minutes and current balance for a tenant
    #[instrument(skip(self))]
    pub async fn summary(&self, tenant_id: i32) -> AppResult<TenantSummary> {
        self.tenants.get_tenant(tenant_id).await?;

        let stats = self.calls.stats(tenant_id).await?;
        let current_balance_cents = match self.ledger.get(tenant_id).await {
            Ok(balance) => balance.current_cents,
            Err(AppError::BalanceNotFound(_)) => 0,
            Err(e) => return Err(e),
        };

        Ok(TenantSummary {
            total_calls: stats.total_calls,
            total_minutes: stats.total_minutes(),
            current_balance_cents,
        })
    }

    /// Most recent calls first
    ///
    /// `limit` falls back to the configured default and is capped at
    /// [`MAX_LIST_LIMIT`].
    #[instrument(skip(self))]
    pub async fn list_calls(&self, tenant_id: i32, limit: Option<i64>) -> AppResult<Vec<Call>> {
        self.tenants.get_tenant(tenant_id).await?;

        let limit = limit
            .unwrap_or(self.default_list_limit)
            .clamp(1, MAX_LIST_LIMIT);
        self.calls.list(tenant_id, limit).await
    }

    /// Bot assigned to a tenant
    #[instrument(skip(self))]
    pub async fn bot(&self, tenant_id: i32) -> AppResult<BotInfo> {
        let tenant = self.tenants.get_tenant(tenant_id).await?;
        Ok(BotInfo {
            bot_id: tenant.bot.bot_id,
            tenant_name: tenant.name,
            bot_name: tenant.bot.display_name,
        })
    }

    /// Calls still in progress with elapsed time and a running cost estimate
    #[instrument(skip(self))]
    pub async fn active_calls(&self, tenant_id: i32) -> AppResult<Vec<ActiveCall>> {
        self.tenants.get_tenant(tenant_id).await?;

        let now = self.clock.now();
        let calls = self.calls.list_active(tenant_id).await?;

        Ok(calls
            .into_iter()
            .map(|call| {
                let elapsed_seconds = call.elapsed_seconds(now);
                ActiveCall {
                    estimated_cost_cents: self.calculator.estimate(elapsed_seconds),
                    elapsed_seconds,
                    call,
                }
            })
            .collect())
    }

    /// Emit the tenant-scoped event followed by the matching admin update
    async fn publish(
        &self,
        tenant_id: i32,
        event_type: TenantEventType,
        payload: serde_json::Value,
    ) -> AppResult<()> {
        let update = serde_json::to_value(TenantUpdatePayload {
            tenant_id,
            update_type: event_type,
        })?;

        self.notifier
            .publish_tenant_event(tenant_id, event_type, payload)
            .await;
        self.notifier
            .publish_admin_event(AdminEventType::TenantUpdate, update)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use callbill_core::models::{CallStatus, Tenant};
    use callbill_db::{
        MemoryBalanceLedger, MemoryCallSettlement, MemoryCallStore, MemoryTenantDirectory,
    };
    use chrono::{DateTime, Duration, Utc};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Notifier that remembers everything it was asked to publish
    #[derive(Default)]
    struct RecordingNotifier {
        tenant: Mutex<Vec<(i32, TenantEventType, serde_json::Value)>>,
        admin: Mutex<Vec<(AdminEventType, serde_json::Value)>>,
    }

    impl RecordingNotifier {
        fn tenant_events(&self) -> Vec<(i32, TenantEventType, serde_json::Value)> {
            self.tenant.lock().clone()
        }

        fn admin_events(&self) -> Vec<(AdminEventType, serde_json::Value)> {
            self.admin.lock().clone()
        }

        fn count(&self, event_type: TenantEventType) -> usize {
            self.tenant
                .lock()
                .iter()
                .filter(|(_, t, _)| *t == event_type)
                .count()
        }
    }

    #[async_trait]
    impl EventNotifier for RecordingNotifier {
        async fn publish_tenant_event(
            &self,
            tenant_id: i32,
            event_type: TenantEventType,
            payload: serde_json::Value,
        ) {
            self.tenant.lock().push((tenant_id, event_type, payload));
        }

        async fn publish_admin_event(
            &self,
            event_type: AdminEventType,
            payload: serde_json::Value,
        ) {
            self.admin.lock().push((event_type, payload));
        }
    }

    /// Settlement whose storage drops the first `failures` attempts
    struct FlakySettlement {
        inner: MemoryCallSettlement,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl CallSettlement for FlakySettlement {
        async fn settle(
            &self,
            tenant_id: i32,
            call_id: i64,
            ended_at: DateTime<Utc>,
            billed_seconds: i64,
            cost_cents: i64,
        ) -> AppResult<SettleOutcome> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(AppError::Database("connection reset".to_string()));
            }
            self.inner
                .settle(tenant_id, call_id, ended_at, billed_seconds, cost_cents)
                .await
        }
    }

    struct Fixture {
        engine: Arc<SessionEngine>,
        ledger: Arc<MemoryBalanceLedger>,
        calls: Arc<MemoryCallStore>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
    }

    fn fixture(balances: &[(i32, i64)]) -> Fixture {
        let tenants = Arc::new(MemoryTenantDirectory::new());
        let ledger = Arc::new(MemoryBalanceLedger::new());
        for &(id, cents) in balances {
            tenants.insert(Tenant::new(id, format!("Tenant {}", id), format!("bot-{}", id)));
            ledger.open(id, cents);
        }
        let calls = Arc::new(MemoryCallStore::new());
        let settlement = Arc::new(MemoryCallSettlement::new(calls.clone(), ledger.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let engine = SessionEngine::new(
            tenants,
            ledger.clone(),
            calls.clone(),
            settlement,
            notifier.clone(),
            CostCalculator::new(40),
        )
        .with_clock(clock.clone());

        Fixture {
            engine: Arc::new(engine),
            ledger,
            calls,
            notifier,
            clock,
        }
    }

    #[tokio::test]
    async fn test_scenario_a_bills_started_minutes() {
        let f = fixture(&[(1, 100)]);

        let call = f.engine.start_call(1).await.unwrap();
        assert_eq!(call.status, CallStatus::Started);
        assert_eq!(call.bot_id, "bot-1");

        f.clock.advance(Duration::seconds(125));
        let ended = f.engine.end_call(1, call.id).await.unwrap();

        assert_eq!(ended.status, CallStatus::Ended);
        assert_eq!(ended.billed_seconds, Some(125));
        assert_eq!(ended.cost_cents, Some(120));
        assert_eq!(f.ledger.get(1).await.unwrap().current_cents, -20);

        let events = f.notifier.tenant_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, TenantEventType::CallStarted);
        assert_eq!(events[0].2["id"], call.id);
        assert_eq!(events[1].1, TenantEventType::CallEnded);
        assert_eq!(events[1].2["billed_seconds"], 125);
        assert_eq!(events[1].2["cost_cents"], 120);
        assert_eq!(events[1].2["new_balance_cents"], -20);

        let admin = f.notifier.admin_events();
        assert_eq!(admin.len(), 2);
        assert_eq!(admin[0].1["tenant_id"], 1);
        assert_eq!(admin[0].1["type"], "call_started");
        assert_eq!(admin[1].1["type"], "call_ended");
    }

    #[tokio::test]
    async fn test_scenario_b_negative_balance_rejected() {
        let f = fixture(&[(1, -5)]);

        let result = f.engine.start_call(1).await;
        assert!(matches!(
            result,
            Err(AppError::InsufficientBalance {
                tenant_id: 1,
                current_cents: -5
            })
        ));
        assert!(f.calls.list(1, 10).await.unwrap().is_empty());
        assert!(f.notifier.tenant_events().is_empty());
        assert!(f.notifier.admin_events().is_empty());
    }

    #[tokio::test]
    async fn test_zero_balance_is_admitted() {
        let f = fixture(&[(1, 0)]);
        assert!(f.engine.start_call(1).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_balance_row_is_rejected() {
        let f = fixture(&[]);
        let tenants = Arc::new(MemoryTenantDirectory::new());
        tenants.insert(Tenant::new(3, "No balance", "bot-3"));
        let engine = SessionEngine::new(
            tenants,
            f.ledger.clone(),
            f.calls.clone(),
            Arc::new(MemoryCallSettlement::new(f.calls.clone(), f.ledger.clone())),
            f.notifier.clone(),
            CostCalculator::default(),
        );

        assert!(matches!(
            engine.start_call(3).await,
            Err(AppError::InsufficientBalance {
                tenant_id: 3,
                current_cents: 0
            })
        ));
    }

    #[tokio::test]
    async fn test_scenario_c_double_end_is_idempotent() {
        let f = fixture(&[(1, 100)]);
        let call = f.engine.start_call(1).await.unwrap();
        f.clock.advance(Duration::seconds(30));

        let first = f.engine.end_call(1, call.id).await.unwrap();
        f.clock.advance(Duration::seconds(600));
        let second = f.engine.end_call(1, call.id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.ledger.get(1).await.unwrap().current_cents, 60);
        assert_eq!(f.notifier.count(TenantEventType::CallEnded), 1);
        assert_eq!(f.notifier.admin_events().len(), 2);
    }

    #[tokio::test]
    async fn test_scenario_d_wrong_tenant() {
        let f = fixture(&[(1, 100), (2, 100)]);
        let call = f.engine.start_call(1).await.unwrap();

        assert!(matches!(
            f.engine.end_call(2, call.id).await,
            Err(AppError::CallNotFound { tenant_id: 2, .. })
        ));
        assert_eq!(f.ledger.get(2).await.unwrap().current_cents, 100);
        assert!(!f.calls.get(1, call.id).await.unwrap().is_ended());
    }

    #[tokio::test]
    async fn test_unknown_tenant() {
        let f = fixture(&[]);
        assert!(matches!(
            f.engine.start_call(42).await,
            Err(AppError::TenantNotFound(42))
        ));
        assert!(matches!(
            f.engine.summary(42).await,
            Err(AppError::TenantNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_instant_end_bills_one_second() {
        let f = fixture(&[(1, 100)]);
        let call = f.engine.start_call(1).await.unwrap();

        let ended = f.engine.end_call(1, call.id).await.unwrap();
        assert_eq!(ended.billed_seconds, Some(1));
        assert_eq!(ended.cost_cents, Some(40));
    }

    #[tokio::test]
    async fn test_clock_behind_start_still_bills_one_second() {
        let f = fixture(&[(1, 100)]);
        let call = f.engine.start_call(1).await.unwrap();
        f.clock.advance(Duration::seconds(-5));

        let ended = f.engine.end_call(1, call.id).await.unwrap();
        assert_eq!(ended.billed_seconds, Some(1));
    }

    #[tokio::test]
    async fn test_failed_settlement_leaves_call_billable() {
        let f = fixture(&[(1, 100)]);
        let tenants = Arc::new(MemoryTenantDirectory::new());
        tenants.insert(Tenant::new(1, "Tenant 1", "bot-1"));
        let settlement = FlakySettlement {
            inner: MemoryCallSettlement::new(f.calls.clone(), f.ledger.clone()),
            failures: AtomicUsize::new(1),
        };
        let engine = SessionEngine::new(
            tenants,
            f.ledger.clone(),
            f.calls.clone(),
            Arc::new(settlement),
            f.notifier.clone(),
            CostCalculator::new(40),
        )
        .with_clock(f.clock.clone());

        let call = engine.start_call(1).await.unwrap();
        f.clock.advance(Duration::seconds(61));

        // The failure surfaces and nothing is half-applied
        assert!(matches!(
            engine.end_call(1, call.id).await,
            Err(AppError::Database(_))
        ));
        let stored = f.calls.get(1, call.id).await.unwrap();
        assert_eq!(stored.status, CallStatus::Started);
        assert_eq!(stored.cost_cents, None);
        assert_eq!(f.ledger.get(1).await.unwrap().current_cents, 100);
        assert_eq!(f.notifier.count(TenantEventType::CallEnded), 0);

        // A retry bills the call instead of returning an unpaid record
        let ended = engine.end_call(1, call.id).await.unwrap();
        assert_eq!(ended.status, CallStatus::Ended);
        assert_eq!(ended.cost_cents, Some(80));
        assert_eq!(f.ledger.get(1).await.unwrap().current_cents, 20);
        assert_eq!(f.notifier.count(TenantEventType::CallEnded), 1);

        let events = f.notifier.tenant_events();
        assert_eq!(events.last().unwrap().2["new_balance_cents"], 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_end_debits_once() {
        let f = fixture(&[(1, 1_000)]);
        let call = f.engine.start_call(1).await.unwrap();
        f.clock.advance(Duration::seconds(90));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let engine = f.engine.clone();
                tokio::spawn(async move { engine.end_call(1, call.id).await })
            })
            .collect();

        let results: Vec<Call> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert!(results.iter().all(|c| c == &results[0]));
        assert_eq!(results[0].cost_cents, Some(80));
        assert_eq!(f.ledger.get(1).await.unwrap().current_cents, 920);
        assert_eq!(f.notifier.count(TenantEventType::CallEnded), 1);
        assert_eq!(f.notifier.admin_events().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tenants_do_not_interfere() {
        let f = fixture(&[(1, 10_000), (2, 10_000)]);

        let tasks: Vec<_> = [1, 2]
            .into_iter()
            .flat_map(|tenant_id| {
                let engine = f.engine.clone();
                (0..20).map(move |_| {
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        let call = engine.start_call(tenant_id).await?;
                        engine.end_call(tenant_id, call.id).await
                    })
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap().cost_cents, Some(40));
        }

        for tenant_id in [1, 2] {
            assert_eq!(
                f.ledger.get(tenant_id).await.unwrap().current_cents,
                10_000 - 20 * 40
            );
            let summary = f.engine.summary(tenant_id).await.unwrap();
            assert_eq!(summary.total_calls, 20);
        }
    }

    #[tokio::test]
    async fn test_summary() {
        let f = fixture(&[(1, 500)]);

        let a = f.engine.start_call(1).await.unwrap();
        f.clock.advance(Duration::seconds(125));
        f.engine.end_call(1, a.id).await.unwrap();

        let b = f.engine.start_call(1).await.unwrap();
        f.clock.advance(Duration::seconds(20));
        f.engine.end_call(1, b.id).await.unwrap();

        f.engine.start_call(1).await.unwrap();

        let summary = f.engine.summary(1).await.unwrap();
        assert_eq!(summary.total_calls, 3);
        assert_eq!(summary.total_minutes, 2.42);
        assert_eq!(summary.current_balance_cents, 500 - 120 - 40);
    }

    #[tokio::test]
    async fn test_list_calls_most_recent_first() {
        let f = fixture(&[(1, 500)]);
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(f.engine.start_call(1).await.unwrap().id);
        }

        let listed: Vec<i64> = f
            .engine
            .list_calls(1, Some(2))
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed, vec![ids[3], ids[2]]);
        assert_eq!(f.engine.list_calls(1, None).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_bot_and_active_calls() {
        let f = fixture(&[(1, 500)]);

        let bot = f.engine.bot(1).await.unwrap();
        assert_eq!(bot.bot_id, "bot-1");
        assert_eq!(bot.tenant_name, "Tenant 1");

        let ended = f.engine.start_call(1).await.unwrap();
        f.engine.end_call(1, ended.id).await.unwrap();
        let running = f.engine.start_call(1).await.unwrap();
        f.clock.advance(Duration::seconds(90));

        let active = f.engine.active_calls(1).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].call.id, running.id);
        assert_eq!(active[0].elapsed_seconds, 90);
        assert_eq!(active[0].estimated_cost_cents, 60);

        let json = serde_json::to_value(&active[0]).unwrap();
        assert_eq!(json["id"], running.id);
        assert_eq!(json["status"], "started");
        assert_eq!(json["estimated_cost_cents"], 60);
    }
}
