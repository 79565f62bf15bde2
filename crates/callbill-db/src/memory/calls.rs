use async_trait::async_trait;
use callbill_core::{
    models::{Call, CallStats, EndOutcome},
    traits::CallStore,
    AppError, AppResult,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

pub(super) type Partition = Arc<Mutex<BTreeMap<i64, Call>>>;

/// Call store partitioned by tenant
///
/// Ids come from a single atomic counter so they stay unique and increasing
/// across tenants. Each tenant's calls sit behind their own mutex, which is
/// what makes `end` an atomic check-then-set.
pub struct MemoryCallStore {
    next_id: AtomicI64,
    partitions: RwLock<HashMap<i32, Partition>>,
}

impl Default for MemoryCallStore {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            partitions: RwLock::new(HashMap::new()),
        }
    }
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn partition(&self, tenant_id: i32) -> Option<Partition> {
        self.partitions.read().get(&tenant_id).cloned()
    }

    fn partition_or_create(&self, tenant_id: i32) -> Partition {
        if let Some(partition) = self.partition(tenant_id) {
            return partition;
        }
        self.partitions.write().entry(tenant_id).or_default().clone()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    #[instrument(skip(self))]
    async fn create(
        &self,
        tenant_id: i32,
        bot_id: &str,
        started_at: DateTime<Utc>,
    ) -> AppResult<Call> {
        let partition = self.partition_or_create(tenant_id);
        let mut calls = partition.lock();

        // Allocate under the partition lock so a tenant's ids enter the map in order
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let call = Call::started(id, tenant_id, bot_id.to_string(), started_at);
        calls.insert(id, call.clone());

        debug!("Created call {} for tenant {}", id, tenant_id);
        Ok(call)
    }

    async fn get(&self, tenant_id: i32, call_id: i64) -> AppResult<Call> {
        self.partition(tenant_id)
            .and_then(|partition| partition.lock().get(&call_id).cloned())
            .ok_or(AppError::CallNotFound { tenant_id, call_id })
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
        let partition = self
            .partition(tenant_id)
            .ok_or(AppError::CallNotFound { tenant_id, call_id })?;
        let mut calls = partition.lock();
        let call = calls
            .get_mut(&call_id)
            .ok_or(AppError::CallNotFound { tenant_id, call_id })?;

        if call.end(ended_at, billed_seconds, cost_cents) {
            Ok(EndOutcome::Ended(call.clone()))
        } else {
            Ok(EndOutcome::AlreadyEnded(call.clone()))
        }
    }

    async fn list(&self, tenant_id: i32, limit: i64) -> AppResult<Vec<Call>> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(self
            .partition(tenant_id)
            .map(|partition| {
                partition
                    .lock()
                    .values()
                    .rev()
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_active(&self, tenant_id: i32) -> AppResult<Vec<Call>> {
        Ok(self
            .partition(tenant_id)
            .map(|partition| {
                partition
                    .lock()
                    .values()
                    .rev()
                    .filter(|call| !call.is_ended())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn stats(&self, tenant_id: i32) -> AppResult<CallStats> {
        Ok(self
            .partition(tenant_id)
            .map(|partition| {
                let calls = partition.lock();
                CallStats {
                    total_calls: calls.len() as i64,
                    total_billed_seconds: calls.values().filter_map(|c| c.billed_seconds).sum(),
                }
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbill_core::models::CallStatus;
    use chrono::Duration;

    #[tokio::test]
    async fn test_create_is_immediately_visible() {
        let store = MemoryCallStore::new();
        let t0 = Utc::now();
        let call = store.create(1, "bot-1", t0).await.unwrap();

        let fetched = store.get(1, call.id).await.unwrap();
        assert_eq!(fetched, call);
        assert_eq!(fetched.status, CallStatus::Started);
        assert_eq!(fetched.bot_id, "bot-1");
    }

    #[tokio::test]
    async fn test_lookup_is_tenant_scoped() {
        let store = MemoryCallStore::new();
        let call = store.create(1, "bot-1", Utc::now()).await.unwrap();

        assert!(matches!(
            store.get(2, call.id).await,
            Err(AppError::CallNotFound { tenant_id: 2, .. })
        ));
        assert!(matches!(
            store.end(2, call.id, Utc::now(), 1, 40).await,
            Err(AppError::CallNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_end_twice_keeps_first_result() {
        let store = MemoryCallStore::new();
        let t0 = Utc::now();
        let call = store.create(1, "bot-1", t0).await.unwrap();

        let first = store
            .end(1, call.id, t0 + Duration::seconds(10), 10, 40)
            .await
            .unwrap();
        assert!(first.transitioned());

        let second = store
            .end(1, call.id, t0 + Duration::seconds(99), 99, 80)
            .await
            .unwrap();
        assert!(!second.transitioned());
        assert_eq!(second.call(), first.call());
    }

    #[tokio::test]
    async fn test_list_most_recent_first_with_limit() {
        let store = MemoryCallStore::new();
        let t0 = Utc::now();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(store.create(1, "bot-1", t0).await.unwrap().id);
        }
        store.create(2, "bot-2", t0).await.unwrap();

        let listed: Vec<i64> = store
            .list(1, 3)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed, vec![ids[4], ids[3], ids[2]]);

        assert!(store.list(3, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_and_stats() {
        let store = MemoryCallStore::new();
        let t0 = Utc::now();
        let a = store.create(1, "bot-1", t0).await.unwrap();
        let b = store.create(1, "bot-1", t0).await.unwrap();
        store.end(1, a.id, t0, 125, 120).await.unwrap();

        let active = store.list_active(1).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);

        let stats = store.stats(1).await.unwrap();
        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.total_billed_seconds, 125);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_end_single_winner() {
        let store = Arc::new(MemoryCallStore::new());
        let t0 = Utc::now();
        let call = store.create(1, "bot-1", t0).await.unwrap();

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.end(1, call.id, t0, 1 + i, 40).await })
            })
            .collect();

        let winners = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .filter(EndOutcome::transitioned)
            .count();

        assert_eq!(winners, 1);
    }
}
