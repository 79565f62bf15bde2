//! In-process event fan-out
//!
//! One broadcast channel for administrators and one per tenant, created on
//! first subscription. Delivery is at-most-once: events published while no
//! one is listening are dropped, and a subscriber that falls more than
//! `capacity` events behind skips the oldest ones.

use async_trait::async_trait;
use callbill_core::{
    models::{AdminEventType, EngineEvent, TenantEventType},
    traits::EventNotifier,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Broadcast hub backing the WebSocket streams
pub struct EventHub {
    capacity: usize,
    admin: broadcast::Sender<EngineEvent>,
    tenants: RwLock<HashMap<i32, broadcast::Sender<EngineEvent>>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (admin, _) = broadcast::channel(capacity);
        Self {
            capacity,
            admin,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Receive every event scoped to `tenant_id` from now on
    pub fn subscribe_tenant(&self, tenant_id: i32) -> broadcast::Receiver<EngineEvent> {
        if let Some(sender) = self.tenants.read().get(&tenant_id) {
            return sender.subscribe();
        }
        self.tenants
            .write()
            .entry(tenant_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Receive every admin-scoped event from now on
    pub fn subscribe_admin(&self) -> broadcast::Receiver<EngineEvent> {
        self.admin.subscribe()
    }

    /// Number of live subscribers for a tenant
    pub fn tenant_subscribers(&self, tenant_id: i32) -> usize {
        self.tenants
            .read()
            .get(&tenant_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drop channels whose subscribers have all gone away
    fn prune(&self, tenant_id: i32) {
        let mut tenants = self.tenants.write();
        if tenants
            .get(&tenant_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            tenants.remove(&tenant_id);
            trace!("Dropped idle event channel for tenant {}", tenant_id);
        }
    }
}

#[async_trait]
impl EventNotifier for EventHub {
    async fn publish_tenant_event(
        &self,
        tenant_id: i32,
        event_type: TenantEventType,
        payload: serde_json::Value,
    ) {
        let sender = self.tenants.read().get(&tenant_id).cloned();
        let Some(sender) = sender else {
            trace!(
                "No subscribers for tenant {}, dropping {}",
                tenant_id, event_type
            );
            return;
        };

        match sender.send(EngineEvent::new(event_type.as_str(), payload)) {
            Ok(receivers) => debug!(
                "Published {} for tenant {} to {} subscribers",
                event_type, tenant_id, receivers
            ),
            Err(_) => self.prune(tenant_id),
        }
    }

    async fn publish_admin_event(&self, event_type: AdminEventType, payload: serde_json::Value) {
        if let Ok(receivers) = self
            .admin
            .send(EngineEvent::new(event_type.as_str(), payload))
        {
            debug!(
                "Published admin {} to {} subscribers",
                event_type, receivers
            );
        }
    }
}
