//! Events emitted by the session engine
//!
//! Tenant-scoped events describe a single call; admin-scoped events tell
//! operators that something changed for a tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant-scoped event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantEventType {
    CallStarted,
    CallEnded,
}

impl TenantEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantEventType::CallStarted => "call_started",
            TenantEventType::CallEnded => "call_ended",
        }
    }
}

impl fmt::Display for TenantEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admin-scoped event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminEventType {
    TenantUpdate,
}

impl AdminEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminEventType::TenantUpdate => "tenant_update",
        }
    }
}

impl fmt::Display for AdminEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire envelope pushed to subscribers: `{"type": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

impl EngineEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// Payload of `call_started`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStartedPayload {
    pub id: i64,
    pub started_at: DateTime<Utc>,
}

/// Payload of `call_ended`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEndedPayload {
    pub id: i64,
    pub billed_seconds: i64,
    pub cost_cents: i64,
    pub new_balance_cents: i64,
}

/// Payload of `tenant_update`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantUpdatePayload {
    pub tenant_id: i32,
    #[serde(rename = "type")]
    pub update_type: TenantEventType,
}
