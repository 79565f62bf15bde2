//! Call model
//!
//! A single metered session between a tenant's bot and an end user.
//! The only transition is `started -> ended`, and it happens once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Call status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Call in progress
    #[default]
    Started,
    /// Terminal state, billed
    Ended,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Started => write!(f, "started"),
            CallStatus::Ended => write!(f, "ended"),
        }
    }
}

impl CallStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "started" => Some(CallStatus::Started),
            "ended" => Some(CallStatus::Ended),
            _ => None,
        }
    }
}

/// Call entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Unique identifier, assigned by the store
    pub id: i64,

    /// Owning tenant
    pub tenant_id: i32,

    /// Bot the call was placed against, copied at creation
    pub bot_id: String,

    /// Lifecycle state
    pub status: CallStatus,

    /// Call start timestamp
    pub started_at: DateTime<Utc>,

    /// Call end timestamp (None until ended)
    pub ended_at: Option<DateTime<Utc>>,

    /// Charged duration in whole seconds, at least 1 (None until ended)
    pub billed_seconds: Option<i64>,

    /// Charge in cents (None until ended)
    pub cost_cents: Option<i64>,
}

impl Call {
    /// Build a freshly started call
    pub fn started(id: i64, tenant_id: i32, bot_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id,
            bot_id,
            status: CallStatus::Started,
            started_at,
            ended_at: None,
            billed_seconds: None,
            cost_cents: None,
        }
    }

    #[inline]
    pub fn is_ended(&self) -> bool {
        self.status == CallStatus::Ended
    }

    /// Whole seconds elapsed since start, never negative
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_seconds().max(0)
    }

    /// Seconds to bill if the call ended at `ended_at`
    pub fn billable_seconds(&self, ended_at: DateTime<Utc>) -> i64 {
        self.elapsed_seconds(ended_at).max(1)
    }

    /// Compare-and-transition to `ended`.
    ///
    /// Returns `false` and leaves the record untouched when the call has
    /// already ended.
    pub fn end(&mut self, ended_at: DateTime<Utc>, billed_seconds: i64, cost_cents: i64) -> bool {
        if self.is_ended() {
            return false;
        }
        self.status = CallStatus::Ended;
        self.ended_at = Some(ended_at);
        self.billed_seconds = Some(billed_seconds);
        self.cost_cents = Some(cost_cents);
        true
    }
}

/// Result of a store-level end request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndOutcome {
    /// This request performed the transition
    Ended(Call),
    /// Another request ended the call first; record is unchanged
    AlreadyEnded(Call),
}

impl EndOutcome {
    pub fn call(&self) -> &Call {
        match self {
            EndOutcome::Ended(call) | EndOutcome::AlreadyEnded(call) => call,
        }
    }

    pub fn transitioned(&self) -> bool {
        matches!(self, EndOutcome::Ended(_))
    }
}

/// Result of ending a call together with charging it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This request ended the call and debited the balance
    Settled { call: Call, new_balance_cents: i64 },
    /// Another request ended the call first; nothing was charged
    AlreadyEnded(Call),
}

impl SettleOutcome {
    pub fn call(&self) -> &Call {
        match self {
            SettleOutcome::Settled { call, .. } | SettleOutcome::AlreadyEnded(call) => call,
        }
    }
}

/// Per-tenant call aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CallStats {
    pub total_calls: i64,
    pub total_billed_seconds: i64,
}

impl CallStats {
    /// Total billed minutes rounded to two decimals
    pub fn total_minutes(&self) -> f64 {
        let minutes = self.total_billed_seconds as f64 / 60.0;
        (minutes * 100.0).round() / 100.0
    }
}
