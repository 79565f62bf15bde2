//! Balance model
//!
//! A tenant's prepaid credit in integer cents. Overdraft is allowed so an
//! in-progress call can always finish, but a tenant already in debt cannot
//! start a new call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Balance entity (one per tenant)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Owning tenant
    pub tenant_id: i32,

    /// Current balance in cents, negative while in overdraft
    pub current_cents: i64,

    /// Timestamp of the last mutation
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    pub fn new(tenant_id: i32, current_cents: i64) -> Self {
        Self {
            tenant_id,
            current_cents,
            updated_at: Utc::now(),
        }
    }

    /// Admission rule: zero is admitted, strictly negative is not
    #[inline]
    pub fn admits_new_call(&self) -> bool {
        self.current_cents >= 0
    }

    /// Subtract a charge and stamp the mutation time
    pub fn apply_debit(&mut self, cost_cents: i64, at: DateTime<Utc>) -> i64 {
        self.current_cents = self.current_cents.saturating_sub(cost_cents);
        self.updated_at = at;
        self.current_cents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_balance_admits() {
        assert!(Balance::new(1, 0).admits_new_call());
        assert!(Balance::new(1, 250).admits_new_call());
        assert!(!Balance::new(1, -1).admits_new_call());
    }

    #[test]
    fn test_apply_debit_can_overdraw() {
        let mut balance = Balance::new(1, 100);
        let at = Utc::now();
        assert_eq!(balance.apply_debit(120, at), -20);
        assert_eq!(balance.updated_at, at);
        assert!(!balance.admits_new_call());
    }
}
