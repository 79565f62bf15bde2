//! Business logic services for the call billing engine
//!
//! # Services
//!
//! - `CostCalculator` - flat per-minute pricing, pure
//! - `SessionEngine` - call start/end orchestration, summaries and listings
//! - `EventHub` - in-process fan-out of engine events to tenant and admin subscribers
//! - `Clock` - time source, swappable in tests

pub mod clock;
pub mod event_hub;
pub mod pricing;
pub mod session_engine;

pub use clock::{Clock, ManualClock, SystemClock};
pub use event_hub::EventHub;
pub use pricing::CostCalculator;
pub use session_engine::{ActiveCall, BotInfo, SessionEngine, TenantSummary};

/// Business logic constants
pub mod constants {
    /// Default flat rate in cents per started minute
    pub const DEFAULT_RATE_CENTS_PER_MINUTE: i64 = 40;

    /// Default number of calls returned by a listing
    pub const DEFAULT_LIST_LIMIT: i64 = 50;

    /// Upper bound accepted for a listing
    pub const MAX_LIST_LIMIT: i64 = 500;

    pub const SECONDS_PER_MINUTE: i64 = 60;
}
