//! Admission control logic and state management.

mod analytics;
mod clock;
mod counter;
mod engine;
mod key;
mod limiter;
mod policy;
mod rules;
mod store;
mod sweeper;

pub use analytics::{AnalyticsTracker, RateLimitAnalytics};
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::CounterEntry;
pub use engine::{Admission, AdmissionEngine, CleanupReport, PolicySource};
pub use key::QuotaKey;
pub use limiter::{CounterStatus, Decision, RateLimiter};
pub use policy::{Category, LimitPolicy, Tier, TierPolicyTable, UnknownTier};
pub use rules::{CustomRule, CustomRuleConfig, CustomRuleSet, MatcherConfig, RuleMatcher};
pub use store::{CounterStore, InMemoryCounterStore};
pub use sweeper::{Sweeper, SweeperHandle};
