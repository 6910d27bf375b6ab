use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use utoipa::ToSchema;

use crate::instance::ServiceInstance;

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(180);
pub const DEFAULT_MAX_FAILURES: u32 = 10;
pub const DEFAULT_SUCCESS_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// No re-registration within the staleness window.
    Stale,
    Disabled,
    ExcessiveFailures,
    /// Probe-capable instance without a successful probe inside the success window.
    NoRecentSuccess,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::Stale => "stale",
            EvictionReason::Disabled => "disabled",
            EvictionReason::ExcessiveFailures => "excessive_failures",
            EvictionReason::NoRecentSuccess => "no_recent_success",
        }
    }
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Live,
    /// Last probe failed, threshold not yet crossed. Still resolvable.
    Suspect,
    Evicted(EvictionReason),
}

/// Eviction thresholds applied by every sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub max_age: Duration,
    pub max_failures: u32,
    pub success_window: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            max_failures: DEFAULT_MAX_FAILURES,
            success_window: DEFAULT_SUCCESS_WINDOW,
        }
    }
}

impl HealthPolicy {
    pub fn assess(&self, instance: &ServiceInstance, now: u64) -> InstanceState {
        if now.saturating_sub(instance.last_refresh) > self.max_age.as_millis() as u64 {
            return InstanceState::Evicted(EvictionReason::Stale);
        }
        if instance.disabled {
            return InstanceState::Evicted(EvictionReason::Disabled);
        }
        if instance.failures > self.max_failures {
            return InstanceState::Evicted(EvictionReason::ExcessiveFailures);
        }
        // A flapping instance never reaches max_failures in a row, so
        // probe-capable instances also need a recent success.
        if instance.is_probe_capable()
            && now.saturating_sub(instance.last_success) > self.success_window.as_millis() as u64
        {
            return InstanceState::Evicted(EvictionReason::NoRecentSuccess);
        }
        if instance.failures > 0 {
            InstanceState::Suspect
        } else {
            InstanceState::Live
        }
    }

    pub fn is_valid(&self, instance: &ServiceInstance, now: u64) -> bool {
        !matches!(self.assess(instance, now), InstanceState::Evicted(_))
    }
}
