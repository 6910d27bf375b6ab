use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::api_type::ApiType;

/// Registry-assigned instance identifier. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct ServiceAddress {
    #[schema(example = "10.0.0.5")]
    pub host: String,
    #[schema(example = 9000)]
    pub port: u16,
}

impl ServiceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One running process backing a service.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub id: InstanceId,
    pub address: ServiceAddress,
    pub api_types: Vec<ApiType>,
    pub disabled: bool,
    /// Unix millis
    pub first_registered: u64,
    pub last_success: u64,
    pub last_refresh: u64,
    pub failures: u32,
}

impl ServiceInstance {
    pub fn new(id: InstanceId, address: ServiceAddress, api_types: Vec<ApiType>, now: u64) -> Self {
        Self {
            id,
            address,
            api_types,
            disabled: false,
            first_registered: now,
            last_success: now,
            last_refresh: now,
            failures: 0,
        }
    }

    pub fn has_api(&self, api: ApiType) -> bool {
        self.api_types.contains(&api)
    }

    pub fn is_probe_capable(&self) -> bool {
        self.has_api(ApiType::Status)
    }

    pub fn refresh(&mut self, timestamp: u64) {
        self.last_refresh = timestamp;
    }

    pub fn record_success(&mut self, timestamp: u64) {
        self.failures = 0;
        self.last_success = timestamp;
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.address)
    }
}
