//! Request and response bodies exchanged with the registry.

use registrar_core::{ApiType, InstanceId, ServiceDescription, ServiceEntry, Target};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// An address as announced by a registering service. An empty host means
/// "whatever address the registry sees me connecting from".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AddressSpec {
    #[serde(default)]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub api_types: Vec<ApiType>,
}

impl AddressSpec {
    pub fn new(port: u16, api_types: Vec<ApiType>) -> Self {
        Self {
            host: String::new(),
            port,
            api_types,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub service: ServiceDescription,
    pub addresses: Vec<AddressSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RegisteredAddress {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    #[schema(value_type = u64)]
    pub instance_id: InstanceId,
    pub addresses: Vec<RegisteredAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeregisterRequest {
    #[schema(value_type = u64)]
    pub instance_id: InstanceId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ListRequest {
    /// Exact service name; empty lists everything.
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InstanceAddress {
    pub host: String,
    pub port: u16,
    pub api_types: Vec<ApiType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceListing {
    pub service: ServiceDescription,
    pub addresses: Vec<InstanceAddress>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ListResponse {
    pub services: Vec<ServiceListing>,
}

impl From<&ServiceEntry> for ServiceListing {
    fn from(entry: &ServiceEntry) -> Self {
        Self {
            service: entry.description.clone(),
            addresses: entry
                .instances
                .iter()
                .map(|i| InstanceAddress {
                    host: i.address.host.clone(),
                    port: i.address.port,
                    api_types: i.api_types.clone(),
                })
                .collect(),
        }
    }
}

impl From<Vec<ServiceEntry>> for ListResponse {
    fn from(entries: Vec<ServiceEntry>) -> Self {
        Self {
            services: entries.iter().map(ServiceListing::from).collect(),
        }
    }
}

/// One listing per matching instance, in resolution order.
impl From<Vec<Target>> for ListResponse {
    fn from(targets: Vec<Target>) -> Self {
        Self {
            services: targets
                .into_iter()
                .map(|t| ServiceListing {
                    service: t.description,
                    addresses: vec![InstanceAddress {
                        host: t.instance.address.host,
                        port: t.instance.address.port,
                        api_types: t.instance.api_types,
                    }],
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GetTargetRequest {
    #[serde(default)]
    pub deploy_path: String,
    #[serde(default)]
    pub name: String,
    pub api_type: ApiType,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GetServiceAddressRequest {
    pub service: ServiceDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceAddressResponse {
    pub service: ServiceDescription,
    pub addresses: Vec<InstanceAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShutdownRequest {
    pub service_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ProcessShutdownRequest {
    /// Defaults to the caller's peer address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}
