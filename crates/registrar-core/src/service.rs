use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::instance::ServiceInstance;

/// Identity of a logical service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ServiceDescription {
    #[schema(example = "keyvalue.KeyValueService")]
    pub name: String,
    /// `namespace/group/repository/buildID`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "acme/web/api/42")]
    pub deploy_path: Option<String>,
}

impl ServiceDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deploy_path: None,
        }
    }

    pub fn with_deploy_path(mut self, deploy_path: impl Into<String>) -> Self {
        let deploy_path = deploy_path.into();
        self.deploy_path = (!deploy_path.is_empty()).then_some(deploy_path);
        self
    }

    pub fn deploy_path(&self) -> Option<&str> {
        self.deploy_path.as_deref().filter(|p| !p.is_empty())
    }

    /// Same name, and the same deploy path if both sides carry one.
    pub fn matches(&self, other: &ServiceDescription) -> bool {
        if let (Some(mine), Some(theirs)) = (self.deploy_path(), other.deploy_path()) {
            if mine != theirs {
                return false;
            }
        }
        self.name == other.name
    }
}

impl fmt::Display for ServiceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.deploy_path().unwrap_or_default())
    }
}

/// All instances sharing one description. Entries are never removed from the
/// catalogue; an entry without instances is dormant.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub description: ServiceDescription,
    pub instances: Vec<ServiceInstance>,
}

impl ServiceEntry {
    pub fn new(description: ServiceDescription) -> Self {
        Self {
            description,
            instances: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub(crate) fn instance_mut(&mut self, host: &str, port: u16) -> Option<&mut ServiceInstance> {
        self.instances
            .iter_mut()
            .find(|i| i.address.host == host && i.address.port == port)
    }

    /// Copy of the entry restricted to instances that are still visible.
    pub(crate) fn visible(&self) -> ServiceEntry {
        ServiceEntry {
            description: self.description.clone(),
            instances: self.instances.iter().filter(|i| !i.disabled).cloned().collect(),
        }
    }
}
