//! Target resolution over catalogue entries.

use crate::api_type::ApiType;
use crate::instance::ServiceInstance;
use crate::service::{ServiceDescription, ServiceEntry};

/// Build-ID token accepted in place of a concrete build.
///
/// This matches *any* registered build, not the highest one; registrations are
/// never ordered by build.
pub const LATEST: &str = "latest";

const DEPLOY_PATH_SEGMENTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetQuery {
    pub deploy_path: Option<String>,
    pub name: Option<String>,
    pub api_type: ApiType,
}

impl TargetQuery {
    pub fn new(api_type: ApiType) -> Self {
        Self {
            deploy_path: None,
            name: None,
            api_type,
        }
    }

    pub fn deploy_path(mut self, deploy_path: impl Into<String>) -> Self {
        let deploy_path = deploy_path.into();
        self.deploy_path = (!deploy_path.is_empty()).then_some(deploy_path);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = (!name.is_empty()).then_some(name);
        self
    }
}

/// One matching (entry, instance) pair.
#[derive(Debug, Clone)]
pub struct Target {
    pub description: ServiceDescription,
    pub instance: ServiceInstance,
}

/// `requested` may carry all four segments or omit the build ID.
pub fn deploy_path_matches(actual: &str, requested: &str) -> bool {
    let actual: Vec<&str> = actual.split('/').collect();
    let requested: Vec<&str> = requested.split('/').collect();

    if actual.len() != DEPLOY_PATH_SEGMENTS {
        return false;
    }
    if requested.len() != DEPLOY_PATH_SEGMENTS && requested.len() != DEPLOY_PATH_SEGMENTS - 1 {
        return false;
    }

    requested.iter().zip(&actual).enumerate().all(|(i, (want, have))| {
        (i == DEPLOY_PATH_SEGMENTS - 1 && *want == LATEST) || want == have
    })
}

pub fn resolve<'a>(entries: impl IntoIterator<Item = &'a ServiceEntry>, query: &TargetQuery) -> Vec<Target> {
    let mut targets = Vec::new();
    for entry in entries {
        if let Some(requested) = &query.deploy_path {
            let actual = entry.description.deploy_path().unwrap_or_default();
            if !deploy_path_matches(actual, requested) {
                continue;
            }
        }
        if let Some(name) = &query.name {
            if &entry.description.name != name {
                continue;
            }
        }
        targets.extend(
            entry
                .instances
                .iter()
                .filter(|i| !i.disabled && i.has_api(query.api_type))
                .map(|i| Target {
                    description: entry.description.clone(),
                    instance: i.clone(),
                }),
        );
    }
    targets
}
