//! The authoritative in-memory set of service entries.
//!
//! One lock covers the whole catalogue. It is only ever held for in-memory
//! list manipulation; callers probing or notifying instances work on the
//! snapshots returned here.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api_type::ApiType;
use crate::errors::{RegistryError, RegistryResult};
use crate::health::{EvictionReason, HealthPolicy, InstanceState};
use crate::instance::{InstanceId, ServiceAddress, ServiceInstance};
use crate::resolver::{self, Target, TargetQuery};
use crate::service::{ServiceDescription, ServiceEntry};
use crate::time::{Clock, SystemClock};

#[derive(Default)]
struct Inner {
    entries: Vec<ServiceEntry>,
    last_id: u64,
}

impl Inner {
    fn instance_mut(&mut self, id: InstanceId) -> Option<&mut ServiceInstance> {
        self.entries
            .iter_mut()
            .flat_map(|e| e.instances.iter_mut())
            .find(|i| i.id == id)
    }

    fn disable(&mut self, id: InstanceId) -> RegistryResult<ServiceInstance> {
        let instance = self.instance_mut(id).ok_or(RegistryError::InstanceNotFound(id))?;
        instance.disabled = true;
        Ok(instance.clone())
    }

    fn sweep(&mut self, policy: &HealthPolicy, now: u64) -> Vec<Eviction> {
        let mut evicted = Vec::new();
        for entry in self.entries.iter_mut() {
            let description = &entry.description;
            entry.instances.retain(|instance| match policy.assess(instance, now) {
                InstanceState::Evicted(reason) => {
                    info!(service = %description, instance = %instance, %reason, "Instance removed");
                    evicted.push(Eviction {
                        description: description.clone(),
                        instance: instance.clone(),
                        reason,
                    });
                    false
                }
                _ => true,
            });
        }
        evicted
    }
}

/// Result of [`Catalogue::upsert`].
#[derive(Debug, Clone)]
pub struct Upserted {
    pub instance: ServiceInstance,
    /// False when an existing (host, port) was refreshed.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct Eviction {
    pub description: ServiceDescription,
    pub instance: ServiceInstance,
    pub reason: EvictionReason,
}

/// Snapshot of an instance to be probed outside the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub id: InstanceId,
    pub service_name: String,
    pub address: ServiceAddress,
}

/// Status-capable addresses grouped by target name, for scrape configs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeTarget {
    pub name: String,
    pub addresses: Vec<String>,
}

/// Scrape target name: the service name up to its first dot.
pub fn target_name(service_name: &str) -> &str {
    service_name.split('.').next().unwrap_or(service_name)
}

pub struct Catalogue {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    policy: HealthPolicy,
}

impl Default for Catalogue {
    fn default() -> Self {
        Self::new(HealthPolicy::default())
    }
}

impl Catalogue {
    pub fn new(policy: HealthPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: HealthPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            policy,
        }
    }

    /// Find-or-create the entry for `description`, then find-or-create the
    /// instance at `host:port` inside it.
    pub fn upsert(
        &self,
        description: &ServiceDescription,
        host: &str,
        port: u16,
        api_types: &[ApiType],
    ) -> RegistryResult<Upserted> {
        if description.name.is_empty() {
            return Err(RegistryError::MissingName);
        }
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let idx = match inner
            .entries
            .iter()
            .position(|e| e.description.matches(description))
        {
            Some(idx) => idx,
            None => {
                info!(service = %description, "New service entry");
                inner.entries.push(ServiceEntry::new(description.clone()));
                inner.entries.len() - 1
            }
        };

        if let Some(existing) = inner.entries[idx].instance_mut(host, port) {
            existing.refresh(now);
            debug!(service = %description.name, instance = %existing, "Re-registered");
            return Ok(Upserted {
                instance: existing.clone(),
                created: false,
            });
        }

        inner.last_id += 1;
        let id = InstanceId(inner.last_id);
        let instance = ServiceInstance::new(id, ServiceAddress::new(host, port), api_types.to_vec(), now);
        let entry = &mut inner.entries[idx];
        entry.instances.push(instance.clone());
        info!(
            service = %entry.description,
            instance = %instance,
            instances = entry.instances.len(),
            "Registered new instance"
        );
        Ok(Upserted {
            instance,
            created: true,
        })
    }

    /// Mark `id` disabled. It stays invisible to reads until a sweep removes it.
    pub fn disable(&self, id: InstanceId) -> RegistryResult<ServiceInstance> {
        self.inner.lock().disable(id)
    }

    /// Disable `id` and sweep in one critical section, so a concurrent
    /// re-registration cannot refresh the instance in between. The result
    /// holds the deregistered instance and anything else the sweep removed.
    pub fn deregister(&self, id: InstanceId) -> RegistryResult<Vec<Eviction>> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        inner.disable(id)?;
        Ok(inner.sweep(&self.policy, now))
    }

    /// Deregister every instance listening on `host` at one of `ports`,
    /// across all entries.
    pub fn deregister_ports(&self, host: &str, ports: &[u16]) -> Vec<Eviction> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let mut disabled = false;
        for instance in inner
            .entries
            .iter_mut()
            .flat_map(|e| e.instances.iter_mut())
            .filter(|i| i.address.host == host && ports.contains(&i.address.port))
        {
            instance.disabled = true;
            disabled = true;
        }
        if !disabled {
            return Vec::new();
        }
        inner.sweep(&self.policy, now)
    }

    /// Remove every instance the policy no longer considers valid.
    pub fn sweep(&self) -> Vec<Eviction> {
        let now = self.clock.now_millis();
        self.inner.lock().sweep(&self.policy, now)
    }

    /// Entries matching `description` by name, and by deploy path when both
    /// sides specify one. Includes dormant entries.
    pub fn find(&self, description: &ServiceDescription) -> Vec<ServiceEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.description.matches(description))
            .map(ServiceEntry::visible)
            .collect()
    }

    /// Entries with at least one visible instance, optionally by exact name.
    pub fn list(&self, name: Option<&str>) -> Vec<ServiceEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| name.is_none_or(|n| e.description.name == n))
            .map(ServiceEntry::visible)
            .filter(|e| !e.is_empty())
            .collect()
    }

    pub fn get_target(&self, query: &TargetQuery) -> Vec<Target> {
        resolver::resolve(self.inner.lock().entries.iter(), query)
    }

    pub fn probe_candidates(&self) -> Vec<ProbeTarget> {
        self.inner
            .lock()
            .entries
            .iter()
            .flat_map(|e| {
                e.instances
                    .iter()
                    .filter(|i| i.is_probe_capable() && !i.disabled)
                    .map(|i| ProbeTarget {
                        id: i.id,
                        service_name: e.description.name.clone(),
                        address: i.address.clone(),
                    })
            })
            .collect()
    }

    /// Apply a probe outcome. Returns the instance's failure count, or `None`
    /// if it was evicted while the probe was in flight.
    pub fn record_probe(&self, id: InstanceId, success: bool) -> Option<u32> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let instance = inner.instance_mut(id)?;
        if success {
            instance.record_success(now);
        } else {
            instance.record_failure();
        }
        Some(instance.failures)
    }

    pub fn state_of(&self, id: InstanceId) -> Option<InstanceState> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        inner.instance_mut(id).map(|i| self.policy.assess(i, now))
    }

    pub fn instance_count(&self) -> usize {
        self.inner.lock().entries.iter().map(|e| e.instances.len()).sum()
    }

    pub fn scrape_targets(&self) -> Vec<ScrapeTarget> {
        let inner = self.inner.lock();
        let mut targets: Vec<ScrapeTarget> = Vec::new();
        for entry in &inner.entries {
            let name = target_name(&entry.description.name);
            for instance in entry.instances.iter().filter(|i| i.is_probe_capable() && !i.disabled) {
                let address = instance.address.to_string();
                match targets.iter_mut().find(|t| t.name == name) {
                    Some(target) => target.addresses.push(address),
                    None => targets.push(ScrapeTarget {
                        name: name.to_string(),
                        addresses: vec![address],
                    }),
                }
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use std::collections::HashSet;
    use std::time::Duration;

    fn catalogue() -> (Catalogue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (Catalogue::with_clock(HealthPolicy::default(), clock.clone()), clock)
    }

    fn kv() -> ServiceDescription {
        ServiceDescription::new("kv").with_deploy_path("ns/g/kv/7")
    }

    #[test]
    fn ids_are_unique_and_addresses_distinct_per_entry() {
        let (cat, _) = catalogue();
        let mut ids = HashSet::new();
        for port in [9000, 9001, 9000, 9002, 9001] {
            let up = cat.upsert(&kv(), "10.0.0.5", port, &[ApiType::Tcp]).unwrap();
            ids.insert(up.instance.id);
        }
        let other = cat
            .upsert(&ServiceDescription::new("web"), "10.0.0.5", 9000, &[ApiType::Html])
            .unwrap();
        ids.insert(other.instance.id);

        assert_eq!(ids.len(), 4);
        let entries = cat.list(Some("kv"));
        assert_eq!(entries.len(), 1);
        let addrs: HashSet<_> = entries[0].instances.iter().map(|i| i.address.clone()).collect();
        assert_eq!(addrs.len(), entries[0].instances.len());
    }

    #[test]
    fn reregistration_keeps_id_and_refreshes() {
        let (cat, clock) = catalogue();
        let first = cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap();
        clock.advance(Duration::from_secs(5));
        let second = cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.instance.id, second.instance.id);
        assert_eq!(second.instance.first_registered, first.instance.first_registered);
        assert_eq!(second.instance.last_refresh, first.instance.last_refresh + 5_000);
        assert_eq!(cat.instance_count(), 1);
    }

    #[test]
    fn empty_name_rejected() {
        let (cat, _) = catalogue();
        let err = cat.upsert(&ServiceDescription::new(""), "10.0.0.5", 9000, &[]).unwrap_err();
        assert_eq!(err, RegistryError::MissingName);
    }

    #[test]
    fn deregister_unknown_id_is_not_found() {
        let (cat, _) = catalogue();
        assert_eq!(
            cat.deregister(InstanceId(42)).unwrap_err(),
            RegistryError::InstanceNotFound(InstanceId(42))
        );
    }

    #[test]
    fn disabled_instance_hidden_until_swept() {
        let (cat, _) = catalogue();
        let up = cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap();
        assert!(cat.disable(up.instance.id).unwrap().disabled);
        assert!(cat.list(None).is_empty());
        assert_eq!(cat.instance_count(), 1);

        let evicted = cat.sweep();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].reason, EvictionReason::Disabled);
        assert_eq!(cat.instance_count(), 0);
    }

    #[test]
    fn deregister_removes_and_leaves_dormant_entry() {
        let (cat, _) = catalogue();
        let up = cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap();
        let evicted = cat.deregister(up.instance.id).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].instance.id, up.instance.id);
        assert_eq!(evicted[0].reason, EvictionReason::Disabled);
        assert_eq!(cat.state_of(up.instance.id), None);

        // entry survives, empty
        let dormant = cat.find(&kv());
        assert_eq!(dormant.len(), 1);
        assert!(dormant[0].is_empty());
        assert!(cat.list(None).is_empty());
    }

    #[test]
    fn evicted_instance_comes_back_with_new_id() {
        let (cat, _) = catalogue();
        let up = cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap();
        cat.deregister(up.instance.id).unwrap();

        let again = cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap();
        assert!(again.created);
        assert_ne!(again.instance.id, up.instance.id);
        assert_eq!(cat.find(&kv()).len(), 1);
    }

    #[test]
    fn stale_instance_evicted_without_failures() {
        let (cat, clock) = catalogue();
        cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap();
        clock.advance(Duration::from_secs(179));
        assert!(cat.sweep().is_empty());
        clock.advance(Duration::from_secs(2));
        let evicted = cat.sweep();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].reason, EvictionReason::Stale);
        assert_eq!(evicted[0].instance.failures, 0);
    }

    #[test]
    fn failure_threshold() {
        let (cat, _) = catalogue();
        let nine = cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Status]).unwrap().instance.id;
        let eleven = cat.upsert(&kv(), "10.0.0.6", 9000, &[ApiType::Status]).unwrap().instance.id;
        for _ in 0..9 {
            cat.record_probe(nine, false);
        }
        for _ in 0..11 {
            cat.record_probe(eleven, false);
        }
        assert_eq!(cat.state_of(nine), Some(InstanceState::Suspect));

        let evicted = cat.sweep();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].instance.id, eleven);
        assert_eq!(evicted[0].reason, EvictionReason::ExcessiveFailures);
        assert_eq!(cat.state_of(eleven), None);
    }

    #[test]
    fn success_resets_failures() {
        let (cat, _) = catalogue();
        let id = cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Status]).unwrap().instance.id;
        cat.record_probe(id, false);
        cat.record_probe(id, false);
        assert_eq!(cat.record_probe(id, true), Some(0));
        assert_eq!(cat.state_of(id), Some(InstanceState::Live));
        assert_eq!(cat.record_probe(InstanceId(999), true), None);
    }

    #[test]
    fn deregister_sweeps_other_invalid_instances_too() {
        let (cat, clock) = catalogue();
        let old = cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap().instance.id;
        clock.advance(Duration::from_secs(181));
        let fresh = cat.upsert(&kv(), "10.0.0.6", 9000, &[ApiType::Tcp]).unwrap().instance.id;

        let evicted = cat.deregister(fresh).unwrap();
        let mut reasons: Vec<_> = evicted.iter().map(|e| (e.instance.id, e.reason)).collect();
        reasons.sort_by_key(|(id, _)| *id);
        assert_eq!(reasons, vec![(old, EvictionReason::Stale), (fresh, EvictionReason::Disabled)]);
    }

    #[test]
    fn reregistration_after_deregister_gets_fresh_id() {
        let (cat, _) = catalogue();
        let first = cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap();
        cat.deregister(first.instance.id).unwrap();

        let second = cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap();
        assert!(second.created);
        assert_eq!(cat.state_of(second.instance.id), Some(InstanceState::Live));
    }

    #[test]
    fn deregister_ports_spans_services() {
        let (cat, _) = catalogue();
        cat.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap();
        cat.upsert(&ServiceDescription::new("web"), "10.0.0.5", 9001, &[ApiType::Html]).unwrap();
        cat.upsert(&ServiceDescription::new("web"), "10.0.0.6", 9001, &[ApiType::Html]).unwrap();

        let evicted = cat.deregister_ports("10.0.0.5", &[9000, 9001]);
        assert_eq!(evicted.len(), 2);
        assert!(cat.deregister_ports("10.0.0.9", &[9000]).is_empty());
        let remaining = cat.list(None);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].instances[0].address.host, "10.0.0.6");
    }

    #[test]
    fn scrape_targets_group_by_short_name() {
        let (cat, _) = catalogue();
        let a = ServiceDescription::new("kv.KeyValueService");
        let b = ServiceDescription::new("kv.Admin");
        cat.upsert(&a, "10.0.0.5", 9000, &[ApiType::Status, ApiType::Grpc]).unwrap();
        cat.upsert(&b, "10.0.0.6", 9000, &[ApiType::Status]).unwrap();
        cat.upsert(&ServiceDescription::new("raw"), "10.0.0.7", 7000, &[ApiType::Tcp]).unwrap();

        assert_eq!(
            cat.scrape_targets(),
            vec![ScrapeTarget {
                name: "kv".into(),
                addresses: vec!["10.0.0.5:9000".into(), "10.0.0.6:9000".into()],
            }]
        );
    }

    #[test]
    fn independent_catalogues_do_not_share_state() {
        let (a, _) = catalogue();
        let (b, _) = catalogue();
        a.upsert(&kv(), "10.0.0.5", 9000, &[]).unwrap();
        assert_eq!(a.instance_count(), 1);
        assert_eq!(b.instance_count(), 0);
        assert_eq!(b.upsert(&kv(), "10.0.0.5", 9000, &[]).unwrap().instance.id, InstanceId(1));
    }
}
