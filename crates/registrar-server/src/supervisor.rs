//! Periodic liveness verification and eviction.

use futures::future::join_all;
use registrar_core::{Catalogue, Eviction};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::prober::{InstanceProber, ProbeError};
use crate::projection::TargetProjection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub period: Duration,
    pub probe_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
pub struct PassReport {
    pub probed: usize,
    pub failed: usize,
    pub evicted: Vec<Eviction>,
}

/// Feed removals into `registrar_evictions_total`, labelled by reason.
pub fn count_evictions(evictions: &[Eviction]) {
    for eviction in evictions {
        metrics::counter!("registrar_evictions_total", "reason" => eviction.reason.as_str()).increment(1);
    }
}

#[derive(Clone)]
pub struct Supervisor {
    catalogue: Arc<Catalogue>,
    prober: Arc<dyn InstanceProber>,
    projection: Arc<dyn TargetProjection>,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        catalogue: Arc<Catalogue>,
        prober: Arc<dyn InstanceProber>,
        projection: Arc<dyn TargetProjection>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            catalogue,
            prober,
            projection,
            config,
        }
    }

    /// Probe every status-capable instance once, then sweep.
    pub async fn run_pass(&self) -> PassReport {
        let candidates = self.catalogue.probe_candidates();
        let timeout = self.config.probe_timeout;
        let outcomes = join_all(candidates.iter().map(|target| async move {
            tokio::time::timeout(timeout, self.prober.probe(target))
                .await
                .unwrap_or(Err(ProbeError::Timeout(timeout)))
        }))
        .await;

        let mut report = PassReport {
            probed: candidates.len(),
            ..PassReport::default()
        };
        for (target, outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    self.catalogue.record_probe(target.id, true);
                }
                Err(err) => {
                    report.failed += 1;
                    metrics::counter!("registrar_probe_failures_total").increment(1);
                    if let Some(failures) = self.catalogue.record_probe(target.id, false) {
                        warn!(
                            service = %target.service_name,
                            address = %target.address,
                            failures,
                            error = %err,
                            "Probe failed"
                        );
                    }
                }
            }
        }

        report.evicted = self.catalogue.sweep();
        count_evictions(&report.evicted);
        if !report.evicted.is_empty() {
            self.projection.refresh(&self.catalogue);
        }
        metrics::gauge!("registrar_instances").set(self.catalogue.instance_count() as f64);
        report
    }

    /// Run passes every `config.period` until `stop` turns true or its
    /// sender goes away.
    pub fn spawn(self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(period = ?self.config.period, "Health supervisor started");
            let mut interval = tokio::time::interval(self.config.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_pass().await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Health supervisor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use registrar_core::time::ManualClock;
    use registrar_core::{
        ApiType, EvictionReason, HealthPolicy, InstanceState, ProbeTarget, ServiceAddress,
        ServiceDescription,
    };
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every probe for addresses in `failing`; hangs for `hanging`.
    #[derive(Default)]
    struct ScriptedProber {
        failing: Mutex<HashSet<ServiceAddress>>,
        hanging: Mutex<HashSet<ServiceAddress>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InstanceProber for ScriptedProber {
        async fn probe(&self, target: &ProbeTarget) -> Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let hangs = self.hanging.lock().contains(&target.address);
            if hangs {
                std::future::pending::<()>().await;
            }
            let fails = self.failing.lock().contains(&target.address);
            if fails {
                return Err(ProbeError::NameMismatch {
                    expected: target.service_name.clone(),
                    reported: "other".into(),
                });
            }
            Ok(())
        }

        async fn request_shutdown(&self, _address: &ServiceAddress) -> Result<(), ProbeError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingProjection(AtomicUsize);

    impl TargetProjection for CountingProjection {
        fn refresh(&self, _catalogue: &Catalogue) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        catalogue: Arc<Catalogue>,
        clock: Arc<ManualClock>,
        prober: Arc<ScriptedProber>,
        projection: Arc<CountingProjection>,
        supervisor: Supervisor,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(5_000_000));
        let catalogue = Arc::new(Catalogue::with_clock(HealthPolicy::default(), clock.clone()));
        let prober = Arc::new(ScriptedProber::default());
        let projection = Arc::new(CountingProjection::default());
        let supervisor = Supervisor::new(
            catalogue.clone(),
            prober.clone(),
            projection.clone(),
            SupervisorConfig {
                period: Duration::from_millis(10),
                probe_timeout: Duration::from_millis(50),
            },
        );
        Fixture {
            catalogue,
            clock,
            prober,
            projection,
            supervisor,
        }
    }

    fn kv() -> ServiceDescription {
        ServiceDescription::new("kv").with_deploy_path("ns/g/kv/7")
    }

    #[tokio::test]
    async fn only_status_capable_instances_are_probed() {
        let f = fixture();
        f.catalogue.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Status, ApiType::Tcp]).unwrap();
        f.catalogue.upsert(&kv(), "10.0.0.6", 9000, &[ApiType::Tcp]).unwrap();

        let report = f.supervisor.run_pass().await;
        assert_eq!(report.probed, 1);
        assert_eq!(f.prober.calls.load(Ordering::SeqCst), 1);
        assert!(report.evicted.is_empty());
        assert_eq!(f.projection.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn eviction_after_exceeding_max_failures() {
        let f = fixture();
        let id = f.catalogue.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Status]).unwrap().instance.id;
        f.prober.failing.lock().insert(ServiceAddress::new("10.0.0.5", 9000));

        for pass in 1..=10 {
            let report = f.supervisor.run_pass().await;
            assert!(report.evicted.is_empty(), "evicted early on pass {pass}");
        }
        assert_eq!(f.catalogue.state_of(id), Some(InstanceState::Suspect));

        let report = f.supervisor.run_pass().await;
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.evicted[0].reason, EvictionReason::ExcessiveFailures);
        assert!(f.catalogue.list(None).is_empty());
        assert_eq!(f.projection.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_failure_does_not_evict() {
        let f = fixture();
        f.catalogue.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Status]).unwrap();
        f.prober.failing.lock().insert(ServiceAddress::new("10.0.0.5", 9000));

        let report = f.supervisor.run_pass().await;
        assert_eq!(report.failed, 1);
        assert!(report.evicted.is_empty());
        assert_eq!(f.catalogue.list(None).len(), 1);
    }

    #[tokio::test]
    async fn failing_instance_evicted_by_success_window_before_threshold() {
        let f = fixture();
        f.catalogue.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Status]).unwrap();
        f.prober.failing.lock().insert(ServiceAddress::new("10.0.0.5", 9000));

        f.supervisor.run_pass().await;
        f.clock.advance(Duration::from_secs(31));
        let report = f.supervisor.run_pass().await;
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.evicted[0].reason, EvictionReason::NoRecentSuccess);
    }

    #[tokio::test]
    async fn stale_non_probe_instance_evicted() {
        let f = fixture();
        f.catalogue.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap();
        f.clock.advance(Duration::from_secs(181));

        let report = f.supervisor.run_pass().await;
        assert_eq!(report.probed, 0);
        assert_eq!(report.evicted.len(), 1);
        assert_eq!(report.evicted[0].reason, EvictionReason::Stale);
    }

    #[tokio::test]
    async fn hanging_probe_times_out_and_counts_as_failure() {
        let f = fixture();
        let slow = f.catalogue.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Status]).unwrap().instance.id;
        let fast = f.catalogue.upsert(&kv(), "10.0.0.6", 9000, &[ApiType::Status]).unwrap().instance.id;
        f.prober.hanging.lock().insert(ServiceAddress::new("10.0.0.5", 9000));

        let report = f.supervisor.run_pass().await;
        assert_eq!(report.failed, 1);
        assert_eq!(f.catalogue.state_of(slow), Some(InstanceState::Suspect));
        assert_eq!(f.catalogue.state_of(fast), Some(InstanceState::Live));
    }

    #[tokio::test]
    async fn spawned_loop_stops_on_signal() {
        let f = fixture();
        f.catalogue.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Status]).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = f.supervisor.clone().spawn(stop_rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(f.prober.calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn evictions_are_counted_by_reason() {
        let f = fixture();
        let gone = f.catalogue.upsert(&kv(), "10.0.0.5", 9000, &[ApiType::Tcp]).unwrap().instance.id;
        f.clock.advance(Duration::from_secs(181));
        let kept = f.catalogue.upsert(&kv(), "10.0.0.6", 9000, &[ApiType::Tcp]).unwrap().instance.id;
        let evicted = f.catalogue.deregister(kept).unwrap();
        assert!(evicted.iter().any(|e| e.instance.id == gone));

        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || count_evictions(&evicted));

        let rendered = handle.render();
        assert!(rendered.contains("registrar_evictions_total{reason=\"stale\"} 1"), "{rendered}");
        assert!(rendered.contains("registrar_evictions_total{reason=\"disabled\"} 1"), "{rendered}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_get_unique_ids_during_passes() {
        let f = fixture();
        let mut tasks = Vec::new();
        for worker in 0..8u8 {
            let catalogue = f.catalogue.clone();
            tasks.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for port in 0..50u16 {
                    let host = format!("10.0.{worker}.1");
                    let up = catalogue.upsert(&kv(), &host, 9000 + port, &[ApiType::Status]).unwrap();
                    ids.push(up.instance.id);
                    tokio::task::yield_now().await;
                }
                ids
            }));
        }
        let passes = {
            let supervisor = f.supervisor.clone();
            tokio::spawn(async move {
                for _ in 0..10 {
                    supervisor.run_pass().await;
                }
            })
        };

        let mut ids = HashSet::new();
        for task in tasks {
            for id in task.await.unwrap() {
                assert!(ids.insert(id), "duplicate instance id {id}");
            }
        }
        passes.await.unwrap();
        assert_eq!(ids.len(), 400);
        assert_eq!(f.catalogue.instance_count(), 400);
    }
}
