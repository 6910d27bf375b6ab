use registrar_core::InstanceId;
use registrar_wire::RegisterRequest;
use std::{sync::Arc, time::Duration};
use tokio::{sync::{watch, Mutex}, task::JoinHandle, time::MissedTickBehavior};

use crate::{ClientError, RegistryClient};

pub const DEFAULT_REFRESH: Duration = Duration::from_secs(10);

struct Registration {
    request: RegisterRequest,
    instance_id: Option<InstanceId>,
}

/// Keeps a set of registrations fresh by re-announcing them on an interval.
///
/// The registry treats a repeated registration of the same address as a
/// refresh, so this is all a service needs to do to stay listed.
pub struct KeepAlive {
    client: RegistryClient,
    registrations: Mutex<Vec<Registration>>,
    refresh: Duration,
}

impl KeepAlive {
    pub fn new(client: RegistryClient, requests: Vec<RegisterRequest>) -> Self {
        let registrations = requests
            .into_iter()
            .map(|request| Registration { request, instance_id: None })
            .collect();
        Self {
            client,
            registrations: Mutex::new(registrations),
            refresh: DEFAULT_REFRESH,
        }
    }

    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = refresh;
        self
    }

    /// Register everything once. Returns how many registrations succeeded.
    pub async fn register_all(&self) -> usize {
        let requests: Vec<RegisterRequest> = self
            .registrations
            .lock()
            .await
            .iter()
            .map(|r| r.request.clone())
            .collect();

        let mut ids = Vec::with_capacity(requests.len());
        for request in &requests {
            match self.client.register(request).await {
                Ok(response) => ids.push(Some(response.instance_id)),
                Err(e) => {
                    tracing::warn!(service = %request.service, "Registration failed: {}", e);
                    ids.push(None);
                }
            }
        }

        let succeeded = ids.iter().filter(|id| id.is_some()).count();
        let mut registrations = self.registrations.lock().await;
        for (registration, id) in registrations.iter_mut().zip(ids) {
            if id.is_some() {
                registration.instance_id = id;
            }
        }
        succeeded
    }

    pub async fn instance_ids(&self) -> Vec<InstanceId> {
        self.registrations
            .lock()
            .await
            .iter()
            .filter_map(|r| r.instance_id)
            .collect()
    }

    /// Re-register on the refresh interval until `stop` flips to true.
    pub fn spawn(self: Arc<Self>, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.refresh);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.register_all().await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Deregister every instance this keep-alive has obtained an id for.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let ids: Vec<InstanceId> = {
            let mut registrations = self.registrations.lock().await;
            registrations.iter_mut().filter_map(|r| r.instance_id.take()).collect()
        };

        let mut first_error = None;
        for id in ids {
            match self.client.deregister(id).await {
                Ok(()) => tracing::info!(instance = %id, "Deregistered"),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!(instance = %id, "Deregistration failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
