//! Outbound calls to registered instances.

use async_trait::async_trait;
use registrar_core::{ProbeTarget, ServiceAddress};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Answers with the plain-text service name.
pub const NAME_PATH: &str = "/internal/service-info/name";
pub const SHUTDOWN_PATH: &str = "/internal/pleaseshutdown";

const MAX_IDLE_PER_HOST: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("service name mismatch: expected \"{expected}\", reported \"{reported}\"")]
    NameMismatch { expected: String, reported: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait InstanceProber: Send + Sync {
    /// Succeeds if the instance reports the service name it registered under.
    async fn probe(&self, target: &ProbeTarget) -> Result<(), ProbeError>;

    /// Ask the instance to terminate. Best effort.
    async fn request_shutdown(&self, address: &ServiceAddress) -> Result<(), ProbeError>;
}

/// Probes over HTTPS without certificate validation; the probe channel is
/// trusted by network position, not PKI.
pub struct HttpsProber {
    client: Client,
    scheme: &'static str,
}

impl HttpsProber {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Self::with_scheme("https", timeout)
    }

    pub fn with_scheme(scheme: &'static str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .pool_idle_timeout(timeout)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .build()?;
        Ok(Self { client, scheme })
    }

    fn url(&self, address: &ServiceAddress, path: &str) -> String {
        if address.host.contains(':') {
            format!("{}://[{}]:{}{}", self.scheme, address.host, address.port, path)
        } else {
            format!("{}://{}:{}{}", self.scheme, address.host, address.port, path)
        }
    }
}

#[async_trait]
impl InstanceProber for HttpsProber {
    async fn probe(&self, target: &ProbeTarget) -> Result<(), ProbeError> {
        let res = self.client.get(self.url(&target.address, NAME_PATH)).send().await?;
        if !res.status().is_success() {
            return Err(ProbeError::Status(res.status()));
        }
        let reported = res.text().await?;
        if reported != target.service_name {
            return Err(ProbeError::NameMismatch {
                expected: target.service_name.clone(),
                reported,
            });
        }
        Ok(())
    }

    async fn request_shutdown(&self, address: &ServiceAddress) -> Result<(), ProbeError> {
        let res = self.client.get(self.url(address, SHUTDOWN_PATH)).send().await?;
        tracing::debug!(%address, status = %res.status(), "Shutdown requested");
        Ok(())
    }
}
