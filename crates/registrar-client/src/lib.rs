//! Client for the registry API.
//!
//! ```rust,ignore
//! let client = RegistryClient::new("registry.internal")?;
//! let targets = client
//!     .get_target(&GetTargetRequest { deploy_path: "acme/web/api".into(), name: String::new(), api_type: ApiType::Tcp })
//!     .await?;
//! ```

mod keepalive;

pub use keepalive::{KeepAlive, DEFAULT_REFRESH};

use registrar_core::{InstanceId, ServiceDescription};
use registrar_wire::{
    DeregisterRequest, Empty, ErrorBody, GetServiceAddressRequest, GetTargetRequest, ListRequest,
    ListResponse, ProcessShutdownRequest, RegisterRequest, RegisterResponse, ServiceAddressResponse,
    ShutdownRequest,
};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("registry unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry returned {status}: {message}")]
    Api { status: StatusCode, message: String },
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

/// Normalise a registry address: a bare host gets the default port, and a
/// missing scheme becomes `http://`.
pub fn registry_url(addr: &str) -> String {
    if addr.contains("://") {
        return addr.trim_end_matches('/').to_string();
    }
    if addr.contains(':') {
        format!("http://{addr}")
    } else {
        format!("http://{addr}:{DEFAULT_PORT}")
    }
}

#[derive(Clone)]
pub struct RegistryClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RegistryClient {
    pub fn new(addr: &str) -> Result<Self, ClientError> {
        Self::with_timeout(addr, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(addr: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: registry_url(addr),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    async fn call<T: Serialize, R: DeserializeOwned>(&self, op: &str, body: &T) -> Result<R, ClientError> {
        let url = format!("{}/api/registry/{}", self.base_url, op);
        let mut builder = self.client.post(&url).json(body);
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }

        let res = builder.send().await?;
        let status = res.status();
        if status.is_success() {
            return Ok(res.json().await?);
        }
        let text = res.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(ClientError::Api { status, message })
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        self.call("register", request).await
    }

    pub async fn deregister(&self, instance_id: InstanceId) -> Result<(), ClientError> {
        let _: Empty = self.call("deregister", &DeregisterRequest { instance_id }).await?;
        Ok(())
    }

    /// Empty `name` lists every service.
    pub async fn list(&self, name: &str) -> Result<ListResponse, ClientError> {
        self.call("list", &ListRequest { name: name.to_string() }).await
    }

    pub async fn get_target(&self, request: &GetTargetRequest) -> Result<ListResponse, ClientError> {
        self.call("target", request).await
    }

    pub async fn lookup(&self, service: &ServiceDescription) -> Result<ServiceAddressResponse, ClientError> {
        let request = GetServiceAddressRequest { service: service.clone() };
        self.call("lookup", &request).await
    }

    pub async fn shutdown(&self, service_name: &str) -> Result<(), ClientError> {
        let request = ShutdownRequest { service_name: service_name.to_string() };
        let _: Empty = self.call("shutdown", &request).await?;
        Ok(())
    }

    /// Tell the registry this process is going away; every instance it
    /// registered on `ports` is dropped.
    pub async fn process_shutdown(&self, host: Option<String>, ports: Vec<u16>) -> Result<(), ClientError> {
        let _: Empty = self.call("process-shutdown", &ProcessShutdownRequest { host, ports }).await?;
        Ok(())
    }
}
