use clap::Parser;
use registrar_core::HealthPolicy;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::supervisor::SupervisorConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "registrar-server")]
#[command(about = "Service registry with active health supervision", long_about = None)]
pub struct Config {
    #[arg(long, env = "REGISTRAR_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    #[arg(long, env = "REGISTRAR_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Seconds between health supervisor passes
    #[arg(long, env = "REGISTRAR_KEEPALIVE", default_value_t = 2)]
    pub keepalive: u64,

    /// Consecutive probe failures tolerated before eviction
    #[arg(long, env = "REGISTRAR_MAX_FAILURES", default_value_t = 10)]
    pub max_failures: u32,

    /// Seconds an instance may go without re-registering
    #[arg(long, env = "REGISTRAR_MAX_AGE", default_value_t = 180)]
    pub max_age: u64,

    /// Seconds a status-capable instance may go without a successful probe
    #[arg(long, env = "REGISTRAR_SUCCESS_WINDOW", default_value_t = 30)]
    pub success_window: u64,

    #[arg(long, env = "REGISTRAR_PROBE_TIMEOUT", default_value_t = 5)]
    pub probe_timeout: u64,

    /// Address published in place of loopback registrations (detected if unset)
    #[arg(long, env = "REGISTRAR_LOCAL_IP")]
    pub local_ip: Option<IpAddr>,

    /// Enables bearer-token authentication when set
    #[arg(long, env = "REGISTRAR_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    #[arg(long, env = "REGISTRAR_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "REGISTRAR_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Directory to maintain prometheus file-SD targets in
    #[arg(long, env = "REGISTRAR_PROMETHEUS_TARGETS")]
    pub prometheus_targets: Option<PathBuf>,

    /// Prefix for the generated prometheus config
    #[arg(long, env = "REGISTRAR_PROMETHEUS_CONFIG_TEMPLATE")]
    pub prometheus_config_template: Option<PathBuf>,

    #[arg(long, env = "REGISTRAR_PROMETHEUS_CONFIG_FILE")]
    pub prometheus_config_file: Option<PathBuf>,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn policy(&self) -> HealthPolicy {
        HealthPolicy {
            max_age: Duration::from_secs(self.max_age),
            max_failures: self.max_failures,
            success_window: Duration::from_secs(self.success_window),
        }
    }

    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            period: Duration::from_secs(self.keepalive.max(1)),
            probe_timeout: Duration::from_secs(self.probe_timeout),
        }
    }
}
