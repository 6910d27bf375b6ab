mod address;
mod app;
mod config;
mod error;
mod handlers;
mod prober;
mod projection;
mod supervisor;

use axum::routing::get;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use registrar_core::Catalogue;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::AppState;
use crate::config::Config;
use crate::prober::HttpsProber;
use crate::projection::{NoProjection, ScrapeFileWriter, TargetProjection};
use crate::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).ok();

    let catalogue = Arc::new(Catalogue::new(config.policy()));
    let supervisor_config = config.supervisor();
    let prober = Arc::new(HttpsProber::new(supervisor_config.probe_timeout)?);
    let projection: Arc<dyn TargetProjection> = match &config.prometheus_targets {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "Maintaining prometheus targets");
            Arc::new(
                ScrapeFileWriter::new(dir).with_config(
                    config.prometheus_config_template.clone(),
                    config.prometheus_config_file.clone(),
                ),
            )
        }
        None => Arc::new(NoProjection),
    };

    let local_ip = config.local_ip.or_else(address::detect_local_ip);
    match local_ip {
        Some(ip) => tracing::info!(%ip, "Loopback registrations will be published as this address"),
        None => tracing::warn!("No local address found; loopback registrations will be refused"),
    }

    let state = AppState {
        catalogue: catalogue.clone(),
        prober: prober.clone(),
        projection: projection.clone(),
        local_ip,
        jwt_secret: config.jwt_secret.clone(),
        notify_timeout: supervisor_config.probe_timeout,
    };
    if state.jwt_secret.is_none() {
        tracing::warn!("No JWT secret configured; registry API is unauthenticated");
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let worker = Supervisor::new(catalogue, prober, projection, supervisor_config).spawn(stop_rx);

    let app = app::router(state).route("/metrics", get(move || {
        let rendered = handle.render();
        async move { rendered }
    }));
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    let addr = config.listen_addr();
    let served = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await?;
            let server_handle = axum_server::Handle::new();
            tokio::spawn({
                let server_handle = server_handle.clone();
                async move {
                    shutdown_signal().await;
                    server_handle.graceful_shutdown(Some(Duration::from_secs(5)));
                }
            });
            tracing::info!("listening on https://{}", addr);
            axum_server::bind_rustls(addr, tls)
                .handle(server_handle)
                .serve(make_service)
                .await
                .map_err(|e| e.to_string())
        }
        _ => {
            tracing::info!("listening on http://{}", addr);
            axum::Server::try_bind(&addr)?
                .serve(make_service)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| e.to_string())
        }
    };

    let _ = stop_tx.send(true);
    let _ = worker.await;

    if let Err(e) = served {
        tracing::error!("server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
