use axum::{
    extract::{ConnectInfo, State},
    Json,
};
use futures::future::join_all;
use registrar_core::{InstanceId, RegistryError, ServiceDescription, TargetQuery};
use registrar_wire::{
    DeregisterRequest, Empty, ErrorBody, GetServiceAddressRequest, GetTargetRequest, InstanceAddress,
    ListRequest, ListResponse, ProcessShutdownRequest, RegisterRequest, RegisterResponse,
    RegisteredAddress, ServiceAddressResponse, ServiceListing, ShutdownRequest,
};
use std::net::{IpAddr, SocketAddr};
use tracing::{info, warn};

use crate::address::resolve_host;
use crate::app::AppState;
use crate::error::ApiError;
use crate::prober::ProbeError;
use crate::supervisor::count_evictions;

fn peer_ip(peer: Option<ConnectInfo<SocketAddr>>) -> Option<IpAddr> {
    peer.map(|ConnectInfo(addr)| addr.ip().to_canonical())
}

#[utoipa::path(
    post,
    path = "/api/registry/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Registered (or refreshed)", body = RegisterResponse),
        (status = 400, description = "Missing name or address", body = ErrorBody),
        (status = 422, description = "Address could not be determined", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn register(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let peer = peer_ip(peer);
    if req.addresses.is_empty() {
        warn!(?peer, "Invalid registration (missing address)");
        return Err(RegistryError::MissingAddress.into());
    }
    if req.service.name.is_empty() {
        warn!(?peer, "Invalid registration (missing service name)");
        return Err(RegistryError::MissingName.into());
    }
    if req.service.deploy_path().is_none() {
        warn!(?peer, service = %req.service.name, "No deployment path in registration request");
    }

    // Resolve every host before touching the catalogue so a bad address
    // rejects the whole request.
    let hosts = req
        .addresses
        .iter()
        .map(|spec| resolve_host(&spec.host, peer, state.local_ip))
        .collect::<Result<Vec<_>, _>>()?;

    let mut response = RegisterResponse {
        instance_id: InstanceId(0),
        addresses: Vec::with_capacity(hosts.len()),
    };
    let mut created = false;
    for (spec, host) in req.addresses.iter().zip(hosts) {
        let upserted = state.catalogue.upsert(&req.service, &host, spec.port, &spec.api_types)?;
        created |= upserted.created;
        response.instance_id = upserted.instance.id;
        response.addresses.push(RegisteredAddress { host, port: spec.port });
    }

    if created {
        metrics::counter!("registrar_registrations_total").increment(1);
        state.refresh_targets();
    }
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/registry/deregister",
    request_body = DeregisterRequest,
    responses(
        (status = 200, description = "Deregistered", body = Empty),
        (status = 404, description = "No such instance", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn deregister(
    State(state): State<AppState>,
    Json(req): Json<DeregisterRequest>,
) -> Result<Json<Empty>, ApiError> {
    let evicted = state.catalogue.deregister(req.instance_id)?;
    info!(instance = %req.instance_id, removed = evicted.len(), "Deregistered instance");
    count_evictions(&evicted);
    state.refresh_targets();
    Ok(Json(Empty {}))
}

#[utoipa::path(
    post,
    path = "/api/registry/list",
    request_body = ListRequest,
    responses((status = 200, description = "Services with at least one live instance", body = ListResponse)),
    security(("api_jwt" = []))
)]
pub async fn list(
    State(state): State<AppState>,
    Json(req): Json<ListRequest>,
) -> Json<ListResponse> {
    let name = (!req.name.is_empty()).then_some(req.name.as_str());
    Json(state.catalogue.list(name).into())
}

#[utoipa::path(
    post,
    path = "/api/registry/target",
    request_body = GetTargetRequest,
    responses((status = 200, description = "Matching instances; empty when none match", body = ListResponse)),
    security(("api_jwt" = []))
)]
pub async fn get_target(
    State(state): State<AppState>,
    Json(req): Json<GetTargetRequest>,
) -> Json<ListResponse> {
    let query = TargetQuery::new(req.api_type)
        .deploy_path(req.deploy_path)
        .name(req.name);
    Json(state.catalogue.get_target(&query).into())
}

#[utoipa::path(
    post,
    path = "/api/registry/lookup",
    request_body = GetServiceAddressRequest,
    responses(
        (status = 200, description = "Every live address of the service", body = ServiceAddressResponse),
        (status = 404, description = "Service not registered", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn lookup(
    State(state): State<AppState>,
    Json(req): Json<GetServiceAddressRequest>,
) -> Result<Json<ServiceAddressResponse>, ApiError> {
    let entries = state.catalogue.find(&req.service);
    let addresses: Vec<InstanceAddress> = entries
        .iter()
        .flat_map(|e| ServiceListing::from(e).addresses)
        .collect();
    let Some(first) = entries.into_iter().next().filter(|_| !addresses.is_empty()) else {
        return Err(RegistryError::ServiceNotFound(req.service.name).into());
    };
    Ok(Json(ServiceAddressResponse {
        service: first.description,
        addresses,
    }))
}

#[utoipa::path(
    post,
    path = "/api/registry/shutdown",
    request_body = ShutdownRequest,
    responses(
        (status = 200, description = "Shutdown requested from every instance", body = Empty),
        (status = 404, description = "Service not registered", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn shutdown(
    State(state): State<AppState>,
    Json(req): Json<ShutdownRequest>,
) -> Result<Json<Empty>, ApiError> {
    let entries = state.catalogue.find(&ServiceDescription::new(&req.service_name));
    if entries.is_empty() {
        return Err(RegistryError::ServiceNotFound(req.service_name).into());
    }

    let instances: Vec<_> = entries.into_iter().flat_map(|e| e.instances).collect();
    let timeout = state.notify_timeout;
    let outcomes = join_all(instances.iter().map(|instance| {
        let prober = state.prober.clone();
        async move {
            tokio::time::timeout(timeout, prober.request_shutdown(&instance.address))
                .await
                .unwrap_or(Err(ProbeError::Timeout(timeout)))
        }
    }))
    .await;

    for (instance, outcome) in instances.iter().zip(outcomes) {
        match outcome {
            Ok(()) => info!(service = %req.service_name, %instance, "Asked instance to shut down"),
            Err(err) => warn!(service = %req.service_name, %instance, error = %err, "Failed to shutdown"),
        }
    }
    Ok(Json(Empty {}))
}

#[utoipa::path(
    post,
    path = "/api/registry/process-shutdown",
    request_body = ProcessShutdownRequest,
    responses(
        (status = 200, description = "Ports disabled", body = Empty),
        (status = 422, description = "Caller address could not be determined", body = ErrorBody)
    ),
    security(("api_jwt" = []))
)]
pub async fn process_shutdown(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<ProcessShutdownRequest>,
) -> Result<Json<Empty>, ApiError> {
    let announced = req.host.unwrap_or_default();
    let host = resolve_host(&announced, peer_ip(peer), state.local_ip)?;

    let evicted = state.catalogue.deregister_ports(&host, &req.ports);
    if !evicted.is_empty() {
        info!(%host, ports = ?req.ports, removed = evicted.len(), "Process shut down");
        count_evictions(&evicted);
        state.refresh_targets();
    }
    Ok(Json(Empty {}))
}
