use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use registrar_core::{Catalogue, Claims, Permission};
use std::{net::IpAddr, sync::Arc, time::Duration};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;
use crate::prober::InstanceProber;
use crate::projection::TargetProjection;

#[derive(Clone)]
pub struct AppState {
    pub catalogue: Arc<Catalogue>,
    pub prober: Arc<dyn InstanceProber>,
    pub projection: Arc<dyn TargetProjection>,
    /// Published in place of loopback registrations.
    pub local_ip: Option<IpAddr>,
    pub jwt_secret: Option<String>,
    pub notify_timeout: Duration,
}

impl AppState {
    pub fn refresh_targets(&self) {
        self.projection.refresh(&self.catalogue);
        metrics::gauge!("registrar_instances").set(self.catalogue.instance_count() as f64);
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register,
        handlers::deregister,
        handlers::list,
        handlers::get_target,
        handlers::lookup,
        handlers::shutdown,
        handlers::process_shutdown,
        health_check,
    ),
    components(
        schemas(
            registrar_wire::AddressSpec,
            registrar_wire::RegisterRequest,
            registrar_wire::RegisterResponse,
            registrar_wire::RegisteredAddress,
            registrar_wire::DeregisterRequest,
            registrar_wire::ListRequest,
            registrar_wire::ListResponse,
            registrar_wire::ServiceListing,
            registrar_wire::InstanceAddress,
            registrar_wire::GetTargetRequest,
            registrar_wire::GetServiceAddressRequest,
            registrar_wire::ServiceAddressResponse,
            registrar_wire::ShutdownRequest,
            registrar_wire::ProcessShutdownRequest,
            registrar_wire::Empty,
            registrar_wire::ErrorBody,
            registrar_core::ApiType,
            registrar_core::ServiceDescription,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_jwt",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build()
                ),
            )
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_check))
        .route("/api/registry/register", post(handlers::register))
        .route("/api/registry/deregister", post(handlers::deregister))
        .route("/api/registry/list", post(handlers::list))
        .route("/api/registry/target", post(handlers::get_target))
        .route("/api/registry/lookup", post(handlers::lookup))
        .route("/api/registry/shutdown", post(handlers::shutdown))
        .route("/api/registry/process-shutdown", post(handlers::process_shutdown))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "OK"))
)]
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK").into_response()
}

fn required_permission(path: &str) -> Option<Permission> {
    match path.strip_prefix("/api/registry/")? {
        "register" | "deregister" | "process-shutdown" => Some(Permission::ServiceRegister),
        "shutdown" => Some(Permission::ServiceShutdown),
        _ => Some(Permission::ServiceRead),
    }
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<Response, StatusCode> {
    let (Some(secret), Some(permission)) = (state.jwt_secret.as_deref(), required_permission(req.uri().path())) else {
        return Ok(next.run(req).await);
    };

    let token = req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = Claims::verify(token, secret).map_err(|_| StatusCode::UNAUTHORIZED)?;
    if !claims.allows(&permission) {
        tracing::warn!(subject = %claims.sub, ?permission, "Insufficient permissions");
        return Err(StatusCode::FORBIDDEN);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
