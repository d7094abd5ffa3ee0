mod actor;
mod settings;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use vg_api_types::{ChainId, ConnectionEvent, ProviderInfo, ViewState};
use vg_connect_core::ConnectError;
use vg_provider::ProviderError;
use vg_storage::RocksDbStore;

use crate::actor::{AllowedNetwork, ControllerHandle, NetworkEntry, SessionSnapshot};
use crate::settings::Settings;

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

/// Error body. Provider rejections keep the wallet's code and data.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectResponse {
    accounts: Vec<String>,
    chain_id: ChainId,
    raw_chain_id: String,
    provider_name: String,
}

#[derive(Debug, Deserialize)]
struct SwitchNetworkRequest {
    network: String,
}

#[derive(Debug, Serialize)]
struct SwitchNetworkResponse {
    network: String,
    switched: bool,
}

#[derive(Debug, Deserialize)]
struct VisibilityRequest {
    network: String,
    visible: bool,
}

#[derive(Debug, Serialize)]
struct VisibilityResponse {
    network: String,
    visible: bool,
}

#[derive(Debug, Deserialize)]
struct RpcOverrideRequest {
    network: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcOverrideResponse {
    network: String,
    rpc_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AllowedQuery {
    chain_id: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Clone)]
struct AppState {
    controller: ControllerHandle,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Settings::from_env()?;
    let networks = settings.load_networks()?;

    std::fs::create_dir_all(&settings.store_path)
        .with_context(|| format!("failed to create {}", settings.store_path))?;
    let store = RocksDbStore::open_default(&settings.store_path)?;

    let controller = actor::spawn(networks, store, settings.rpc_wallets.clone())?;
    let app = build_router(AppState { controller });

    info!("connect-service listening on {}", settings.bind_addr);
    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/providers", get(providers))
        .route("/providers/request", post(request_providers))
        .route("/networks", get(networks))
        .route("/session", get(session))
        .route("/view", get(view))
        .route("/events", get(events))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/network/switch", post(switch_network))
        .route("/network/visibility", post(network_visibility))
        .route("/network/rpc", post(network_rpc))
        .route("/network/allowed", get(network_allowed))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "connect-service",
        status: "ok",
    })
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        service: "connect-service",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn providers(State(state): State<AppState>) -> ApiResult<Vec<ProviderInfo>> {
    let providers = state.controller.providers().await.map_err(internal_error)?;
    Ok(Json(providers))
}

async fn request_providers(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .controller
        .request_providers()
        .await
        .map_err(internal_error)?;
    Ok(StatusCode::ACCEPTED)
}

async fn networks(State(state): State<AppState>) -> ApiResult<Vec<NetworkEntry>> {
    let networks = state.controller.networks().await.map_err(internal_error)?;
    Ok(Json(networks))
}

async fn session(State(state): State<AppState>) -> ApiResult<SessionSnapshot> {
    let session = state.controller.session().await.map_err(internal_error)?;
    Ok(Json(session))
}

async fn view(State(state): State<AppState>) -> ApiResult<ViewState> {
    let view = state.controller.view().await.map_err(internal_error)?;
    Ok(Json(view))
}

async fn events(State(state): State<AppState>) -> ApiResult<Vec<ConnectionEvent>> {
    let events = state.controller.events().await.map_err(internal_error)?;
    Ok(Json(events))
}

async fn connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<ConnectResponse> {
    let name = request.name.trim().to_owned();
    if name.is_empty() {
        return Err(bad_request("name is required"));
    }

    let outcome = state
        .controller
        .connect(name.clone())
        .await
        .map_err(internal_error)?
        .map_err(connect_error)?
        .ok_or_else(|| not_found(&format!("wallet provider `{name}` is not registered")))?;

    Ok(Json(ConnectResponse {
        accounts: outcome.accounts,
        chain_id: outcome.chain_id,
        raw_chain_id: outcome.raw_chain_id,
        provider_name: outcome.provider_name,
    }))
}

async fn disconnect(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.controller.disconnect().await.map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn switch_network(
    State(state): State<AppState>,
    Json(request): Json<SwitchNetworkRequest>,
) -> ApiResult<SwitchNetworkResponse> {
    if request.network.trim().is_empty() {
        return Err(bad_request("network is required"));
    }

    let switched = state
        .controller
        .switch_network(request.network.clone())
        .await
        .map_err(internal_error)?
        .map_err(connect_error)?;

    Ok(Json(SwitchNetworkResponse {
        network: request.network,
        switched,
    }))
}

async fn network_visibility(
    State(state): State<AppState>,
    Json(request): Json<VisibilityRequest>,
) -> ApiResult<VisibilityResponse> {
    let updated = state
        .controller
        .set_visibility(request.network.clone(), request.visible)
        .await
        .map_err(internal_error)?;
    if !updated {
        return Err(not_found(&format!("unknown network: {}", request.network)));
    }

    Ok(Json(VisibilityResponse {
        network: request.network,
        visible: request.visible,
    }))
}

async fn network_rpc(
    State(state): State<AppState>,
    Json(request): Json<RpcOverrideRequest>,
) -> ApiResult<RpcOverrideResponse> {
    let rpc_url = state
        .controller
        .set_rpc_override(request.network.clone(), request.url)
        .await
        .map_err(internal_error)?
        .map_err(connect_error)?;

    Ok(Json(RpcOverrideResponse {
        network: request.network,
        rpc_url,
    }))
}

async fn network_allowed(
    State(state): State<AppState>,
    Query(query): Query<AllowedQuery>,
) -> ApiResult<AllowedNetwork> {
    if query.chain_id.trim().is_empty() {
        return Err(bad_request("chain_id is required"));
    }

    let allowed = state
        .controller
        .allowed(query.chain_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(allowed))
}

fn error_body(status: StatusCode, error: String) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error,
            code: None,
            data: None,
        }),
    )
}

fn bad_request(message: &str) -> ApiError {
    error_body(StatusCode::BAD_REQUEST, message.to_owned())
}

fn not_found(message: &str) -> ApiError {
    error_body(StatusCode::NOT_FOUND, message.to_owned())
}

fn bad_gateway(message: &str) -> ApiError {
    error_body(StatusCode::BAD_GATEWAY, message.to_owned())
}

fn internal_error(err: impl std::fmt::Display) -> ApiError {
    error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn connect_error(err: ConnectError) -> ApiError {
    let message = err.to_string();
    match err {
        ConnectError::Provider(ProviderError::Rejected { code, data, .. }) => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: message,
                code: Some(code),
                data,
            }),
        ),
        ConnectError::Provider(ProviderError::Unsupported { .. }) => bad_request(&message),
        ConnectError::Provider(_) | ConnectError::NoAccounts => bad_gateway(&message),
        ConnectError::UnknownNetwork(_) => not_found(&message),
        ConnectError::Storage(_) => internal_error(message),
    }
}
