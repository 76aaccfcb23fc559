use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use h3cbr_driver::Driver;
use h3cbr_driver::api::{
    ActivateResponse, AllocateNetworkRequest, CreateEndpointRequest, CreateNetworkRequest,
    DiscoveryNotification, EndpointRequest, JoinRequest, NetworkRequest,
    ProgramExternalConnectivityRequest,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::trace::TraceLayer;

use super::error::ApiError;

/// Content type of plugin protocol responses.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

type ApiResult = Result<Response, ApiError>;

/// Router serving every plugin protocol verb against `driver`.
pub fn app(driver: Arc<Driver>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/NetworkDriver.GetCapabilities", post(capabilities))
        .route("/NetworkDriver.CreateNetwork", post(create_network))
        .route("/NetworkDriver.AllocateNetwork", post(allocate_network))
        .route("/NetworkDriver.DeleteNetwork", post(delete_network))
        .route("/NetworkDriver.FreeNetwork", post(free_network))
        .route("/NetworkDriver.CreateEndpoint", post(create_endpoint))
        .route("/NetworkDriver.EndpointOperInfo", post(endpoint_info))
        .route("/NetworkDriver.DeleteEndpoint", post(delete_endpoint))
        .route("/NetworkDriver.Join", post(join))
        .route("/NetworkDriver.Leave", post(leave))
        .route("/NetworkDriver.DiscoverNew", post(discover_new))
        .route("/NetworkDriver.DiscoverDelete", post(discover_delete))
        .route(
            "/NetworkDriver.ProgramExternalConnectivity",
            post(program_external_connectivity),
        )
        .route(
            "/NetworkDriver.RevokeExternalConnectivity",
            post(revoke_external_connectivity),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(driver)
}

/// Serialize a protocol body with the plugin content type.
pub fn reply<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (status, [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], bytes).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Failed to encode response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "Err": err.to_string() })),
            )
                .into_response()
        }
    }
}

fn ok<T: Serialize>(body: &T) -> ApiResult {
    Ok(reply(StatusCode::OK, body))
}

fn empty() -> ApiResult {
    ok(&json!({}))
}

/// Bodies are decoded by hand: the orchestrator sends the plugin content
/// type rather than `application/json`.
fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|err| ApiError(err.into()))
}

async fn activate() -> ApiResult {
    tracing::debug!("Plugin activate request");
    ok(&ActivateResponse::default())
}

async fn capabilities(State(driver): State<Arc<Driver>>) -> ApiResult {
    ok(&driver.capabilities())
}

async fn create_network(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let request: CreateNetworkRequest = decode(&body)?;
    driver.create_network(request).await?;
    empty()
}

async fn allocate_network(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let request: AllocateNetworkRequest = decode(&body)?;
    ok(&driver.allocate_network(&request))
}

async fn delete_network(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let request: NetworkRequest = decode(&body)?;
    driver.delete_network(request).await?;
    empty()
}

async fn free_network(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let request: NetworkRequest = decode(&body)?;
    driver.free_network(&request);
    empty()
}

async fn create_endpoint(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let request: CreateEndpointRequest = decode(&body)?;
    ok(&driver.create_endpoint(request).await?)
}

async fn endpoint_info(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let request: EndpointRequest = decode(&body)?;
    ok(&driver.endpoint_info(&request)?)
}

async fn delete_endpoint(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let request: EndpointRequest = decode(&body)?;
    driver.delete_endpoint(&request)?;
    empty()
}

async fn join(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let request: JoinRequest = decode(&body)?;
    ok(&driver.join(&request)?)
}

async fn leave(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let request: EndpointRequest = decode(&body)?;
    driver.leave(&request);
    empty()
}

async fn discover_new(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let notification: DiscoveryNotification = decode(&body)?;
    driver.discover_new(&notification);
    empty()
}

async fn discover_delete(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let notification: DiscoveryNotification = decode(&body)?;
    driver.discover_delete(&notification);
    empty()
}

async fn program_external_connectivity(
    State(driver): State<Arc<Driver>>,
    body: Bytes,
) -> ApiResult {
    let request: ProgramExternalConnectivityRequest = decode(&body)?;
    driver.program_external_connectivity(&request);
    empty()
}

async fn revoke_external_connectivity(
    State(driver): State<Arc<Driver>>,
    body: Bytes,
) -> ApiResult {
    let request: EndpointRequest = decode(&body)?;
    driver.revoke_external_connectivity(&request);
    empty()
}
