//! HTTP routes over the network manager
//!
//! Subnets:
//! - GET/POST /subnets, GET/DELETE /subnets/:id
//! - PUT /subnets/:id/name, /subnets/:id/subnet-ip, /subnets/:id/subnet-mask
//!
//! Clients:
//! - GET/POST /clients, GET/DELETE /clients/:id
//! - POST /clients/:id/enable, /clients/:id/disable
//! - PUT /clients/:id/name, /clients/:id/address
//! - GET /clients/:id/configuration

use crate::network::NetworkManager;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use uuid::Uuid;
use wgsync_common::{Client, Error, Subnet};

// ============================================================================
// Errors
// ============================================================================

/// Structured failure: `{"error": <message>, "kind": <taxonomy kind>}`
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::AlreadyExists { .. }
        | Error::DuplicatePeer { .. }
        | Error::AddressAlreadyPresent { .. }
        | Error::SubnetAlreadyIsolated { .. }
        | Error::SubnetInUse { .. }
        | Error::PeerNotFound { .. }
        | Error::AddressNotFound { .. }
        | Error::RuleNotFound { .. } => StatusCode::CONFLICT,
        Error::InvalidNetwork(_) | Error::NoUsableHost { .. } | Error::InvalidConfig(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubnetRequest {
    pub name: String,
    pub subnet_ip: String,
    pub subnet_mask: u8,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetIpRequest {
    pub subnet_ip: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetMaskRequest {
    pub subnet_mask: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClientRequest {
    pub name: String,
    pub subnet_id: Uuid,
    pub client_ip: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAddressRequest {
    pub client_ip: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFilter {
    pub subnet_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct Deleted {
    id: Uuid,
    deleted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientConfiguration {
    client_id: Uuid,
    configuration: String,
}

// ============================================================================
// Router
// ============================================================================

pub fn router(manager: Arc<NetworkManager>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Subnets
        .route("/subnets", get(list_subnets_handler).post(create_subnet_handler))
        .route("/subnets/:id", get(get_subnet_handler).delete(delete_subnet_handler))
        .route("/subnets/:id/name", put(rename_subnet_handler))
        .route("/subnets/:id/subnet-ip", put(update_subnet_ip_handler))
        .route("/subnets/:id/subnet-mask", put(update_subnet_mask_handler))
        // Clients
        .route("/clients", get(list_clients_handler).post(create_client_handler))
        .route("/clients/:id", get(get_client_handler).delete(delete_client_handler))
        .route("/clients/:id/enable", post(enable_client_handler))
        .route("/clients/:id/disable", post(disable_client_handler))
        .route("/clients/:id/name", put(rename_client_handler))
        .route("/clients/:id/address", put(update_client_address_handler))
        .route("/clients/:id/configuration", get(client_configuration_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": wgsync_common::VERSION,
    }))
}

// ============================================================================
// Subnet handlers
// ============================================================================

async fn list_subnets_handler(State(mgr): State<Arc<NetworkManager>>) -> ApiResult<Json<Vec<Subnet>>> {
    Ok(Json(mgr.list_subnets()?))
}

async fn create_subnet_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Json(req): Json<CreateSubnetRequest>,
) -> ApiResult<(StatusCode, Json<Subnet>)> {
    let subnet = mgr
        .create_subnet(&req.name, &req.subnet_ip, req.subnet_mask)
        .await?;
    Ok((StatusCode::CREATED, Json(subnet)))
}

async fn get_subnet_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subnet>> {
    Ok(Json(mgr.get_subnet(id)?))
}

async fn delete_subnet_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Deleted>> {
    mgr.delete_subnet(id).await?;
    Ok(Json(Deleted { id, deleted: true }))
}

async fn rename_subnet_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameRequest>,
) -> ApiResult<Json<Subnet>> {
    Ok(Json(mgr.rename_subnet(id, &req.name).await?))
}

async fn update_subnet_ip_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubnetIpRequest>,
) -> ApiResult<Json<Subnet>> {
    Ok(Json(mgr.update_subnet_ip(id, &req.subnet_ip).await?))
}

async fn update_subnet_mask_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubnetMaskRequest>,
) -> ApiResult<Json<Subnet>> {
    Ok(Json(mgr.update_subnet_mask(id, req.subnet_mask).await?))
}

// ============================================================================
// Client handlers
// ============================================================================

async fn list_clients_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Query(filter): Query<ClientFilter>,
) -> ApiResult<Json<Vec<Client>>> {
    Ok(Json(mgr.list_clients(filter.subnet_id)?))
}

async fn create_client_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Json(req): Json<CreateClientRequest>,
) -> ApiResult<(StatusCode, Json<Client>)> {
    let client = mgr
        .create_client(&req.name, req.subnet_id, &req.client_ip)
        .await?;
    Ok((StatusCode::CREATED, Json(client)))
}

async fn get_client_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Client>> {
    Ok(Json(mgr.get_client(id)?))
}

async fn delete_client_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Deleted>> {
    mgr.delete_client(id).await?;
    Ok(Json(Deleted { id, deleted: true }))
}

async fn enable_client_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Client>> {
    Ok(Json(mgr.enable_client(id).await?))
}

async fn disable_client_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Client>> {
    Ok(Json(mgr.disable_client(id).await?))
}

async fn rename_client_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameRequest>,
) -> ApiResult<Json<Client>> {
    Ok(Json(mgr.rename_client(id, &req.name).await?))
}

async fn update_client_address_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ClientAddressRequest>,
) -> ApiResult<Json<Client>> {
    Ok(Json(mgr.update_client_ip(id, &req.client_ip).await?))
}

async fn client_configuration_handler(
    State(mgr): State<Arc<NetworkManager>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ClientConfiguration>> {
    let configuration = mgr.client_configuration(id).await?;
    Ok(Json(ClientConfiguration {
        client_id: id,
        configuration,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::HookDefaults;
    use crate::keys::BuiltinKeyProvisioner;
    use crate::network::ClientSettings;
    use crate::store::{ConfigStore, InterfaceSeed};
    use crate::sync::Synchronizer;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use wgsync_common::{Database, Registry};

    async fn app() -> (TempDir, Router) {
        let tmp = TempDir::new().unwrap();
        let registry: Arc<dyn Registry> = Arc::new(Database::open_memory().unwrap());
        let store = ConfigStore::new(tmp.path().join("wg0.conf"), Duration::from_secs(5));
        let seed = InterfaceSeed {
            address: "10.10.10.1/24".to_string(),
            listen_port: 51830,
            hooks: HookDefaults::default(),
        };
        store.bootstrap(&BuiltinKeyProvisioner, &seed).await.unwrap();
        let sync = Arc::new(Synchronizer::new(store, registry.clone(), HookDefaults::default()));
        let mgr = NetworkManager::new(
            registry,
            sync,
            Arc::new(BuiltinKeyProvisioner),
            ClientSettings::default(),
        );
        (tmp, router(Arc::new(mgr)))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::not_found("subnet", "x")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&Error::SubnetInUse {
                id: "x".to_string(),
                clients: 1
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&Error::InvalidNetwork("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&Error::MalformedDocument("bad".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        assert_eq!(status_for(&Error::Io(timed_out)), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_health() {
        let (_tmp, app) = app().await;
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_subnet_and_client_flow() {
        let (_tmp, app) = app().await;

        let (status, subnet) = call(
            &app,
            Method::POST,
            "/subnets",
            Some(serde_json::json!({"name": "office", "subnetIp": "192.168.1.0", "subnetMask": 24})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let subnet_id = subnet["id"].as_str().unwrap().to_string();

        let (status, client) = call(
            &app,
            Method::POST,
            "/clients",
            Some(serde_json::json!({"name": "laptop", "subnetId": subnet_id, "clientIp": "192.168.1.10"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(client.get("privateKey").is_none());
        let client_id = client["id"].as_str().unwrap().to_string();

        let (status, listed) = call(
            &app,
            Method::GET,
            &format!("/clients?subnetId={}", subnet_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, body) = call(
            &app,
            Method::PUT,
            &format!("/subnets/{}/subnet-ip", subnet_id),
            Some(serde_json::json!({"subnetIp": "192.168.2.0"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "subnet_in_use");

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/clients/{}/disable", client_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isEnabled"], false);

        let (status, body) = call(
            &app,
            Method::GET,
            &format!("/clients/{}/configuration", client_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let text = body["configuration"].as_str().unwrap();
        assert!(text.contains("Address = 192.168.1.10/32"));
        assert!(text.contains("AllowedIPs = 192.168.1.0/24"));

        let (status, _) = call(&app, Method::DELETE, &format!("/subnets/{}", subnet_id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, Method::GET, &format!("/clients/{}", client_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_validation_errors_are_bad_requests() {
        let (_tmp, app) = app().await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/subnets",
            Some(serde_json::json!({"name": "bad", "subnetIp": "192.168.1.7", "subnetMask": 24})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_network");
        assert!(body["error"].as_str().unwrap().contains("192.168.1.7"));
    }
}
