//! Axum HTTP server for the provisioning API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{Method, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use secrecy::SecretString;
use tokio::sync::{RwLock, oneshot};
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ChannelError;
use crate::identity::{IdentityStore, LocalIdentity};
use crate::network::LoginCapable;
use crate::pairing::session::{PairingController, PairingRequest};
use crate::pairing::supervisor::CompletionSupervisor;
use crate::provisioning::auth::{AuthState, LOGIN_SUBPROTOCOL, auth_middleware};
use crate::provisioning::types::{
    ApiError, HealthResponse, LoginQuery, LogoutResponse, PingResponse, UserQuery,
    require_user_id,
};
use crate::provisioning::ws::handle_login_socket;
use crate::registry::SessionRegistry;
use crate::status::StatusReporter;

/// Shared state for all provisioning handlers.
pub struct ProvisioningState {
    pub controller: PairingController,
    pub status: StatusReporter,
    pub registry: Arc<SessionRegistry>,
    pub shutdown_tx: RwLock<Option<oneshot::Sender<()>>>,
}

impl ProvisioningState {
    /// Wire the pairing core to a network connector and an identity store.
    pub fn new(store: Arc<dyn IdentityStore>, network: Arc<dyn LoginCapable>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let supervisor = CompletionSupervisor::new(Arc::clone(&store), Arc::clone(&registry));
        Self {
            controller: PairingController::new(network, Arc::clone(&registry), supervisor),
            status: StatusReporter::new(store, Arc::clone(&registry)),
            registry,
            shutdown_tx: RwLock::new(None),
        }
    }

    /// Stop the server started by [`start_server`], if any.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
    }
}

/// Build the provisioning router.
pub fn router(state: Arc<ProvisioningState>, secret: SecretString) -> Router {
    let auth_state = AuthState::new(secret);

    let public = Router::new().route("/v1/health", get(health_handler));

    let protected = Router::new()
        .route("/v1/login", get(login_ws_handler))
        .route("/v1/ping", get(ping_handler))
        .route("/v1/logout", post(logout_handler))
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ]));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the provisioning server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<ProvisioningState>,
    secret: SecretString,
) -> Result<SocketAddr, ChannelError> {
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "provisioning".to_string(),
                reason: format!("Failed to bind to {}: {}", addr, e),
            })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ChannelError::StartupFailed {
            name: "provisioning".to_string(),
            reason: format!("Failed to get local addr: {}", e),
        })?;

    let app = router(Arc::clone(&state), secret);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Provisioning server shutting down");
            })
            .await
        {
            tracing::error!("Provisioning server error: {}", e);
        }
    });

    Ok(bound_addr)
}

// --- Health ---

async fn health_handler(State(state): State<Arc<ProvisioningState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        active_pairings: state.registry.active_pairings(),
    })
}

// --- Login ---

async fn login_ws_handler(
    State(state): State<Arc<ProvisioningState>>,
    Query(query): Query<LoginQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id = require_user_id(query.user_id)?;
    let request = PairingRequest {
        identity: LocalIdentity::new(user_id),
        phone_number: query.phone_number.filter(|p| !p.is_empty()),
        timezone: query.tz.filter(|tz| !tz.is_empty()),
    };
    let controller = state.controller.clone();

    Ok(ws
        .protocols([LOGIN_SUBPROTOCOL])
        .on_upgrade(move |socket| async move {
            handle_login_socket(socket, controller, request).await;
        })
        .into_response())
}

// --- Status ---

async fn ping_handler(
    State(state): State<Arc<ProvisioningState>>,
    Query(query): Query<UserQuery>,
) -> Result<Json<PingResponse>, ApiError> {
    let user_id = require_user_id(query.user_id)?;
    let identity = LocalIdentity::new(user_id.clone());
    let status = state
        .status
        .status(&identity)
        .await
        .map_err(|e| ApiError::from_status(e, StatusCode::NOT_FOUND))?;
    Ok(Json(PingResponse {
        whatsapp: status,
        mxid: user_id,
    }))
}

async fn logout_handler(
    State(state): State<Arc<ProvisioningState>>,
    Query(query): Query<UserQuery>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let identity = LocalIdentity::new(require_user_id(query.user_id)?);
    state
        .status
        .logout_all(&identity)
        .await
        .map_err(|e| ApiError::from_status(e, StatusCode::OK))?;
    Ok(Json(LogoutResponse::ok()))
}
