use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::{get, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::oneshot};
use tracing::{error, info, instrument, warn};

use crate::config::ManagementApiConfig;
use crate::error::SyncError;
use crate::synchronizer::{SyncHandle, SyncSnapshot};

/// Management API state
#[derive(Clone)]
pub struct ManagementState {
    /// Configuration
    pub config: ManagementApiConfig,
    /// Synchronizer driven by local input
    pub handle: SyncHandle,
}

/// Local input change request
#[derive(Debug, Deserialize)]
pub struct InputRequest {
    /// New local status
    pub status: String,
}

/// Local input change response
#[derive(Debug, Serialize)]
pub struct InputResponse {
    /// Success status
    pub success: bool,
    /// Response message
    pub message: String,
    /// Aggregate output after the change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_status: Option<String>,
    /// Number of peers the change was pushed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers_notified: Option<usize>,
}

/// Authentication middleware
async fn auth_middleware(
    State(state): State<ManagementState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.config.auth_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match auth_header.and_then(|auth| auth.strip_prefix("Bearer ")) {
        Some(token) if token == expected => Ok(next.run(request).await),
        Some(_) => {
            warn!("Invalid management API token provided");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing or invalid Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Handle a local input change
#[instrument(skip(state))]
async fn handle_set_input(
    State(state): State<ManagementState>,
    Json(request): Json<InputRequest>,
) -> (StatusCode, Json<InputResponse>) {
    match state.handle.set_local_status(&request.status).await {
        Ok(dispatched) => {
            let peers_notified = dispatched.len();
            let output_status = state.handle.output_status().await;
            info!(
                status = %request.status,
                output = %output_status,
                peers = peers_notified,
                "Local input applied"
            );
            (
                StatusCode::OK,
                Json(InputResponse {
                    success: true,
                    message: format!("Local status set to {}", request.status),
                    output_status: Some(output_status),
                    peers_notified: Some(peers_notified),
                }),
            )
        }
        Err(e @ SyncError::InvalidStatus(_)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(InputResponse {
                success: false,
                message: e.to_string(),
                output_status: None,
                peers_notified: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Failed to apply local input");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(InputResponse {
                    success: false,
                    message: e.to_string(),
                    output_status: None,
                    peers_notified: None,
                }),
            )
        }
    }
}

/// Current synchronization state
async fn handle_state(State(state): State<ManagementState>) -> Json<SyncSnapshot> {
    Json(state.handle.snapshot().await)
}

/// Health check endpoint for management API
async fn health_check(State(state): State<ManagementState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "onair-node-management",
        "identity": state.handle.identity(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Create management API router
pub fn create_management_router(state: ManagementState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/state", get(handle_state))
        .route("/api/v1/input", put(handle_set_input))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
}

/// Start the management API server
///
/// Serves until `shutdown` fires or its sender is dropped.
#[instrument(skip(config, handle, shutdown))]
pub async fn start_management_api(
    config: ManagementApiConfig,
    handle: SyncHandle,
    shutdown: oneshot::Receiver<()>,
) -> Result<()> {
    if !config.enabled {
        info!("Management API is disabled");
        return Ok(());
    }

    if config.auth_token.is_none() {
        warn!("Management API has no auth token configured, requests are unauthenticated");
    }

    let state = ManagementState {
        config: config.clone(),
        handle,
    };

    let app = create_management_router(state);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;

    info!(
        addr = %config.listen_addr,
        "Management API server listening"
    );

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown.await;
        })
        .await
    {
        error!(error = %e, "Management API server failed");
        return Err(e.into());
    }

    info!("Management API server stopped");
    Ok(())
}
