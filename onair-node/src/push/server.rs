use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use metrics::counter;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::{error, info, instrument, warn};

use super::messages::{PushRequest, PushResponse};
use super::STATUS_PATH;
use crate::error::{Result, SyncError};
use crate::synchronizer::SyncHandle;

/// How long shutdown waits for in-flight requests before aborting
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Handle inbound status push
#[instrument(skip(handle))]
async fn handle_push(
    State(handle): State<SyncHandle>,
    payload: std::result::Result<Json<PushRequest>, JsonRejection>,
) -> (StatusCode, Json<PushResponse>) {
    counter!("status_pushes_received", 1);

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            counter!("status_pushes_rejected", 1);
            warn!(error = %rejection.body_text(), "Malformed status push");
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(PushResponse::rejected()));
        }
    };

    match handle.on_incoming_push(&request.identity, &request.status).await {
        Ok(own_status) => (StatusCode::OK, Json(PushResponse::accepted(own_status))),
        Err(e) => {
            counter!("status_pushes_rejected", 1);
            warn!(error = %e, "Rejected status push");
            (StatusCode::UNPROCESSABLE_ENTITY, Json(PushResponse::rejected()))
        }
    }
}

/// Liveness probe
async fn health_check(State(handle): State<SyncHandle>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "identity": handle.identity(),
    }))
}

/// Create the push API router
pub fn create_push_router(handle: SyncHandle) -> Router {
    Router::new()
        .route(STATUS_PATH, put(handle_push))
        .route("/health", get(health_check))
        .with_state(handle)
}

/// Running inbound listener of the push protocol
#[derive(Debug)]
pub struct PushServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PushServer {
    /// Bind the listener and start serving pushes
    pub async fn bind(addr: &str, handle: SyncHandle) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SyncError::Startup(format!("Failed to bind push API to {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        let app = create_push_router(handle);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Push API server failed");
            }
        });

        info!(addr = %local_addr, "Push API server listening");

        Ok(Self {
            local_addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting pushes and wait for the listener to close
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        let Some(mut task) = self.task.take() else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(())) => {
                info!(addr = %self.local_addr, "Push API server stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(SyncError::Shutdown(format!("push API task failed: {}", e))),
            Err(_) => {
                task.abort();
                Err(SyncError::Shutdown(format!(
                    "push API did not drain within {:?}, aborted",
                    SHUTDOWN_GRACE
                )))
            }
        }
    }
}

impl Drop for PushServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::output::ChannelOutput;
    use axum::body::{self, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt; // for `oneshot`

    fn sync_handle() -> (SyncHandle, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let mut config = NodeConfig::default();
        config.service.name = "box-self".to_string();
        let (output, changes) = ChannelOutput::new();
        (SyncHandle::new(&config, Arc::new(output)).unwrap(), changes)
    }

    fn push_request(identity: &str, status: &str) -> Request<Body> {
        let payload = serde_json::json!({ "identity": identity, "status": status });
        Request::builder()
            .method("PUT")
            .uri(STATUS_PATH)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_push_is_acknowledged_with_own_status() {
        let (handle, mut changes) = sync_handle();
        let _ = handle.set_local_status("low").await.unwrap();
        assert_eq!(changes.try_recv().unwrap(), "low");

        let app = create_push_router(handle.clone());
        let response = app.oneshot(push_request("box-a", "high")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], "low");

        assert_eq!(handle.output_status().await, "high");
        assert_eq!(changes.try_recv().unwrap(), "high");
    }

    #[tokio::test]
    async fn test_unknown_status_is_rejected() {
        let (handle, mut changes) = sync_handle();
        let app = create_push_router(handle.clone());

        let response = app
            .oneshot(push_request("box-a", "not-a-real-status"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body, serde_json::json!({ "success": false }));

        assert_eq!(handle.output_status().await, "off");
        assert!(handle.snapshot().await.peers.is_empty());
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_push_uses_wire_format() {
        let (handle, mut changes) = sync_handle();
        let app = create_push_router(handle.clone());

        for body in [r#"{"identity": "box-a"}"#, r#"{"identity": 7, "status": "low"}"#, "not json"] {
            let request = Request::builder()
                .method("PUT")
                .uri(STATUS_PATH)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();

            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "body: {}", body);
            assert_eq!(json_body(response).await, serde_json::json!({ "success": false }));
        }

        let request = Request::builder()
            .method("PUT")
            .uri(STATUS_PATH)
            .body(Body::from(r#"{"identity": "box-a", "status": "low"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await, serde_json::json!({ "success": false }));

        assert!(handle.snapshot().await.peers.is_empty());
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (handle, _changes) = sync_handle();
        let app = create_push_router(handle);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["identity"], "box-self");
    }

    #[tokio::test]
    async fn test_bind_and_shutdown() {
        let (handle, _changes) = sync_handle();
        let mut server = PushServer::bind("127.0.0.1:0", handle).await.unwrap();
        let addr = server.local_addr();
        assert_ne!(addr.port(), 0);

        server.shutdown().await.unwrap();
        // Second shutdown is a no-op
        server.shutdown().await.unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_startup_error() {
        let (handle, _changes) = sync_handle();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let result = PushServer::bind(&addr, handle).await;
        assert!(matches!(result, Err(SyncError::Startup(_))));
    }
}
