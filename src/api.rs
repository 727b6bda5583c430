//! HTTP API server for noded
//!
//! Read-only view of consensus state. The router only ever sees the
//! [`TipProvider`] interface, never the chain manager itself.

use axum::{
    extract::{Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::chain::{ChainIndex, TipProvider};
use crate::error::NodeError;

/// Default listen address for the API.
pub const DEFAULT_API_ADDR: &str = "0.0.0.0:8080";

/// How long in-flight requests get to finish once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type SharedTip = Arc<dyn TipProvider>;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Middleware
// ============================================================================

/// Logs method, path, status, duration and the tip height the request saw.
async fn logging_middleware(State(chain): State<SharedTip>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        tip_height = chain.tip().height,
        "api.request"
    );

    response
}

// ============================================================================
// Router
// ============================================================================

pub fn build_api_router(chain: SharedTip) -> Router {
    // Any origin, reads only
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([http::Method::GET])
        .allow_headers([http::header::CONTENT_TYPE]);

    Router::new()
        .route("/consensus/tip", get(get_consensus_tip))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(chain.clone(), logging_middleware))
        .with_state(chain)
        .layer(cors)
}

async fn get_consensus_tip(State(chain): State<SharedTip>) -> Json<ChainIndex> {
    Json(chain.tip())
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "not found".to_string(),
        }),
    )
}

// ============================================================================
// API Server
// ============================================================================

/// A bound, serving API listener. Dropping it aborts the server; call
/// [`ApiServer::shutdown`] for a graceful stop.
pub struct ApiServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl ApiServer {
    /// Bind `addr` and start serving. A bind failure is fatal for the node.
    pub async fn bind(addr: SocketAddr, chain: SharedTip) -> Result<Self, NodeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NodeError::ApiBind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let app = build_api_router(chain);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await
        });

        info!(address = %local_addr, "api server listening");
        Ok(Self {
            local_addr,
            shutdown_tx,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stop accepting requests and wait for in-flight ones. Idempotent.
    pub async fn shutdown(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        self.shutdown_tx.send_replace(true);

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "api server exited with error"),
            Ok(Err(e)) => warn!(error = %e, "api server task failed"),
            Err(_) => {
                warn!("api server did not stop in time, aborting");
                task.abort();
            }
        }
        info!(address = %self.local_addr, "api server stopped");
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
