//! Web server module.

mod handlers;

pub use handlers::*;

use crate::scheduler::Scheduler;

use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

/// HTTP surface over the latest result.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            state: AppState { scheduler },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/", get(handlers::handle_index))
            .route("/getLatestResult", get(handlers::handle_get_latest_result))
            .route("/testSpeedNow", get(handlers::handle_test_speed_now))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the listener on all interfaces.
    pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Web server listening on {}", addr);
        Ok(listener)
    }

    /// Serve until `shutdown` resolves, then wait for in-flight requests.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.routes())
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("Listener closed");
        Ok(())
    }
}
