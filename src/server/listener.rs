use std::sync::Arc;

use axum::routing::{any, get};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::dns::DohClient;
use crate::server::handler::{ws_upgrade, GatewayContext};
use crate::session::SessionManager;
use crate::utils::error::{GatewayError, Result};

pub struct GatewayServer {
    config: Arc<Config>,
    ctx: Arc<GatewayContext>,
    shutdown: CancellationToken,
}

impl GatewayServer {
    pub fn new(config: Config) -> Result<Self> {
        let upstream = Arc::new(config.upstream.build()?);
        let doh = DohClient::new(upstream.doh_url.clone())?;
        let shutdown = CancellationToken::new();

        let ctx = Arc::new(GatewayContext {
            upstream,
            sessions: Arc::new(SessionManager::new()),
            doh,
            shutdown: shutdown.clone(),
        });

        Ok(Self {
            config: Arc::new(config),
            ctx,
            shutdown,
        })
    }

    pub fn context(&self) -> Arc<GatewayContext> {
        self.ctx.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.config.server.ws_path, any(ws_upgrade))
            .route("/healthz", get(healthz))
            .layer(TraceLayer::new_for_http())
            .with_state(self.ctx.clone())
    }

    pub async fn run(&self) -> Result<()> {
        let bind_addr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.bind_port
        );
        let listener = TcpListener::bind(&bind_addr).await?;

        info!("VlessGate listening on {}", bind_addr);
        info!(
            ws_path = %self.config.server.ws_path,
            users = self.ctx.upstream.user_ids.len(),
            socks5 = self.ctx.upstream.socks5.is_some(),
            fallback = self.ctx.upstream.fallback.is_some(),
            doh_url = %self.ctx.upstream.doh_url,
            "gateway ready"
        );

        self.serve(listener).await
    }

    /// Serve on an already-bound listener. Split out so tests can bind an
    /// ephemeral port first.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(GatewayError::Io)
    }

    /// Stop accepting and cancel every live session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
