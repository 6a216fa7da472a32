use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::watch,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    connection::handle_connection,
    relay::Relay,
    transport::{LineTransport, WebSocketTransport},
};

/// Shared state handed to the axum handlers.
#[derive(Clone)]
pub struct AppState {
    relay: Arc<Relay>,
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(relay: Arc<Relay>, shutdown: watch::Receiver<bool>) -> Self {
        Self { relay, shutdown }
    }
}

/// WebSocket endpoint at the configured path plus `/health`.
pub fn build_router(state: AppState) -> Router {
    let endpoint = state.relay.config().endpoint_path.clone();
    Router::new()
        .route(&endpoint, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let transport = WebSocketTransport::new(socket);
        if let Err(err) = handle_connection(transport, state.relay, state.shutdown).await {
            warn!(error = ?err, "websocket connection closed with error");
        }
    })
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.relay.health().await)
}

/// HTTP/WebSocket listener, optionally paired with a line-protocol listener.
pub struct Server {
    http: TcpListener,
    lines: Option<TcpListener>,
    relay: Arc<Relay>,
}

impl Server {
    pub fn new(http: TcpListener, relay: Arc<Relay>) -> Self {
        Self {
            http,
            lines: None,
            relay,
        }
    }

    pub fn with_line_listener(mut self, listener: TcpListener) -> Self {
        self.lines = Some(listener);
        self
    }

    pub fn http_addr(&self) -> std::io::Result<SocketAddr> {
        self.http.local_addr()
    }

    pub fn line_addr(&self) -> Option<std::io::Result<SocketAddr>> {
        self.lines.as_ref().map(TcpListener::local_addr)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { http, lines, relay } = self;
        let (stop_tx, stop_rx) = watch::channel(false);

        let router = build_router(AppState::new(Arc::clone(&relay), stop_rx.clone()));
        let mut http_stop = stop_rx.clone();
        let http_task = tokio::spawn(async move {
            axum::serve(http, router)
                .with_graceful_shutdown(async move {
                    let _ = http_stop.changed().await;
                })
                .await
        });

        let line_task = lines.map(|listener| {
            let relay = Arc::clone(&relay);
            tokio::spawn(accept_lines(listener, relay, stop_rx.clone()))
        });

        shutdown.await;
        info!("relay shutting down");
        let _ = stop_tx.send(true);

        http_task
            .await
            .context("http server task panicked")?
            .context("http server failed")?;
        if let Some(task) = line_task {
            task.await.context("line listener task panicked")?;
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn accept_lines(listener: TcpListener, relay: Arc<Relay>, mut stop: watch::Receiver<bool>) {
    loop {
        select! {
            _ = stop.changed() => break,
            accept_result = listener.accept() => {
                handle_accept_result(accept_result, &relay, &stop);
            }
        }
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    relay: &Arc<Relay>,
    stop: &watch::Receiver<bool>,
) {
    match result {
        Ok((stream, peer)) => spawn_line_connection(stream, peer, relay, stop),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_line_connection(
    stream: TcpStream,
    peer: SocketAddr,
    relay: &Arc<Relay>,
    stop: &watch::Receiver<bool>,
) {
    let relay = Arc::clone(relay);
    let stop = stop.clone();
    tokio::spawn(async move {
        let transport = LineTransport::from_tcp(stream);
        if let Err(err) = handle_connection(transport, relay, stop).await {
            warn!(peer = %peer, error = ?err, "line connection closed with error");
        }
    });
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::config::RelayConfig;

    #[tokio::test]
    async fn health_reports_relay_state() {
        let relay = Relay::shared(RelayConfig::default());
        let (_stop_tx, stop_rx) = watch::channel(false);
        let router = build_router(AppState::new(relay, stop_rx));

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let health: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(health["status"], "ok");
        assert_eq!(health["sessions"], 0);
        assert_eq!(health["topic"], "/topic/public");
    }

    #[tokio::test]
    async fn endpoint_path_is_configurable() {
        let relay = Relay::shared(RelayConfig {
            endpoint_path: "/chat".into(),
            ..RelayConfig::default()
        });
        let (_stop_tx, stop_rx) = watch::channel(false);
        let router = build_router(AppState::new(relay, stop_rx));

        let plain_get = |uri: &'static str| {
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("request")
        };

        // Without upgrade headers the extractor refuses, but the route exists.
        let chat = router
            .clone()
            .oneshot(plain_get("/chat"))
            .await
            .expect("response");
        assert_ne!(chat.status(), StatusCode::NOT_FOUND);

        let old = router.oneshot(plain_get("/ws")).await.expect("response");
        assert_eq!(old.status(), StatusCode::NOT_FOUND);
    }
}
