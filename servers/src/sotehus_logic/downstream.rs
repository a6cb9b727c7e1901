use crate::sotehus_logic::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::StreamExt;
use lib_common::core::{DashboardView, ObserverLoop, SchedulerState};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

/// Body of `GET /api/state`.
#[derive(Debug, Serialize)]
pub struct StateResponse {
    #[serde(flatten)]
    pub view: DashboardView,
    pub scheduler: Option<SchedulerState>,
    pub observers: usize,
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/state", get(state_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

pub async fn run(port: u16, app_state: AppState, token: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Dashboard server listening on {}", addr);

    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(async move {
            token.cancelled().await;
            tracing::info!("Dashboard server shutting down.");
        })
        .await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn state_handler(State(state): State<AppState>) -> Json<StateResponse> {
    Json(StateResponse {
        view: DashboardView::from_state(state.shared.snapshot(), state.region),
        scheduler: state.scheduler(),
        observers: state.registry.clients(),
    })
}

async fn health_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "OK")
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let session = state.token.child_token();
    let (tx, mut rx) = mpsc::channel::<DashboardView>(4);

    // The guard moves into the loop and is released when it stops.
    let observer = ObserverLoop::new(state.shared.clone(), state.region, state.tick);
    let observer_handle = tokio::spawn(observer.run(state.registry.register(), tx, session.clone()));
    tracing::info!(client_id, observers = state.registry.clients(), "Client connected");

    loop {
        tokio::select! {
            _ = session.cancelled() => break,
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            view = rx.recv() => {
                let Some(view) = view else { break };
                match serde_json::to_string(&view) {
                    Ok(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break; // client disconnected
                        }
                    }
                    Err(e) => tracing::warn!(client_id, error = %e, "Failed to encode dashboard view"),
                }
            }
        }
    }

    session.cancel();
    drop(rx);
    if let Err(e) = observer_handle.await {
        tracing::error!(client_id, error = %e, "Observer loop panicked");
    }
    tracing::info!(client_id, observers = state.registry.clients(), "Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lib_common::core::{PowerSample, Region};
    use lib_common::{ObserverRegistry, SharedState};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn app_state() -> AppState {
        AppState::new(
            SharedState::new(),
            Arc::new(ObserverRegistry::new()),
            Region::SE3,
            Duration::from_secs(3),
            CancellationToken::new(),
        )
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_state_handler_reports_snapshot() {
        let state = app_state();
        state.shared.set_power(PowerSample { watts: 1580.5, observed_at: Utc::now() });
        let _guard = state.registry.register();

        let Json(body) = state_handler(State(state)).await;

        assert_eq!(body.view.power.unwrap().watts, 1580.5);
        assert!(body.view.solar.is_none());
        assert!(body.scheduler.is_none());
        assert_eq!(body.observers, 1);
    }

    #[tokio::test]
    async fn test_routes_and_graceful_shutdown() {
        let state = app_state();
        let token = state.token.clone();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = token.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, router(state)).with_graceful_shutdown(shutdown.cancelled_owned()).await
        });

        let health = get(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.ends_with("OK"));

        let api = get(addr, "/api/state").await;
        assert!(api.starts_with("HTTP/1.1 200"));
        assert!(api.contains("\"connection\""));
        assert!(api.contains("\"observers\":0"));

        let missing = get(addr, "/nope").await;
        assert!(missing.starts_with("HTTP/1.1 404"));

        token.cancel();
        server.await.unwrap().unwrap();
    }
}
