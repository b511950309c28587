//! Mock agent gateway for demos and manual testing.
//!
//! Run with: cargo run -p gateway-demo
//!
//! Serves the event stream on ws://127.0.0.1:8504/ws and the execute
//! endpoint on the same port, emitting synthetic agent activity.

use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use agent_feed_transport::{ClientFrame, ServerFrame};
use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const AGENTS: &[&str] = &["diagnostic_agent", "resolution_agent", "system_health_agent"];

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    events: broadcast::Sender<ServerFrame>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (events, _) = broadcast::channel(256);
    let state = AppState {
        events: events.clone(),
    };

    // Synthetic agent activity for the dashboard to watch.
    tokio::spawn(simulate(events));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/v1/agents/{agent_id}/execute", post(execute_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], 8504));
    tracing::info!("gateway listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// Emit a steady trickle of status and task events.
async fn simulate(events: broadcast::Sender<ServerFrame>) {
    let mut tick: u64 = 0;
    loop {
        tokio::time::sleep(Duration::from_millis(800)).await;
        let agent = AGENTS[usize::try_from(tick).unwrap_or(0) % AGENTS.len()];
        let frame = if tick % 2 == 0 {
            ServerFrame::AgentStatus {
                agent_id: agent.to_string(),
                payload: json!({
                    "status": if tick % 4 == 0 { "running" } else { "idle" },
                    "tick": tick,
                }),
            }
        } else {
            ServerFrame::TaskUpdate {
                agent_id: agent.to_string(),
                payload: json!({ "progress": (tick * 7) % 100, "tick": tick }),
            }
        };
        let _ = events.send(frame);

        if tick % 10 == 9 {
            let _ = events.send(ServerFrame::SystemEvent {
                payload: json!({ "note": "heartbeat", "tick": tick }),
            });
        }
        tick += 1;
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending frames to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    // Spawn task to forward frames to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize frame: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Per-connection subscriptions, the rooms the real gateway keeps.
    // Deliberately not persisted: a reconnecting client must re-subscribe.
    let subscriptions = Arc::new(Mutex::new(HashSet::<String>::new()));

    // Forward matching events from the global feed.
    let event_tx = tx.clone();
    let event_subs = Arc::clone(&subscriptions);
    let mut events = state.events.subscribe();
    let event_task = tokio::spawn(async move {
        loop {
            let frame = match events.recv().await {
                Ok(frame) => frame,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "client lagging behind the feed");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let wanted = match &frame {
                ServerFrame::AgentStatus { agent_id, .. }
                | ServerFrame::TaskUpdate { agent_id, .. } => {
                    event_subs.lock().unwrap().contains(agent_id)
                }
                _ => true,
            };
            if wanted && event_tx.send(frame).is_err() {
                break;
            }
        }
    });

    // Handle incoming frames
    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Invalid client frame: {e}");
                continue;
            }
        };

        match frame {
            ClientFrame::SubscribeAgent { agent_id } => {
                tracing::info!(%agent_id, "client subscribed");
                subscriptions.lock().unwrap().insert(agent_id.clone());
                let _ = tx.send(ServerFrame::Subscribed { agent_id });
            }
            ClientFrame::UnsubscribeAgent { agent_id } => {
                tracing::info!(%agent_id, "client unsubscribed");
                subscriptions.lock().unwrap().remove(&agent_id);
            }
            ClientFrame::Ping => {
                let _ = tx.send(ServerFrame::Pong);
            }
        }
    }

    event_task.abort();
    send_task.abort();
    tracing::info!("client disconnected");
}

async fn execute_handler(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Json<Value> {
    tracing::info!(%agent_id, "execution triggered");

    // Narrate progress on the event stream while the "work" runs.
    let events = state.events.clone();
    let narrated = agent_id.clone();
    tokio::spawn(async move {
        for step in 1..=3 {
            let _ = events.send(ServerFrame::TaskUpdate {
                agent_id: narrated.clone(),
                payload: json!({ "step": step, "of": 3 }),
            });
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let _ = events.send(ServerFrame::AgentStatus {
            agent_id: narrated,
            payload: json!({ "status": "idle" }),
        });
    });

    tokio::time::sleep(Duration::from_millis(700)).await;
    let goal = body["goal"].as_str().unwrap_or("goal");
    Json(json!({
        "status": "completed",
        "agent_id": agent_id,
        "goal": goal,
        "result": format!("{agent_id} finished: {goal}"),
    }))
}
