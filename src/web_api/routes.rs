//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::error::Error;
use crate::models::{ApiResponse, MotionStatusResponse};
use crate::motion_alert::DetectionConfig;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(super::health_check))
        // Pipeline
        .route("/api/motion/status", get(motion_status))
        .route("/api/motion/snapshot", get(motion_snapshot))
        .route("/api/motion/connect", post(connect_channel))
        .route("/api/motion/disconnect", post(disconnect_channel))
        // Alerts
        .route("/api/motion/alerts", get(list_live_alerts).delete(clear_live_alerts))
        .route("/api/motion/alerts/:alert_id/ack", post(acknowledge_alert))
        .route("/api/motion/history", get(list_history))
        // Devices
        .route(
            "/api/motion/devices/:device_id/subscription",
            post(subscribe_device).delete(unsubscribe_device),
        )
        .route("/api/motion/devices/:device_id/start", post(start_detection))
        .route("/api/motion/devices/:device_id/stop", post(stop_detection))
        .route(
            "/api/motion/devices/:device_id/config",
            get(get_device_config).put(update_device_config),
        )
        .route(
            "/api/motion/devices/:device_id/statistics",
            get(get_device_statistics),
        )
        // Subscriptions list
        .route("/api/motion/subscriptions", get(list_subscriptions))
        // WebSocket
        .route("/api/ws", get(websocket_handler))
        .with_state(state)
}

// ========================================
// Pipeline Handlers
// ========================================

async fn motion_status(State(state): State<AppState>) -> impl IntoResponse {
    let motion = &state.motion;
    let status = MotionStatusResponse {
        connected: motion.is_connected(),
        channel_state: motion.channel_state(),
        last_error: motion.last_error().await,
        subscriptions: motion.subscriptions().await,
        live_alerts: motion.live_count().await,
        history_len: motion.history_len().await,
        pending_dismissals: motion.pending_dismissals(),
    };

    Json(ApiResponse::success(status))
}

async fn motion_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.motion.snapshot().await))
}

async fn connect_channel(State(state): State<AppState>) -> impl IntoResponse {
    state.motion.connect();
    Json(json!({"ok": true, "state": state.motion.channel_state()}))
}

async fn disconnect_channel(State(state): State<AppState>) -> impl IntoResponse {
    state.motion.disconnect().await;
    Json(json!({"ok": true, "state": state.motion.channel_state()}))
}

// ========================================
// Alert Handlers
// ========================================

async fn list_live_alerts(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.motion.live_alerts().await))
}

async fn clear_live_alerts(State(state): State<AppState>) -> impl IntoResponse {
    state.motion.clear_all().await;
    Json(json!({"ok": true}))
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> impl IntoResponse {
    if state.motion.acknowledge_locally(&alert_id).await {
        Json(json!({"ok": true, "alert_id": alert_id})).into_response()
    } else {
        Error::NotFound(format!("Live alert {}", alert_id)).into_response()
    }
}

/// Query parameters for alert history
#[derive(Debug, Deserialize)]
struct HistoryQuery {
    device_id: Option<String>,
    limit: Option<usize>,
}

async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let alerts = state
        .motion
        .query_history(query.device_id.as_deref(), query.limit)
        .await;

    Json(ApiResponse::success(alerts))
}

// ========================================
// Device Handlers
// ========================================

async fn list_subscriptions(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.motion.subscriptions().await))
}

async fn subscribe_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    state.motion.subscribe(&device_id).await;
    Json(json!({"ok": true, "device_id": device_id}))
}

async fn unsubscribe_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    state.motion.unsubscribe(&device_id).await;
    Json(json!({"ok": true, "device_id": device_id}))
}

async fn start_detection(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    body: Option<Json<DetectionConfig>>,
) -> impl IntoResponse {
    let config = body.map(|Json(config)| config);
    match state.motion.start_detection(&device_id, config).await {
        Ok(()) => Json(json!({"ok": true, "device_id": device_id})).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn stop_detection(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    match state.motion.stop_detection(&device_id).await {
        Ok(()) => Json(json!({"ok": true, "device_id": device_id})).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_device_config(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    match state.motion.fetch_config(&device_id).await {
        Ok(config) => Json(ApiResponse::success(config)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn update_device_config(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(patch): Json<DetectionConfig>,
) -> impl IntoResponse {
    if let Some(sensitivity) = patch.sensitivity {
        if !(0.0..=100.0).contains(&sensitivity) {
            return Error::Validation("sensitivity must be 0-100".to_string()).into_response();
        }
    }

    match state.motion.update_config(&device_id, patch).await {
        Ok(()) => Json(ApiResponse::success(state.motion.cached_config().await)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_device_statistics(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    match state.motion.fetch_statistics(&device_id).await {
        Ok(statistics) => Json(ApiResponse::success(statistics)).into_response(),
        Err(e) => e.into_response(),
    }
}

// ========================================
// WebSocket Handler
// ========================================

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut rx) = state.realtime.register().await;

    // Forward hub messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Inbound traffic is ignored apart from close/errors
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
        conn_id
    });

    let conn_id = tokio::select! {
        _ = send_task => conn_id,
        result = recv_task => result.unwrap_or(conn_id),
    };

    state.realtime.unregister(&conn_id).await;
}
