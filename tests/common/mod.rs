//! 集成测试用的假后端（HTTP + WebSocket）

#![allow(dead_code)]

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// 推送此帧时服务端主动断开 WebSocket
pub const CLOSE_FRAME: &str = "__close__";

pub struct FakeState {
    /// 轮询返回的序号
    pub poll_sequence: AtomicU64,
    pub mining: AtomicBool,
    pub push: broadcast::Sender<String>,
    pub start_requests: Mutex<Vec<Value>>,
    pub ws_connections: AtomicU64,
    pub status_polls: AtomicU64,
    /// 置位后启停命令返回 500
    pub failing: AtomicBool,
}

pub struct FakeBackend {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
    handle: JoinHandle<()>,
}

impl FakeBackend {
    pub async fn spawn() -> Self {
        let (push, _) = broadcast::channel(64);
        let state = Arc::new(FakeState {
            poll_sequence: AtomicU64::new(1),
            mining: AtomicBool::new(false),
            push,
            start_requests: Mutex::new(Vec::new()),
            ws_connections: AtomicU64::new(0),
            status_polls: AtomicU64::new(0),
            failing: AtomicBool::new(false),
        });

        let app = Router::new()
            .route("/api/health", get(health))
            .route("/api/mining/status", get(mining_status))
            .route("/api/system/stats", get(system_stats))
            .route("/api/system/cpu-info", get(cpu_info))
            .route("/api/mining/start", post(start_mining))
            .route("/api/mining/stop", post(stop_mining))
            .route("/ws", get(push_channel))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn push_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// 向所有已连接的推送通道发送一帧
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.state.push.send(frame.into());
    }

    pub fn push_status(&self, is_mining: bool, sequence: u64) {
        self.push(
            json!({
                "type": "mining_update",
                "is_mining": is_mining,
                "stats": {
                    "hashrate": 2500.0,
                    "accepted_shares": sequence,
                    "rejected_shares": 0,
                    "blocks_found": 0,
                    "uptime": 60.0,
                    "sequence": sequence
                }
            })
            .to_string(),
        );
    }

    pub fn drop_push_connections(&self) {
        self.push(CLOSE_FRAME);
    }

    pub fn ws_connections(&self) -> u64 {
        self.state.ws_connections.load(Ordering::SeqCst)
    }

    /// 等待推送通道建立（订阅者数量达到 `count`）
    pub async fn wait_for_subscribers(&self, count: usize) {
        wait_until(Duration::from_secs(5), || self.state.push.receiver_count() >= count).await;
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// 轮询等待条件成立，超时则 panic
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}", limit);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "backend": "running", "database": "connected"}))
}

async fn mining_status(State(state): State<Arc<FakeState>>) -> Json<Value> {
    state.status_polls.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "is_mining": state.mining.load(Ordering::SeqCst),
        "stats": {
            "hashrate": 1500.0,
            "accepted_shares": 10,
            "rejected_shares": 1,
            "blocks_found": 0,
            "uptime": 42.0,
            "sequence": state.poll_sequence.load(Ordering::SeqCst)
        }
    }))
}

async fn system_stats() -> Json<Value> {
    Json(json!({
        "cpu_usage": 55.5,
        "memory_usage": 40.0,
        "disk_usage": 20.0,
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn cpu_info() -> Json<Value> {
    Json(json!({
        "cores": 8,
        "physical_cores": 4,
        "memory_gb": 16.0,
        "recommended_threads": {"min": 1, "max": 8, "optimal": 4},
        "max_threads": 32
    }))
}

async fn start_mining(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Response {
    state.start_requests.lock().unwrap().push(body.clone());

    if state.failing.load(Ordering::SeqCst) {
        let detail = json!({"detail": "Failed to start mining: wallet node unreachable"});
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(detail)).into_response();
    }

    if body["mode"] == "pool" && body.get("pool_username").is_none() {
        let detail = json!({"detail": [{"loc": ["body", "pool_username"], "msg": "Pool username required"}]});
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(detail)).into_response();
    }
    if state.mining.swap(true, Ordering::SeqCst) {
        return (StatusCode::BAD_REQUEST, Json(json!({"detail": "Mining already running"}))).into_response();
    }

    Json(json!({"success": true, "message": "Mining started"})).into_response()
}

async fn stop_mining(State(state): State<Arc<FakeState>>) -> Response {
    if state.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    }
    if !state.mining.swap(false, Ordering::SeqCst) {
        return (StatusCode::BAD_REQUEST, Json(json!({"detail": "Mining not running"}))).into_response();
    }

    Json(json!({"success": true, "message": "Mining stopped"})).into_response()
}

async fn push_channel(ws: WebSocketUpgrade, State(state): State<Arc<FakeState>>) -> Response {
    ws.on_upgrade(move |socket| forward_frames(socket, state))
}

async fn forward_frames(mut socket: WebSocket, state: Arc<FakeState>) {
    let mut frames = state.push.subscribe();
    state.ws_connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) if frame == CLOSE_FRAME => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                Ok(frame) => {
                    if socket.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => {
                if !matches!(incoming, Some(Ok(_))) {
                    break;
                }
            }
        }
    }
}
