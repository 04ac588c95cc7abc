//! in-process fake controller: rig directory, snapshot, data history and
//! the live / system websockets, served by axum on an ephemeral port.

#![allow(dead_code)]

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{Json, Response},
    routing::get,
    Router,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const RIG: &str = "Fermenter";

#[derive(Clone)]
struct Fake {
    commands: mpsc::UnboundedSender<String>,
    system: mpsc::UnboundedSender<String>,
    flaky_connections: Arc<AtomicUsize>,
    flaky_active: Arc<AtomicUsize>,
    flaky_max_active: Arc<AtomicUsize>,
}

pub struct FakeController {
    pub base_url: String,
    /// frames received on the rig's live socket
    pub commands: mpsc::UnboundedReceiver<String>,
    /// frames received on the system socket
    pub system: mpsc::UnboundedReceiver<String>,
    flaky_connections: Arc<AtomicUsize>,
    flaky_max_active: Arc<AtomicUsize>,
}

impl FakeController {
    pub async fn spawn() -> Self {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (system_tx, system) = mpsc::unbounded_channel();
        let fake = Fake {
            commands: commands_tx,
            system: system_tx,
            flaky_connections: Arc::new(AtomicUsize::new(0)),
            flaky_active: Arc::new(AtomicUsize::new(0)),
            flaky_max_active: Arc::new(AtomicUsize::new(0)),
        };
        let flaky_connections = fake.flaky_connections.clone();
        let flaky_max_active = fake.flaky_max_active.clone();

        let app = Router::new()
            .route("/rigs", get(rigs))
            .route("/rigs/:name", get(snapshot))
            .route("/rigs/:name/datahistory", get(history))
            .route("/rigs/:name/ws", get(live_ws))
            .route("/flaky/ws", get(flaky_ws))
            .route("/controllers/System/ws", get(system_ws))
            .with_state(fake);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            commands,
            system,
            flaky_connections,
            flaky_max_active,
        }
    }

    pub fn rig_url(&self) -> String {
        format!("{}/rigs/{}", self.base_url, RIG)
    }

    pub fn live_ws_url(&self) -> String {
        format!("{}/rigs/{}/ws", self.base_url.replacen("http", "ws", 1), RIG)
    }

    pub fn system_ws_url(&self) -> String {
        format!("{}/controllers/System/ws", self.base_url.replacen("http", "ws", 1))
    }

    pub fn flaky_ws_url(&self) -> String {
        format!("{}/flaky/ws", self.base_url.replacen("http", "ws", 1))
    }

    pub fn flaky_connections(&self) -> usize {
        self.flaky_connections.load(Ordering::SeqCst)
    }

    pub fn flaky_max_active(&self) -> usize {
        self.flaky_max_active.load(Ordering::SeqCst)
    }
}

pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

async fn rigs() -> Json<Value> {
    Json(json!({ RIG: { "url": format!("/rigs/{}", RIG) } }))
}

async fn snapshot(Path(name): Path<String>) -> Json<Value> {
    Json(json!({
        "name": name,
        "temperature": 66.0,
        "w1temperature": 64.0,
        "gravity": 1.012,
        "abv": 6.3,
        "atten": 80.0,
        "power": 0,
        "enabled": true,
        "automatic": false,
        "setpoint": 65.0,
        "heater_power": 0,
        "heater_enabled": false,
        "heater_automatic": false,
        "heater_setpoint": 60.0,
        "wsUrl": format!("/rigs/{}/ws", name),
    }))
}

/// three points: two hours, thirty minutes and one minute ago
async fn history() -> Json<Value> {
    let now = now_secs();
    Json(json!({
        "label": [now - 7200.0, now - 1800.0, now - 60.0],
        "gravity": [1.050, 1.030, 1.012],
        "temperature": [68.0, 67.0, 66.0],
        "ograv": [1.060, 1.060, 1.060],
    }))
}

async fn live_ws(ws: WebSocketUpgrade, State(fake): State<Fake>) -> Response {
    ws.on_upgrade(move |socket| live_session(socket, fake))
}

/// sends one patch, then answers every command with the fields it changed.
/// power is reported back as 50 whatever was asked for.
async fn live_session(mut socket: WebSocket, fake: Fake) {
    let hello = json!({"temperature": 66.2, "gravity": 1.011});
    if socket.send(Message::Text(hello.to_string())).await.is_err() {
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let _ = fake.commands.send(text.clone());

        let Ok(Value::Object(command)) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let prefix = match command.get("controller").and_then(Value::as_str) {
            Some("Heater") => "heater_",
            _ => "",
        };
        let mut patch = Map::new();
        for (key, value) in command.iter().filter(|(k, _)| k.as_str() != "controller") {
            let value = if key == "power" { json!(50) } else { value.clone() };
            patch.insert(format!("{}{}", prefix, key), value);
        }
        if socket
            .send(Message::Text(Value::Object(patch).to_string()))
            .await
            .is_err()
        {
            return;
        }
    }
}

async fn flaky_ws(ws: WebSocketUpgrade, State(fake): State<Fake>) -> Response {
    ws.on_upgrade(move |socket| flaky_session(socket, fake))
}

/// one patch, then a close frame. the session counts as active until the
/// client side is gone, so an overlapping reconnect shows up in max_active.
async fn flaky_session(mut socket: WebSocket, fake: Fake) {
    fake.flaky_connections.fetch_add(1, Ordering::SeqCst);
    let active = fake.flaky_active.fetch_add(1, Ordering::SeqCst) + 1;
    fake.flaky_max_active.fetch_max(active, Ordering::SeqCst);

    let _ = socket.send(Message::Text(json!({"power": 100}).to_string())).await;
    let _ = socket.send(Message::Close(None)).await;
    while let Some(Ok(_)) = socket.recv().await {}

    fake.flaky_active.fetch_sub(1, Ordering::SeqCst);
}

async fn system_ws(ws: WebSocketUpgrade, State(fake): State<Fake>) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        while let Some(Ok(msg)) = socket.recv().await {
            if let Message::Text(text) = msg {
                let _ = fake.system.send(text);
            }
        }
    })
}
