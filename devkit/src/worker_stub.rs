/*!
Stub HTTP de worker pour développement sans flotte

Permet de développer et tester le control sans démarrer un seul worker
réel. Sert l'API complète d'un worker (/health, /configure, /start,
/status, /stop, /config) avec un comportement scriptable à la pièce, et
enregistre les appels reçus pour les assertions.
*/

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Comportement d'un stub : corps de santé, corps de statut, et codes
/// de refus optionnels sur /configure et /stop.
#[derive(Debug, Clone)]
pub struct StubBehavior {
    health_body: Value,
    status_body: Value,
    configure_status: u16,
    stop_status: u16,
}

impl StubBehavior {
    /// Producer sain. /health porte les marqueurs producer (valeurs à
    /// false, comme un vrai worker avant démarrage).
    pub fn producer() -> Self {
        Self {
            health_body: json!({"running": false, "config_loaded": false, "vehicle": "stub"}),
            status_body: json!({"running": true, "config_loaded": true, "vehicle": "stub"}),
            configure_status: 200,
            stop_status: 200,
        }
    }

    /// Consumer sain, marqueurs consumer.
    pub fn consumer() -> Self {
        Self {
            health_body: json!({"running": false, "configured": false}),
            status_body: json!({"running": true, "configured": true}),
            configure_status: 200,
            stop_status: 200,
        }
    }

    /// Une 200 JSON sans aucun marqueur, comme un autre service qui
    /// répondrait sur le même port.
    pub fn markerless_health(mut self) -> Self {
        self.health_body = json!({"note": "dashboard placeholder"});
        self
    }

    /// /configure répondra avec ce statut HTTP.
    pub fn reject_configure(mut self, status: u16) -> Self {
        self.configure_status = status;
        self
    }

    /// /stop répondra avec ce statut HTTP.
    pub fn reject_stop(mut self, status: u16) -> Self {
        self.stop_status = status;
        self
    }
}

struct StubState {
    behavior: StubBehavior,
    calls: Mutex<Vec<String>>,
    last_config: Mutex<Option<Value>>,
    last_update: Mutex<Option<Value>>,
}

impl StubState {
    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

/// Worker HTTP simulé sur un port éphémère local.
pub struct StubWorker {
    addr: SocketAddr,
    state: Arc<StubState>,
    server: JoinHandle<()>,
}

impl StubWorker {
    pub async fn spawn(behavior: StubBehavior) -> Self {
        env_logger::try_init().ok(); // Init logging pour tests
        let state = Arc::new(StubState {
            behavior,
            calls: Mutex::new(Vec::new()),
            last_config: Mutex::new(None),
            last_update: Mutex::new(None),
        });
        let app = Router::new()
            .route("/health", get(health))
            .route("/configure", post(configure))
            .route("/start", post(start))
            .route("/status", get(status))
            .route("/stop", post(stop))
            .route("/config", put(update_config))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub worker");
        let addr = listener.local_addr().expect("stub local addr");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        log::info!("🤖 [STUB] worker API on {addr}");
        Self {
            addr,
            state,
            server,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Adresse `ip:port`, le format des worker_addresses de la config.
    pub fn authority(&self) -> String {
        self.addr.to_string()
    }

    /// Appels reçus dans l'ordre. Les sondes /health ne sont pas
    /// comptées : seul le protocole de pilotage intéresse les tests.
    pub fn call_order(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }

    /// Dernier payload reçu sur POST /configure.
    pub fn last_config(&self) -> Option<Value> {
        self.state.last_config.lock().unwrap().clone()
    }

    /// Dernier patch reçu sur PUT /config.
    pub fn last_update(&self) -> Option<Value> {
        self.state.last_update.lock().unwrap().clone()
    }

    pub fn shutdown(self) {
        self.server.abort();
    }
}

async fn health(State(state): State<Arc<StubState>>) -> Json<Value> {
    Json(state.behavior.health_body.clone())
}

async fn configure(
    State(state): State<Arc<StubState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record("configure");
    *state.last_config.lock().unwrap() = Some(body);
    respond(state.behavior.configure_status, "configured")
}

async fn start(State(state): State<Arc<StubState>>) -> (StatusCode, Json<Value>) {
    state.record("start");
    respond(200, "started")
}

async fn status(State(state): State<Arc<StubState>>) -> Json<Value> {
    state.record("status");
    Json(state.behavior.status_body.clone())
}

async fn stop(State(state): State<Arc<StubState>>) -> (StatusCode, Json<Value>) {
    state.record("stop");
    respond(state.behavior.stop_status, "stopped")
}

async fn update_config(
    State(state): State<Arc<StubState>>,
    Json(patch): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.record("config");
    *state.last_update.lock().unwrap() = Some(patch);
    respond(200, "updated")
}

fn respond(status: u16, ok_label: &str) -> (StatusCode, Json<Value>) {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if code.is_success() {
        (code, Json(json!({"status": ok_label})))
    } else {
        (code, Json(json!({"detail": "rejected by stub"})))
    }
}

/// Helper pour fabriquer des messages broker réalistes côté tests.
pub struct FleetMessageBuilder;

impl FleetMessageBuilder {
    /// Anomalie détectée, telle qu'émise sur `{vehicule}_anomalies`.
    pub fn anomaly(vehicle: &str, class_label: u32, score: f64) -> Value {
        json!({
            "vehicle_name": vehicle,
            "class": class_label,
            "score": score,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Relevé sain, tel qu'émis sur `{vehicule}_normal_data`.
    pub fn normal_reading(vehicle: &str, packet_size: u64) -> Value {
        json!({
            "vehicle_name": vehicle,
            "packet_size": packet_size,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Compteurs cumulés, tels qu'émis sur `{vehicule}_statistics`.
    pub fn statistics(vehicle: &str, total: i64, anomalies: i64, normal: i64) -> Value {
        json!({
            "vehicle_name": vehicle,
            "total_messages": total,
            "anomalies_messages": anomalies,
            "normal_messages": normal,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }
}
