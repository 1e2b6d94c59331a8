/**
 * API REST FLOTILLE - Serveur HTTP principal du control
 *
 * RÔLE :
 * Ce module expose l'API REST sécurisée du service de contrôle.
 * Interface principale entre dashboard/CLI et coordination de flotte.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum avec middleware auth API key
 * - Routes organisées : /health, /system, /fleet, /messages, /metrics
 * - Sérialisation JSON automatique des réponses
 * - Gestion erreurs HTTP standardisée (404, 401, 502...)
 *
 * UTILITÉ DANS FLOTILLE :
 * 🎯 Pilotage : démarrage/arrêt de la flotte entière en un appel
 * 🎯 Inspection : état local des workers + statut distant à la demande
 * 🎯 Dashboard : messages récents par catégorie, compteurs par véhicule
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 * - Validation côté middleware avant traitement métier
 * - Clé absente de l'environnement = tout accès refusé
 */

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::cache::{MessageCache, CACHE_NAMES};
use crate::consumer::ConsumerStatus;
use crate::fleet::FleetManager;
use crate::health::{ControlHealth, SystemHealth};
use crate::metrics::FleetMetrics;
use crate::models::{WorkerCategory, WorkerPhase, WorkerState};
use crate::Shared;

#[derive(serde::Serialize)]
struct WorkerView {
    name: String,
    vehicle: String,
    category: WorkerCategory,
    phase: WorkerPhase,
    api_url: String,
    last_error: Option<String>,
    last_change: String, // format RFC3339 pour l'API
    seconds_since_change: i64,
}

fn to_view(state: &WorkerState) -> WorkerView {
    let now = OffsetDateTime::now_utc();
    let age = now - state.last_change;
    WorkerView {
        name: state.handle.name.clone(),
        vehicle: state.handle.vehicle.clone(),
        category: state.handle.category,
        phase: state.phase,
        api_url: state
            .selected_url
            .clone()
            .unwrap_or_else(|| state.handle.primary_url().to_string()),
        last_error: state.last_error.clone(),
        last_change: state.last_change.format(&Rfc3339).unwrap_or_default(),
        seconds_since_change: age.whole_seconds().max(0),
    }
}

#[derive(serde::Serialize)]
struct StartResultView {
    worker: String,
    started: bool,
    api_url: Option<String>,
    error: Option<String>,
}

#[derive(serde::Serialize)]
struct StartResponse {
    operation_id: String,
    started: usize,
    failed: usize,
    results: Vec<StartResultView>,
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // Health check toujours accessible
    if path.starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("FLOTILLE_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        tracing::error!("FLOTILLE_API_KEY not set, API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<FleetManager>,
    pub cache: Shared<MessageCache>,
    pub metrics: Shared<FleetMetrics>,
    pub consumer: Shared<ConsumerStatus>,
    pub health_tracker: ControlHealth,
}

#[derive(Debug, Deserialize)]
struct MessagesParams {
    limit: Option<usize>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/fleet", get(get_fleet))
        .route("/fleet/start", post(start_fleet))
        .route("/fleet/stop", post(stop_fleet))
        .route("/fleet/{name}", get(get_worker))
        .route("/fleet/{name}/status", get(get_worker_status))
        .route("/fleet/{name}/config", axum::routing::put(put_worker_config))
        .route("/messages/{category}", get(get_messages))
        .route("/metrics/vehicles", get(get_vehicle_metrics))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

// GET /fleet (liste, état local)
async fn get_fleet(State(app): State<AppState>) -> Json<Vec<WorkerView>> {
    let registry = app.fleet.registry();
    let mut list: Vec<WorkerView> = registry.lock().values().map(to_view).collect();
    list.sort_by(|a, b| a.name.cmp(&b.name));
    Json(list)
}

// GET /fleet/{name} (détail, état local)
async fn get_worker(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WorkerView>, StatusCode> {
    let registry = app.fleet.registry();
    let map = registry.lock();
    let Some(state) = map.get(&name) else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(Json(to_view(state)))
}

// POST /fleet/start (toute la flotte, concurrent)
async fn start_fleet(State(app): State<AppState>) -> Json<StartResponse> {
    let (operation_id, outcomes) = app.fleet.start_all().await;
    let results: Vec<StartResultView> = outcomes
        .iter()
        .map(|o| StartResultView {
            worker: o.worker.clone(),
            started: o.succeeded(),
            api_url: o.result.as_ref().ok().cloned(),
            error: o.result.as_ref().err().map(|e| e.to_string()),
        })
        .collect();
    let started = results.iter().filter(|r| r.started).count();
    Json(StartResponse {
        operation_id,
        started,
        failed: results.len() - started,
        results,
    })
}

// POST /fleet/stop (inconditionnel, jamais d'échec)
async fn stop_fleet(State(app): State<AppState>) -> Json<serde_json::Value> {
    let (operation_id, stopped) = app.fleet.stop_all().await;
    Json(serde_json::json!({ "operation_id": operation_id, "stopped": stopped }))
}

// GET /fleet/{name}/status (statut distant, proxifié)
async fn get_worker_status(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match app.fleet.fetch_worker_status(&name).await {
        None => Err(StatusCode::NOT_FOUND),
        Some(Ok(status)) => Ok(Json(status)),
        Some(Err(e)) => {
            tracing::warn!(worker = %name, error = %e, "remote status fetch failed");
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

// PUT /fleet/{name}/config (patch de config à chaud)
async fn put_worker_config(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match app.fleet.update_worker_config(&name, &patch).await {
        None => Err(StatusCode::NOT_FOUND),
        Some(Ok(())) => Ok(Json(
            serde_json::json!({ "status": "updated", "worker": name }),
        )),
        Some(Err(e)) => {
            tracing::warn!(worker = %name, error = %e, "remote config update failed");
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

// GET /messages/{category}?limit=N (messages récents, plus ancien d'abord)
async fn get_messages(
    State(app): State<AppState>,
    Path(category): Path<String>,
    Query(params): Query<MessagesParams>,
) -> Result<Json<Vec<serde_json::Value>>, StatusCode> {
    if !CACHE_NAMES.contains(&category.as_str()) {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(app.cache.lock().recent(&category, params.limit)))
}

// GET /metrics/vehicles (compteurs cumulés par véhicule)
async fn get_vehicle_metrics(
    State(app): State<AppState>,
) -> Json<std::collections::HashMap<String, crate::metrics::VehicleCounters>> {
    Json(app.metrics.lock().snapshot())
}

// GET /system/health (état infrastructure)
async fn get_system_health(State(app): State<AppState>) -> Json<SystemHealth> {
    let health = app
        .health_tracker
        .get_health(&app.fleet, &app.consumer, &app.cache);
    Json(health)
}
