/**
 * ORCHESTRATEUR DE FLOTTE - Démarrage/arrêt coordonné des workers
 *
 * RÔLE :
 * Énumère la flotte depuis la configuration (un producer + un consumer
 * par véhicule), pilote les séquences de démarrage en parallèle et
 * tient le registre d'état consulté par l'API.
 *
 * FONCTIONNEMENT :
 * - start_all : une future par worker, issues strictement indépendantes,
 *   l'échec d'un worker ne touche jamais les autres
 * - stop_all : tentative d'arrêt INCONDITIONNELLE de chaque worker
 *   énuméré, quel que soit l'état enregistré
 * - chaque opération de flotte porte un identifiant uuid pour corréler
 *   les logs et les réponses API
 */
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{build_worker_payload, ControlConfig};
use crate::models::{
    FleetMap, StartOutcome, WorkerCategory, WorkerHandle, WorkerPhase, WorkerState,
};
use crate::probe::ProbePolicy;
use crate::workers::{WorkerClient, WorkerError};
use crate::{new_state, Shared};

pub struct FleetManager {
    cfg: ControlConfig,
    client: Arc<WorkerClient>,
    registry: Shared<FleetMap>,
}

impl FleetManager {
    pub fn from_config(cfg: ControlConfig) -> Self {
        let client = WorkerClient::new(ProbePolicy::from(&cfg.probe));
        Self::with_client(cfg, client)
    }

    /// Constructeur à client injecté (délais de sonde raccourcis en
    /// test, timeouts spécifiques).
    pub fn with_client(cfg: ControlConfig, client: WorkerClient) -> Self {
        let mut map = FleetMap::new();
        for entry in &cfg.vehicles {
            for category in [WorkerCategory::Producer, WorkerCategory::Consumer] {
                let handle = enumerate_handle(&cfg, entry.name(), category);
                map.insert(handle.name.clone(), WorkerState::new(handle));
            }
        }
        Self {
            cfg,
            client: Arc::new(client),
            registry: new_state(map),
        }
    }

    pub fn registry(&self) -> Shared<FleetMap> {
        self.registry.clone()
    }

    pub fn worker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Adresse à utiliser pour les wrappers one-shot : l'URL retenue au
    /// démarrage si connue, sinon la primaire.
    pub fn endpoint_of(&self, name: &str) -> Option<String> {
        let registry = self.registry.lock();
        let state = registry.get(name)?;
        Some(
            state
                .selected_url
                .clone()
                .unwrap_or_else(|| state.handle.primary_url().to_string()),
        )
    }

    fn ordered_handles(&self) -> Vec<WorkerHandle> {
        let registry = self.registry.lock();
        let mut handles: Vec<WorkerHandle> =
            registry.values().map(|s| s.handle.clone()).collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        handles
    }

    /// Démarre toute la flotte. Rend l'identifiant d'opération et une
    /// issue par worker, dans l'ordre des noms.
    pub async fn start_all(&self) -> (String, Vec<StartOutcome>) {
        let op_id = Uuid::new_v4().to_string();
        let handles = self.ordered_handles();
        tracing::info!(op = %op_id, workers = handles.len(), "fleet start requested");

        {
            let mut registry = self.registry.lock();
            for handle in &handles {
                if let Some(state) = registry.get_mut(&handle.name) {
                    state.transition(WorkerPhase::Starting);
                }
            }
        }

        let tasks = handles.into_iter().map(|handle| {
            let client = self.client.clone();
            let payload = build_worker_payload(&self.cfg, &handle.vehicle, handle.category);
            async move {
                let result = client.start_sequence(&handle, &payload).await;
                StartOutcome {
                    worker: handle.name,
                    result,
                }
            }
        });
        let outcomes = join_all(tasks).await;

        {
            let mut registry = self.registry.lock();
            for outcome in &outcomes {
                if let Some(state) = registry.get_mut(&outcome.worker) {
                    match &outcome.result {
                        Ok(url) => {
                            state.selected_url = Some(url.clone());
                            state.last_error = None;
                            state.transition(WorkerPhase::Running);
                        }
                        Err(e) => {
                            state.last_error = Some(e.to_string());
                            state.transition(WorkerPhase::Failed);
                        }
                    }
                }
            }
        }

        let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
        tracing::info!(
            op = %op_id,
            started = outcomes.len() - failed,
            failed,
            "fleet start finished"
        );
        for outcome in outcomes.iter().filter(|o| !o.succeeded()) {
            if let Err(e) = &outcome.result {
                tracing::warn!(op = %op_id, worker = %outcome.worker, error = %e, "worker failed to start");
            }
        }
        (op_id, outcomes)
    }

    /// Arrête toute la flotte, sans condition sur les phases. Rend les
    /// noms de workers pour lesquels un arrêt a été tenté.
    pub async fn stop_all(&self) -> (String, Vec<String>) {
        let op_id = Uuid::new_v4().to_string();
        let handles = self.ordered_handles();
        let names: Vec<String> = handles.iter().map(|h| h.name.clone()).collect();
        tracing::info!(op = %op_id, workers = names.len(), "fleet stop requested");

        let tasks = handles.iter().map(|handle| self.client.stop(handle));
        join_all(tasks).await;

        {
            let mut registry = self.registry.lock();
            for name in &names {
                if let Some(state) = registry.get_mut(name) {
                    state.transition(WorkerPhase::Stopped);
                }
            }
        }
        tracing::info!(op = %op_id, "fleet stop finished");
        (op_id, names)
    }

    /// Statut one-shot d'un worker. `None` si le nom est inconnu.
    pub async fn fetch_worker_status(&self, name: &str) -> Option<Result<Value, WorkerError>> {
        let base = self.endpoint_of(name)?;
        Some(self.client.fetch_status(&base).await)
    }

    /// Mise à jour partielle one-shot de la config d'un worker.
    pub async fn update_worker_config(
        &self,
        name: &str,
        patch: &Value,
    ) -> Option<Result<(), WorkerError>> {
        let base = self.endpoint_of(name)?;
        Some(self.client.push_config_update(&base, patch).await)
    }

    pub fn phase_counts(&self) -> HashMap<WorkerPhase, usize> {
        let registry = self.registry.lock();
        let mut counts = HashMap::new();
        for state in registry.values() {
            *counts.entry(state.phase).or_insert(0) += 1;
        }
        counts
    }
}

fn enumerate_handle(cfg: &ControlConfig, vehicle: &str, category: WorkerCategory) -> WorkerHandle {
    let name = format!("{vehicle}{}", category.role_suffix());
    let direct = cfg.worker_addresses.get(&name).map(String::as_str);
    WorkerHandle::new(vehicle, category, cfg.worker_api_port, direct)
}
