use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;

use crate::workers::WorkerError;

/// Catégorie d'un worker distant : producer (véhicule simulé) ou
/// consumer (détection d'anomalies). Porte les asymétries de protocole
/// entre les deux rôles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerCategory {
    Producer,
    Consumer,
}

impl WorkerCategory {
    pub fn role_suffix(&self) -> &'static str {
        match self {
            WorkerCategory::Producer => "_producer",
            WorkerCategory::Consumer => "_consumer",
        }
    }

    /// Clés attendues dans la réponse /health pour considérer l'API du
    /// worker comme vivante. Une 200 sans aucune de ces clés (page
    /// dashboard, JSON étranger) ne compte pas.
    pub fn health_markers(&self) -> &'static [&'static str] {
        match self {
            WorkerCategory::Producer => &["running", "config_loaded", "vehicle"],
            WorkerCategory::Consumer => &["running", "configured"],
        }
    }

    /// Seuls les producers confirment le démarrage par un GET /status.
    pub fn verifies_status_after_start(&self) -> bool {
        matches!(self, WorkerCategory::Producer)
    }
}

impl fmt::Display for WorkerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerCategory::Producer => write!(f, "producer"),
            WorkerCategory::Consumer => write!(f, "consumer"),
        }
    }
}

/// Identité d'un worker énuméré depuis la configuration : nom
/// `{vehicule}_{rôle}` et adresses candidates ordonnées (nom d'hôte
/// d'abord, adresse directe ensuite si connue).
#[derive(Debug, Clone, Serialize)]
pub struct WorkerHandle {
    pub name: String,
    pub vehicle: String,
    pub category: WorkerCategory,
    pub candidates: Vec<String>,
}

impl WorkerHandle {
    /// `direct_addr` accepte `ip` (complétée par le port API commun)
    /// ou `ip:port`.
    pub fn new(
        vehicle: &str,
        category: WorkerCategory,
        api_port: u16,
        direct_addr: Option<&str>,
    ) -> Self {
        let name = format!("{vehicle}{}", category.role_suffix());
        let mut candidates = vec![format!("http://{name}:{api_port}")];
        if let Some(addr) = direct_addr {
            let authority = if addr.contains(':') {
                addr.to_string()
            } else {
                format!("{addr}:{api_port}")
            };
            candidates.push(format!("http://{authority}"));
        }
        Self {
            name,
            vehicle: vehicle.to_string(),
            category,
            candidates,
        }
    }

    /// Adresse primaire (basée sur le nom du worker).
    pub fn primary_url(&self) -> &str {
        self.candidates.first().map(String::as_str).unwrap_or("")
    }

    /// Adresse de repli directe, si configurée.
    pub fn fallback_url(&self) -> Option<&str> {
        self.candidates.get(1).map(String::as_str)
    }
}

/// Cycle de vie d'un worker vu du registre de flotte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerPhase {
    Idle,
    Starting,
    Running,
    Failed,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct WorkerState {
    pub handle: WorkerHandle,
    pub phase: WorkerPhase,
    pub selected_url: Option<String>,
    pub last_error: Option<String>,
    pub last_change: OffsetDateTime,
}

impl WorkerState {
    pub fn new(handle: WorkerHandle) -> Self {
        Self {
            handle,
            phase: WorkerPhase::Idle,
            selected_url: None,
            last_error: None,
            last_change: OffsetDateTime::now_utc(),
        }
    }

    pub fn transition(&mut self, phase: WorkerPhase) {
        self.phase = phase;
        self.last_change = OffsetDateTime::now_utc();
    }
}

pub type FleetMap = HashMap<String, WorkerState>;

/// Issue individuelle d'une séquence de démarrage : l'URL retenue en
/// cas de succès, sinon l'erreur qui a interrompu la séquence. Les
/// issues sont indépendantes entre workers.
#[derive(Debug)]
pub struct StartOutcome {
    pub worker: String,
    pub result: Result<String, WorkerError>,
}

impl StartOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_builds_name_then_direct_candidates() {
        let h = WorkerHandle::new("car1", WorkerCategory::Producer, 5000, Some("172.18.0.5"));
        assert_eq!(h.name, "car1_producer");
        assert_eq!(h.primary_url(), "http://car1_producer:5000");
        assert_eq!(h.fallback_url(), Some("http://172.18.0.5:5000"));
    }

    #[test]
    fn handle_without_direct_addr_has_single_candidate() {
        let h = WorkerHandle::new("car2", WorkerCategory::Consumer, 5000, None);
        assert_eq!(h.name, "car2_consumer");
        assert_eq!(h.candidates.len(), 1);
        assert!(h.fallback_url().is_none());
    }

    #[test]
    fn health_markers_differ_by_category() {
        assert!(WorkerCategory::Producer
            .health_markers()
            .contains(&"config_loaded"));
        assert!(WorkerCategory::Consumer
            .health_markers()
            .contains(&"configured"));
        assert!(!WorkerCategory::Consumer
            .health_markers()
            .contains(&"vehicle"));
    }
}
