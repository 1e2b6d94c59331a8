/**
 * ROUTEUR DE MESSAGES - Destination des enregistrements consommés
 *
 * RÔLE :
 * La boucle de consommation transfère chaque payload désérialisé ici,
 * de façon synchrone : la propriété du payload passe au routeur, la
 * boucle n'applique aucune contre-pression au-delà de son poll borné.
 *
 * FONCTIONNEMENT :
 * - anomalies → caches "anomalies" + "all"
 * - données normales → caches "diagnostics" + "all"
 * - statistiques → métriques par véhicule uniquement
 * - topic hors convention → compté et ignoré
 */
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::MessageCache;
use crate::metrics::FleetMetrics;
use crate::topics::TopicCategory;
use crate::Shared;

#[async_trait]
pub trait MessageRouter: Send + Sync {
    async fn route(&self, topic: &str, payload: Value) -> Result<()>;
}

pub struct FleetRouter {
    cache: Shared<MessageCache>,
    metrics: Shared<FleetMetrics>,
    dropped: AtomicU64,
}

impl FleetRouter {
    pub fn new(cache: Shared<MessageCache>, metrics: Shared<FleetMetrics>) -> Self {
        Self {
            cache,
            metrics,
            dropped: AtomicU64::new(0),
        }
    }

    /// Nombre de messages ignorés faute de catégorie reconnue.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageRouter for FleetRouter {
    async fn route(&self, topic: &str, payload: Value) -> Result<()> {
        match TopicCategory::of(topic) {
            Some(TopicCategory::Anomalies) => {
                let mut cache = self.cache.lock();
                cache.add("anomalies", payload.clone());
                cache.add("all", payload);
            }
            Some(TopicCategory::NormalData) => {
                let mut cache = self.cache.lock();
                cache.add("diagnostics", payload.clone());
                cache.add("all", payload);
            }
            Some(TopicCategory::Statistics) => {
                self.metrics.lock().process_stat_message(topic, &payload);
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(topic = %topic, "message outside topic conventions dropped");
            }
        }
        Ok(())
    }
}
