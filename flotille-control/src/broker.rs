/**
 * BROKER FLOTILLE - Couture de consommation broker
 *
 * RÔLE :
 * Ce module définit la surface broker CONSOMMÉE par le service (listing
 * de topics, souscription par patterns, poll borné, fermeture) sans
 * posséder l'administration du broker lui-même.
 *
 * FONCTIONNEMENT :
 * - Trait async BrokerConsumer : le binding concret (client Kafka ou
 *   autre) se branche derrière ce trait
 * - PollOutcome étiqueté : chaque issue de poll est classifiable par la
 *   boucle de consommation sans inspection de chaînes d'erreur
 * - MemoryBroker : driver en mémoire complet (auto-création de topics,
 *   patterns ^.*_suffixe$, injection d'issues scriptées) pour le mode
 *   dev et la suite de tests
 *
 * UTILITÉ DANS FLOTILLE :
 * 🎯 Consommation : la boucle ne dépend que du trait, jamais du binding
 * 🎯 Tests : scénarios broker reproductibles sans infrastructure
 * 🎯 Dev : cargo run fonctionne sans broker externe
 */
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::BrokerConf;
use crate::{new_state, Shared};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker metadata query failed: {0}")]
    Metadata(String),
    #[error("Broker subscription failed: {0}")]
    Subscription(String),
    #[error("Broker poll failed: {0}")]
    Poll(String),
    #[error("Consumer already closed")]
    Closed,
}

/// Réglages transmis au binding broker (groupe de consommation, reprise
/// d'offset, auto-création de topics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub url: String,
    pub group_id: String,
    pub auto_offset_reset: String,
    pub allow_auto_create_topics: bool,
}

impl From<&BrokerConf> for BrokerSettings {
    fn from(conf: &BrokerConf) -> Self {
        Self {
            url: conf.url.clone(),
            group_id: conf.group_id.clone(),
            auto_offset_reset: conf.auto_offset_reset.clone(),
            allow_auto_create_topics: conf.allow_auto_create_topics,
        }
    }
}

/// Un enregistrement brut tel que remonté par le broker. La
/// désérialisation JSON appartient à la boucle de consommation.
#[derive(Debug, Clone)]
pub struct BrokerRecord {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Issue étiquetée d'un poll borné. Tout ce qu'un broker peut remonter
/// tient dans une variante, aucune ne termine le process.
#[derive(Debug)]
pub enum PollOutcome {
    /// Rien à consommer dans la fenêtre du poll.
    Idle,
    Record(BrokerRecord),
    /// Fin d'une partition, purement informatif.
    PartitionEof { topic: String },
    /// Topic inconnu du broker ; `name` peut être l'écho d'un pattern
    /// de souscription tant qu'aucun topic concret ne le matche.
    UnknownTopic { name: String },
    Err(BrokerError),
    Closed,
}

#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Listing complet des topics visibles.
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError>;
    /// (Re)souscription par liste de patterns, idempotente, valide même
    /// sans aucun topic existant.
    async fn subscribe(&self, patterns: &[String]) -> Result<(), BrokerError>;
    /// Attente bornée d'au plus un enregistrement.
    async fn poll(&self, timeout: Duration) -> PollOutcome;
    /// Libère le handle ; les polls suivants rendent `Closed`.
    async fn close(&self);
}

const MEMORY_POLL_STEP: Duration = Duration::from_millis(10);

struct MemoryInner {
    topics: BTreeMap<String, VecDeque<Vec<u8>>>,
    patterns: Vec<String>,
    subscriptions: Vec<Vec<String>>,
    injected: VecDeque<PollOutcome>,
    closed: bool,
}

/// Driver broker en mémoire. Les topics sont auto-créés à la
/// publication (selon les réglages) et les patterns de forme
/// `^.*_suffixe$` sont résolus par suffixe.
pub struct MemoryBroker {
    settings: BrokerSettings,
    inner: Shared<MemoryInner>,
}

impl MemoryBroker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            settings,
            inner: new_state(MemoryInner {
                topics: BTreeMap::new(),
                patterns: Vec::new(),
                subscriptions: Vec::new(),
                injected: VecDeque::new(),
                closed: false,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BrokerSettings::from(&BrokerConf::default()))
    }

    pub fn create_topic(&self, name: &str) {
        self.inner
            .lock()
            .topics
            .entry(name.to_string())
            .or_default();
    }

    pub fn publish_raw(&self, topic: &str, payload: Vec<u8>) {
        let mut inner = self.inner.lock();
        if !inner.topics.contains_key(topic) && !self.settings.allow_auto_create_topics {
            tracing::debug!(topic, "publish dropped, auto-create disabled");
            return;
        }
        inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .push_back(payload);
    }

    pub fn publish_json(&self, topic: &str, value: &serde_json::Value) {
        self.publish_raw(topic, value.to_string().into_bytes());
    }

    /// Scripte la prochaine issue de poll (erreurs, EOF partition,
    /// topic inconnu) avant tout enregistrement en file.
    pub fn inject_outcome(&self, outcome: PollOutcome) {
        self.inner.lock().injected.push_back(outcome);
    }

    /// Historique des appels subscribe, dans l'ordre.
    pub fn subscription_calls(&self) -> Vec<Vec<String>> {
        self.inner.lock().subscriptions.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    fn pattern_matches(pattern: &str, topic: &str) -> bool {
        // seules les formes ^.*{suffixe}$ circulent ici
        match pattern.strip_prefix("^.*").and_then(|p| p.strip_suffix('$')) {
            Some(suffix) => topic.ends_with(suffix),
            None => pattern == topic,
        }
    }

    fn try_next(&self) -> Option<PollOutcome> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Some(PollOutcome::Closed);
        }
        if let Some(outcome) = inner.injected.pop_front() {
            return Some(outcome);
        }
        let patterns = inner.patterns.clone();
        for (topic, queue) in inner.topics.iter_mut() {
            if patterns.iter().any(|p| Self::pattern_matches(p, topic)) {
                if let Some(payload) = queue.pop_front() {
                    return Some(PollOutcome::Record(BrokerRecord {
                        topic: topic.clone(),
                        payload,
                    }));
                }
            }
        }
        None
    }
}

#[async_trait]
impl BrokerConsumer for MemoryBroker {
    async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(BrokerError::Closed);
        }
        Ok(inner.topics.keys().cloned().collect())
    }

    async fn subscribe(&self, patterns: &[String]) -> Result<(), BrokerError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(BrokerError::Closed);
        }
        inner.subscriptions.push(patterns.to_vec());
        inner.patterns = patterns.to_vec();
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> PollOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.try_next() {
                return outcome;
            }
            let now = Instant::now();
            if now >= deadline {
                return PollOutcome::Idle;
            }
            tokio::time::sleep(MEMORY_POLL_STEP.min(deadline - now)).await;
        }
    }

    async fn close(&self) {
        self.inner.lock().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn broker() -> MemoryBroker {
        MemoryBroker::with_defaults()
    }

    #[test]
    fn suffix_patterns_match_topic_names() {
        assert!(MemoryBroker::pattern_matches(
            "^.*_anomalies$",
            "car1_anomalies"
        ));
        assert!(!MemoryBroker::pattern_matches(
            "^.*_anomalies$",
            "car1_statistics"
        ));
        assert!(MemoryBroker::pattern_matches("exact", "exact"));
    }

    #[tokio::test]
    async fn publish_then_poll_yields_record_then_idle() {
        let b = broker();
        b.subscribe(&["^.*_anomalies$".to_string()]).await.unwrap();
        b.publish_json("car1_anomalies", &json!({"class": 3}));
        match b.poll(Duration::from_millis(50)).await {
            PollOutcome::Record(rec) => {
                assert_eq!(rec.topic, "car1_anomalies");
                let v: serde_json::Value = serde_json::from_slice(&rec.payload).unwrap();
                assert_eq!(v["class"], 3);
            }
            other => panic!("expected record, got {other:?}"),
        }
        assert!(matches!(
            b.poll(Duration::from_millis(20)).await,
            PollOutcome::Idle
        ));
    }

    #[tokio::test]
    async fn unmatched_topics_are_not_polled() {
        let b = broker();
        b.subscribe(&["^.*_statistics$".to_string()]).await.unwrap();
        b.publish_json("car1_anomalies", &json!({}));
        assert!(matches!(
            b.poll(Duration::from_millis(20)).await,
            PollOutcome::Idle
        ));
    }

    #[tokio::test]
    async fn injected_outcomes_surface_before_records() {
        let b = broker();
        b.subscribe(&["^.*_anomalies$".to_string()]).await.unwrap();
        b.publish_json("car1_anomalies", &json!({}));
        b.inject_outcome(PollOutcome::PartitionEof {
            topic: "car1_anomalies".into(),
        });
        assert!(matches!(
            b.poll(Duration::from_millis(20)).await,
            PollOutcome::PartitionEof { .. }
        ));
        assert!(matches!(
            b.poll(Duration::from_millis(20)).await,
            PollOutcome::Record(_)
        ));
    }

    #[tokio::test]
    async fn closed_broker_reports_closed_everywhere() {
        let b = broker();
        b.close().await;
        assert!(matches!(
            b.poll(Duration::from_millis(10)).await,
            PollOutcome::Closed
        ));
        assert!(b.list_topics().await.is_err());
        assert!(b.subscribe(&[]).await.is_err());
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn subscribe_without_topics_is_accepted() {
        let b = broker();
        assert!(b
            .subscribe(&["^.*_normal_data$".to_string()])
            .await
            .is_ok());
        assert_eq!(b.subscription_calls().len(), 1);
    }
}
