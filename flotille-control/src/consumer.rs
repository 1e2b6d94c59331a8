/**
 * BOUCLE DE CONSOMMATION - Lecture broker classifiée + refresh topics
 *
 * RÔLE :
 * Deux tâches tokio : l'une consomme le broker en polls bornés d'au
 * plus un enregistrement, l'autre rafraîchit périodiquement le set de
 * topics. Aucune issue de poll, aucun payload malformé, aucune erreur
 * broker ne termine le process.
 *
 * FONCTIONNEMENT :
 * - classification par match sur PollOutcome : Idle silencieux, EOF
 *   partition en info, topic inconnu égal à un pattern configuré en
 *   info ("pas encore de producteurs"), autre erreur en error, puis
 *   la boucle continue
 * - payload indécodable : journalisé, jeté, boucle intacte
 * - erreur du routeur = chemin fatal : backoff exponentiel plafonné,
 *   dont l'état PERSISTE entre les redémarrages de boucle et ne se
 *   réinitialise qu'après un dispatch réussi
 * - signal d'arrêt (canal watch) observé à chaque frontière de poll et
 *   de sleep ; la sortie de boucle libère le handle broker
 */
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::broker::{BrokerConsumer, PollOutcome};
use crate::config::ControlConfig;
use crate::router::MessageRouter;
use crate::topics::{TopicCategory, TopicTracker};
use crate::{new_state, Shared};

#[derive(Debug, Clone)]
pub struct ConsumerTuning {
    pub poll_timeout: Duration,
    pub refresh_interval: Duration,
    pub retry_initial: Duration,
    pub retry_max: Duration,
}

impl Default for ConsumerTuning {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(10),
            retry_initial: Duration::from_secs(1),
            retry_max: Duration::from_secs(60),
        }
    }
}

impl ConsumerTuning {
    pub fn from_config(cfg: &ControlConfig) -> Self {
        Self {
            refresh_interval: Duration::from_secs(cfg.topic_refresh_interval_secs),
            ..Self::default()
        }
    }
}

/// Backoff exponentiel borné. Contrairement à un délai réarmé à chaque
/// entrée de boucle, l'état survit aux redémarrages : des crashs en
/// rafale attendent de plus en plus longtemps, jusqu'au plafond.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Délai à appliquer maintenant ; le prochain double, plafonné.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

/// État observable de la consommation, exposé par l'API santé.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsumerStatus {
    pub running: bool,
    pub topics_tracked: usize,
    pub records_routed: u64,
    pub deserialize_failures: u64,
    pub loop_restarts: u64,
}

pub struct StreamConsumer {
    stop_tx: watch::Sender<bool>,
    consume_task: JoinHandle<()>,
    refresh_task: JoinHandle<()>,
    status: Shared<ConsumerStatus>,
}

impl StreamConsumer {
    /// Souscription initiale par patterns (valide même sans topics),
    /// premier refresh, puis lancement des deux tâches.
    pub async fn spawn(
        broker: Arc<dyn BrokerConsumer>,
        router: Arc<dyn MessageRouter>,
        tuning: ConsumerTuning,
    ) -> Self {
        if let Err(e) = broker.subscribe(&TopicCategory::patterns()).await {
            tracing::warn!(error = %e, "initial subscription failed, refresh cycles will retry");
        }
        let mut tracker = TopicTracker::new();
        match tracker.refresh(broker.as_ref()).await {
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "initial topic listing failed"),
        }

        let status = new_state(ConsumerStatus {
            running: true,
            topics_tracked: tracker.topic_count(),
            ..ConsumerStatus::default()
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let refresh_task = tokio::spawn(refresh_loop(
            broker.clone(),
            tracker,
            tuning.refresh_interval,
            stop_rx.clone(),
            status.clone(),
        ));
        let consume_task = tokio::spawn(consume_loop(
            broker,
            router,
            tuning,
            stop_rx,
            status.clone(),
        ));
        Self {
            stop_tx,
            consume_task,
            refresh_task,
            status,
        }
    }

    pub fn status(&self) -> ConsumerStatus {
        self.status.lock().clone()
    }

    /// Handle partagé sur l'état, pour l'API santé.
    pub fn status_handle(&self) -> Shared<ConsumerStatus> {
        self.status.clone()
    }

    /// Arrêt ordonné : signal, puis attente des deux tâches. La boucle
    /// de consommation libère le handle broker en sortant.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.refresh_task.await {
            tracing::warn!("refresh task join error: {e}");
        }
        if let Err(e) = self.consume_task.await {
            tracing::warn!("consumption task join error: {e}");
        }
    }
}

async fn refresh_loop(
    broker: Arc<dyn BrokerConsumer>,
    mut tracker: TopicTracker,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    status: Shared<ConsumerStatus>,
) {
    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = sleep(interval) => {}
        }
        match tracker.refresh(broker.as_ref()).await {
            Ok(new_topics) => {
                status.lock().topics_tracked = tracker.topic_count();
                if !new_topics.is_empty() {
                    tracing::info!(count = new_topics.len(), "subscription refreshed for new topics");
                }
            }
            // cycle avalé, le prochain retentera
            Err(e) => tracing::warn!(error = %e, "topic refresh cycle failed"),
        }
    }
    tracing::debug!("topic refresh loop stopped");
}

async fn consume_loop(
    broker: Arc<dyn BrokerConsumer>,
    router: Arc<dyn MessageRouter>,
    tuning: ConsumerTuning,
    mut stop: watch::Receiver<bool>,
    status: Shared<ConsumerStatus>,
) {
    let mut backoff = Backoff::new(tuning.retry_initial, tuning.retry_max);
    'main: loop {
        if *stop.borrow() {
            break;
        }
        let outcome = tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break 'main;
                }
                continue;
            }
            outcome = broker.poll(tuning.poll_timeout) => outcome,
        };
        match outcome {
            PollOutcome::Idle => continue,
            PollOutcome::PartitionEof { topic } => {
                tracing::info!(topic = %topic, "end of partition reached");
            }
            PollOutcome::UnknownTopic { name } if TopicCategory::is_pattern_echo(&name) => {
                // le broker renvoie le pattern tant qu'aucun topic ne le matche
                tracing::info!("no producing vehicles yet, topics will appear with the first one");
            }
            PollOutcome::UnknownTopic { name } => {
                tracing::error!(topic = %name, "broker reported an unknown topic");
            }
            PollOutcome::Err(e) => {
                tracing::error!(error = %e, "consumer error");
            }
            PollOutcome::Closed => break 'main,
            PollOutcome::Record(record) => {
                let payload: Value = match serde_json::from_slice(&record.payload) {
                    Ok(v) => v,
                    Err(e) => {
                        status.lock().deserialize_failures += 1;
                        tracing::warn!(topic = %record.topic, error = %e, "undecodable payload dropped");
                        continue;
                    }
                };
                match router.route(&record.topic, payload).await {
                    Ok(()) => {
                        status.lock().records_routed += 1;
                        backoff.reset();
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        status.lock().loop_restarts += 1;
                        tracing::error!(topic = %record.topic, error = %e, "dispatch failed, loop will restart");
                        tracing::info!(delay_ms = delay.as_millis() as u64, "retrying after backoff");
                        tokio::select! {
                            changed = stop.changed() => {
                                if changed.is_err() || *stop.borrow() {
                                    break 'main;
                                }
                            }
                            _ = sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }
    // libération inconditionnelle du handle en sortie de boucle
    broker.close().await;
    status.lock().running = false;
    tracing::debug!("consumption loop stopped, broker handle released");
}
