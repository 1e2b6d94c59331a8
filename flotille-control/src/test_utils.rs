/*!
Support de test interne : un routeur enregistreur branché derrière la
boucle de consommation. Dispatches et tentatives horodatés, échecs
scriptés pour exercer les chemins de redémarrage.

Contrainte de placement : l'impl de `MessageRouter` doit viser le crate
sous test. Depuis un crate dépendant, le target lib-test verrait une
seconde instance du crate et le trait ne s'unifierait pas.
*/
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::router::MessageRouter;

/// Routeur de test : enregistre chaque dispatch et peut échouer sur
/// demande. Chaque tentative est horodatée, échecs compris, ce qui rend
/// les délais de redémarrage observables.
pub struct RecordingRouter {
    routed: Mutex<Vec<(String, Value)>>,
    attempts: Mutex<Vec<Instant>>,
    fail_budget: AtomicUsize,
}

impl RecordingRouter {
    pub fn new() -> Self {
        Self {
            routed: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            fail_budget: AtomicUsize::new(0),
        }
    }

    /// Les `n` prochains dispatchs échoueront.
    pub fn fail_next(&self, n: usize) {
        self.fail_budget.fetch_add(n, Ordering::SeqCst);
    }

    /// Messages routés avec succès, dans l'ordre d'arrivée.
    pub fn routed(&self) -> Vec<(String, Value)> {
        self.routed.lock().clone()
    }

    /// Horodatage de chaque tentative de dispatch, échecs compris.
    pub fn attempt_instants(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    /// Dernier message routé sur un topic, désérialisé.
    pub fn last_routed_from<T>(&self, topic: &str) -> anyhow::Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let routed = self.routed.lock();
        match routed.iter().rev().find(|(t, _)| t == topic) {
            Some((_, payload)) => Ok(Some(serde_json::from_value(payload.clone())?)),
            None => Ok(None),
        }
    }

    /// Attente bornée jusqu'à `count` messages routés.
    pub async fn wait_for_routed(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.routed.lock().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Attente bornée jusqu'à `count` tentatives, échecs compris.
    pub async fn wait_for_attempts(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.attempts.lock().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Default for RecordingRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageRouter for RecordingRouter {
    async fn route(&self, topic: &str, payload: Value) -> anyhow::Result<()> {
        self.attempts.lock().push(Instant::now());
        if self
            .fail_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            tracing::debug!(topic = %topic, "scripted dispatch failure");
            anyhow::bail!("scripted dispatch failure");
        }
        self.routed.lock().push((topic.to_string(), payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn dispatches_through_the_router_seam() {
        let router = Arc::new(RecordingRouter::new());
        let seam: Arc<dyn MessageRouter> = router.clone();
        seam.route("car1_anomalies", json!({"class": 3}))
            .await
            .unwrap();
        seam.route(
            "car1_statistics",
            json!({"total_messages": 10, "anomalies_messages": 2}),
        )
        .await
        .unwrap();

        assert!(router.wait_for_routed(2, Duration::from_millis(100)).await);
        let routed = router.routed();
        assert_eq!(routed[0].0, "car1_anomalies");
        assert_eq!(routed[1].1["total_messages"], 10);

        let stats: Option<Value> = router.last_routed_from("car1_statistics").unwrap();
        assert_eq!(stats.unwrap()["anomalies_messages"], 2);
    }

    #[tokio::test]
    async fn scripted_failures_consume_the_budget_then_stop() {
        let router = RecordingRouter::new();
        router.fail_next(1);
        assert!(router.route("t", json!({})).await.is_err());
        assert!(router.route("t", json!({})).await.is_ok());
        assert_eq!(router.attempt_instants().len(), 2);
        assert_eq!(router.routed().len(), 1);
    }
}
