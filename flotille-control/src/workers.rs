/**
 * CLIENT WORKER FLOTILLE - Pilotage HTTP d'un worker distant
 *
 * RÔLE :
 * Toutes les interactions HTTP avec l'API d'un worker passent ici :
 * séquence de démarrage (sonde → configure → start → verify), arrêt
 * avec repli d'adresse, et wrappers one-shot status/config.
 *
 * FONCTIONNEMENT :
 * - configure PRÉCÈDE toujours start : la séquence vit dans une seule
 *   méthode, aucun appelant ne peut la réordonner
 * - start envoie un objet JSON vide, le payload va dans configure
 * - stop : adresse primaire (nom) puis UNE tentative sur l'adresse
 *   directe ; les échecs d'arrêt sont journalisés, jamais remontés
 * - client HTTP sans proxy système (adresses Docker internes en 172.*)
 */
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::config::WorkerConfig;
use crate::models::WorkerHandle;
use crate::probe::{HealthProbe, ProbePolicy};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("No healthy API endpoint, tried {tried:?}")]
    Unreachable { tried: Vec<String> },
    #[error("{endpoint} rejected the request with HTTP {status}: {detail}")]
    Rejected {
        endpoint: String,
        status: u16,
        detail: String,
    },
    #[error("Transport failure on {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Délais par type d'appel, calqués sur le protocole worker.
#[derive(Debug, Clone)]
pub struct CallTimeouts {
    pub configure: Duration,
    pub start: Duration,
    pub status: Duration,
    pub stop: Duration,
    pub update: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            configure: Duration::from_secs(30),
            start: Duration::from_secs(30),
            status: Duration::from_secs(10),
            stop: Duration::from_secs(30),
            update: Duration::from_secs(30),
        }
    }
}

pub(crate) fn build_http_client() -> reqwest::Client {
    // trust_env coupé : un proxy d'entreprise ne doit pas intercepter
    // les appels vers le réseau interne
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("proxy-free HTTP client unavailable, using default: {e}");
            reqwest::Client::new()
        })
}

pub struct WorkerClient {
    http: reqwest::Client,
    probe: HealthProbe,
    timeouts: CallTimeouts,
}

impl WorkerClient {
    pub fn new(policy: ProbePolicy) -> Self {
        let http = build_http_client();
        Self {
            probe: HealthProbe::with_client(http.clone(), policy),
            http,
            timeouts: CallTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Séquence de démarrage complète d'un worker. Le premier échec
    /// interrompt la séquence et devient l'issue du worker ; rend
    /// l'adresse retenue en cas de succès.
    pub async fn start_sequence(
        &self,
        handle: &WorkerHandle,
        payload: &WorkerConfig,
    ) -> Result<String, WorkerError> {
        let base = self.probe.await_ready(handle).await?;
        self.configure(&base, payload).await?;
        self.start(&base).await?;
        if handle.category.verifies_status_after_start() {
            self.verify_status(&base).await?;
        }
        Ok(base)
    }

    pub async fn configure(
        &self,
        base: &str,
        payload: &WorkerConfig,
    ) -> Result<(), WorkerError> {
        self.post_json(
            &format!("{base}/configure"),
            &Value::Object(payload.clone()),
            self.timeouts.configure,
        )
        .await
    }

    pub async fn start(&self, base: &str) -> Result<(), WorkerError> {
        self.post_json(&format!("{base}/start"), &json!({}), self.timeouts.start)
            .await
    }

    pub async fn verify_status(&self, base: &str) -> Result<Value, WorkerError> {
        self.get_json(&format!("{base}/status"), self.timeouts.status)
            .await
    }

    /// Arrêt d'un worker. Ne rend jamais d'erreur : un échec d'arrêt
    /// n'empêche ni les autres arrêts ni la suite du service.
    pub async fn stop(&self, handle: &WorkerHandle) {
        let primary = format!("{}/stop", handle.primary_url());
        match self.post_json(&primary, &json!({}), self.timeouts.stop).await {
            Ok(()) => {
                tracing::info!(worker = %handle.name, "worker stopped");
                return;
            }
            Err(e) => {
                tracing::warn!(worker = %handle.name, error = %e, "stop failed on primary address");
            }
        }
        if let Some(fallback) = handle.fallback_url() {
            let url = format!("{fallback}/stop");
            match self.post_json(&url, &json!({}), self.timeouts.stop).await {
                Ok(()) => tracing::info!(worker = %handle.name, "worker stopped via direct address"),
                Err(e) => {
                    tracing::warn!(worker = %handle.name, error = %e, "stop failed on fallback address")
                }
            }
        }
    }

    /// Wrapper one-shot, sans retry ni ordonnancement.
    pub async fn fetch_status(&self, base: &str) -> Result<Value, WorkerError> {
        self.get_json(&format!("{base}/status"), self.timeouts.status)
            .await
    }

    /// Mise à jour partielle de configuration, one-shot.
    pub async fn push_config_update(
        &self,
        base: &str,
        patch: &Value,
    ) -> Result<(), WorkerError> {
        let url = format!("{base}/config");
        let resp = self
            .http
            .put(&url)
            .json(patch)
            .timeout(self.timeouts.update)
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                endpoint: url.clone(),
                source: e,
            })?;
        Self::reject_non_success(&url, resp).await?;
        Ok(())
    }

    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<(), WorkerError> {
        let resp = self
            .http
            .post(url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                endpoint: url.to_string(),
                source: e,
            })?;
        Self::reject_non_success(url, resp).await?;
        Ok(())
    }

    async fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, WorkerError> {
        let resp = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| WorkerError::Transport {
                endpoint: url.to_string(),
                source: e,
            })?;
        let resp = Self::reject_non_success(url, resp).await?;
        resp.json::<Value>()
            .await
            .map_err(|e| WorkerError::Transport {
                endpoint: url.to_string(),
                source: e,
            })
    }

    async fn reject_non_success(
        url: &str,
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, WorkerError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let detail = resp.text().await.unwrap_or_default();
        Err(WorkerError::Rejected {
            endpoint: url.to_string(),
            status: status.as_u16(),
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{WorkerCategory, WorkerHandle};
    use flotille_devkit::worker_stub::{StubBehavior, StubWorker};

    fn fast_policy() -> ProbePolicy {
        ProbePolicy {
            request_timeout: Duration::from_millis(200),
            candidate_timeout: Duration::from_millis(300),
            overall_timeout: Duration::from_millis(1500),
            poll_interval: Duration::from_millis(30),
            initial_delay: Duration::ZERO,
        }
    }

    fn handle_for(stub: &StubWorker, category: WorkerCategory) -> WorkerHandle {
        WorkerHandle {
            name: format!("car1{}", category.role_suffix()),
            vehicle: "car1".into(),
            category,
            candidates: vec![stub.base_url()],
        }
    }

    fn sample_payload() -> WorkerConfig {
        let mut m = WorkerConfig::new();
        m.insert("vehicle_name".into(), json!("car1"));
        m
    }

    #[tokio::test]
    async fn producer_sequence_is_configure_start_status() {
        let stub = StubWorker::spawn(StubBehavior::producer()).await;
        let client = WorkerClient::new(fast_policy());
        let handle = handle_for(&stub, WorkerCategory::Producer);
        let base = client
            .start_sequence(&handle, &sample_payload())
            .await
            .unwrap();
        assert_eq!(base, stub.base_url());
        assert_eq!(stub.call_order(), vec!["configure", "start", "status"]);
        assert_eq!(stub.last_config().unwrap()["vehicle_name"], json!("car1"));
        stub.shutdown();
    }

    #[tokio::test]
    async fn consumer_sequence_skips_status_verification() {
        let stub = StubWorker::spawn(StubBehavior::consumer()).await;
        let client = WorkerClient::new(fast_policy());
        let handle = handle_for(&stub, WorkerCategory::Consumer);
        client
            .start_sequence(&handle, &sample_payload())
            .await
            .unwrap();
        assert_eq!(stub.call_order(), vec!["configure", "start"]);
        stub.shutdown();
    }

    #[tokio::test]
    async fn rejected_configure_carries_status_and_detail() {
        let stub = StubWorker::spawn(StubBehavior::producer().reject_configure(500)).await;
        let client = WorkerClient::new(fast_policy());
        let handle = handle_for(&stub, WorkerCategory::Producer);
        match client.start_sequence(&handle, &sample_payload()).await {
            Err(WorkerError::Rejected { status, detail, .. }) => {
                assert_eq!(status, 500);
                assert!(!detail.is_empty());
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        // start ne doit jamais partir après un configure refusé
        assert_eq!(stub.call_order(), vec!["configure"]);
        stub.shutdown();
    }

    #[tokio::test]
    async fn stop_failure_is_swallowed() {
        let stub = StubWorker::spawn(StubBehavior::producer().reject_stop(500)).await;
        let client = WorkerClient::new(fast_policy());
        let handle = handle_for(&stub, WorkerCategory::Producer);
        client.stop(&handle).await;
        assert_eq!(stub.call_order(), vec!["stop"]);
        stub.shutdown();
    }

    #[tokio::test]
    async fn stop_falls_back_to_direct_address() {
        let stub = StubWorker::spawn(StubBehavior::producer()).await;
        let dead = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let port = l.local_addr().unwrap().port();
            drop(l);
            format!("http://127.0.0.1:{port}")
        };
        let handle = WorkerHandle {
            name: "car1_producer".into(),
            vehicle: "car1".into(),
            category: WorkerCategory::Producer,
            candidates: vec![dead, stub.base_url()],
        };
        let client = WorkerClient::new(fast_policy());
        client.stop(&handle).await;
        assert_eq!(stub.call_order(), vec!["stop"]);
        stub.shutdown();
    }
}
