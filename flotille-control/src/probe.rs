/**
 * SONDE SANTÉ FLOTILLE - Sélection de la première adresse API vivante
 *
 * RÔLE :
 * Un worker est joignable par plusieurs adresses candidates (nom d'hôte
 * réseau interne, adresse directe). La sonde parcourt les candidates
 * DANS L'ORDRE et rend la première dont l'API répond vraiment.
 *
 * FONCTIONNEMENT :
 * - GET /health répété à intervalle fixe, sous double échéance :
 *   par candidate + globale pour la sonde entière
 * - Vivant = HTTP 200 dont le JSON contient au moins une clé marqueur
 *   de la catégorie ; une 200 sans marqueur (page dashboard, JSON
 *   étranger répondant sur le même port) ne compte pas
 * - Erreurs réseau, timeouts, non-200 pendant le sondage : transitoires,
 *   journalisées en debug, jamais remontées
 * - Les consumers attendent initial_delay avant le premier sondage de
 *   chaque candidate, le temps que leur API se lève
 */
use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::ProbeConf;
use crate::models::{WorkerCategory, WorkerHandle};
use crate::workers::{build_http_client, WorkerError};

#[derive(Debug, Clone)]
pub struct ProbePolicy {
    pub request_timeout: Duration,
    pub candidate_timeout: Duration,
    pub overall_timeout: Duration,
    pub poll_interval: Duration,
    pub initial_delay: Duration,
}

impl From<&ProbeConf> for ProbePolicy {
    fn from(conf: &ProbeConf) -> Self {
        Self {
            request_timeout: Duration::from_secs(conf.request_timeout_secs),
            candidate_timeout: Duration::from_secs(conf.candidate_timeout_secs),
            overall_timeout: Duration::from_secs(conf.overall_timeout_secs),
            poll_interval: Duration::from_secs(conf.poll_interval_secs),
            initial_delay: Duration::from_secs(conf.initial_delay_secs),
        }
    }
}

pub struct HealthProbe {
    http: reqwest::Client,
    policy: ProbePolicy,
}

impl HealthProbe {
    pub fn new(policy: ProbePolicy) -> Self {
        Self::with_client(build_http_client(), policy)
    }

    pub fn with_client(http: reqwest::Client, policy: ProbePolicy) -> Self {
        Self { http, policy }
    }

    /// Première candidate vivante, dans l'ordre strict du handle.
    /// Toutes épuisées : `WorkerError::Unreachable`.
    pub async fn await_ready(&self, handle: &WorkerHandle) -> Result<String, WorkerError> {
        let overall_deadline = Instant::now() + self.policy.overall_timeout;
        for candidate in &handle.candidates {
            if handle.category == WorkerCategory::Consumer && !self.policy.initial_delay.is_zero()
            {
                sleep(self.policy.initial_delay).await;
            }
            let deadline =
                (Instant::now() + self.policy.candidate_timeout).min(overall_deadline);
            loop {
                if self.looks_alive(candidate, handle.category).await {
                    tracing::info!(worker = %handle.name, url = %candidate, "worker API healthy");
                    return Ok(candidate.clone());
                }
                if Instant::now() + self.policy.poll_interval > deadline {
                    break;
                }
                sleep(self.policy.poll_interval).await;
            }
            tracing::debug!(worker = %handle.name, url = %candidate, "candidate gave no healthy answer");
            if Instant::now() >= overall_deadline {
                break;
            }
        }
        Err(WorkerError::Unreachable {
            tried: handle.candidates.clone(),
        })
    }

    async fn looks_alive(&self, base: &str, category: WorkerCategory) -> bool {
        let url = format!("{base}/health");
        let sent = self
            .http
            .get(&url)
            .timeout(self.policy.request_timeout)
            .send()
            .await;
        match sent {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(Value::Object(body)) => category
                    .health_markers()
                    .iter()
                    .any(|key| body.contains_key(*key)),
                Ok(_) | Err(_) => false,
            },
            Ok(resp) => {
                tracing::debug!(url = %url, status = %resp.status(), "health endpoint not ready");
                false
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "health probe transient error");
                false
            }
        }
    }
}
