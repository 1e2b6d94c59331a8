/**
 * CONFIGURATION FLOTILLE - Modèle YAML + résolution des configs workers
 *
 * RÔLE :
 * Charge le fichier de configuration du service (control.yaml) et
 * construit les payloads de configuration envoyés aux workers distants.
 *
 * FONCTIONNEMENT :
 * - Fichier YAML via FLOTILLE_CONTROL_CONFIG, repli sur défauts sinon
 * - Résolution pure : defaults ← overrides véhicule (l'override gagne)
 * - Développement des marqueurs "all" en listes de classes, puis
 *   injection des champs globaux (broker, attaque, détection, rewards)
 *
 * ASYMÉTRIE ASSUMÉE : pour anomaly_classes = "all", un producer émet
 * les classes 0..=18 (la classe 0 est le trafic normal) alors qu'un
 * consumer n'apprend que 1..=18. Les tests verrouillent cet écart.
 */
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;

use crate::models::WorkerCategory;

pub const ANOMALY_CLASS_COUNT: i64 = 19;
pub const DIAGNOSTIC_CLASS_COUNT: i64 = 15;

/// Config résolue d'un worker : mapping plat, entièrement concret,
/// sérialisable tel quel sur le fil.
pub type WorkerConfig = Map<String, Value>;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ControlConfig {
    pub logging_level: String,
    pub mode: String,
    /// Port de l'API de contrôle, réinjecté aux workers (manager_port).
    pub manager_port: u16,
    /// Port de l'API HTTP exposée par chaque worker.
    pub worker_api_port: u16,
    /// Étiquette de run, utilisée dans les chemins de modèles sauvegardés.
    pub run_label: String,
    pub topic_refresh_interval_secs: u64,
    pub cache_max_len: usize,
    /// Le dashboard est derrière un proxy : les consumers doivent
    /// court-circuiter les réglages proxy du système.
    pub proxy: bool,
    pub vehicles: Vec<VehicleEntry>,
    /// Adresses directes connues, par nom de worker (candidat de repli).
    pub worker_addresses: HashMap<String, String>,
    pub default_vehicle_config: Map<String, Value>,
    pub default_consumer_config: Map<String, Value>,
    pub broker: BrokerConf,
    pub probe: ProbeConf,
    pub detection: DetectionConf,
    pub security: SecurityConf,
    pub attack: AttackConf,
}

/// Entrée véhicule : soit un nom nu, soit `nom: {overrides}`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum VehicleEntry {
    Name(String),
    Detailed(HashMap<String, Map<String, Value>>),
}

impl VehicleEntry {
    pub fn name(&self) -> &str {
        match self {
            VehicleEntry::Name(n) => n,
            VehicleEntry::Detailed(m) => m.keys().next().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn overrides(&self) -> Option<&Map<String, Value>> {
        match self {
            VehicleEntry::Name(_) => None,
            VehicleEntry::Detailed(m) => m.values().next(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConf {
    pub url: String,
    /// Driver broker : "memory" est fourni, toute autre valeur doit
    /// correspondre à un binding branché derrière le trait BrokerConsumer.
    pub driver: String,
    pub group_id: String,
    pub auto_offset_reset: String,
    pub allow_auto_create_topics: bool,
}

impl Default for BrokerConf {
    fn default() -> Self {
        Self {
            url: "kafka:9092".into(),
            driver: "memory".into(),
            group_id: "flotille-dashboard".into(),
            auto_offset_reset: "earliest".into(),
            allow_auto_create_topics: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeConf {
    pub request_timeout_secs: u64,
    pub candidate_timeout_secs: u64,
    pub overall_timeout_secs: u64,
    pub poll_interval_secs: u64,
    /// Délai avant le premier sondage, appliqué aux consumers seulement
    /// (leur API met quelques secondes à se lever après le conteneur).
    pub initial_delay_secs: u64,
}

impl Default for ProbeConf {
    fn default() -> Self {
        Self {
            request_timeout_secs: 5,
            candidate_timeout_secs: 20,
            overall_timeout_secs: 60,
            poll_interval_secs: 2,
            initial_delay_secs: 2,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DetectionConf {
    pub input_dim: u32,
    pub output_dim: u32,
    pub h_dim: u32,
    pub num_layers: u32,
    pub layer_norm: bool,
}

impl Default for DetectionConf {
    fn default() -> Self {
        Self {
            input_dim: 30,
            output_dim: 19,
            h_dim: 128,
            num_layers: 2,
            layer_norm: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConf {
    pub probe_metrics: Vec<Value>,
    pub mitigation: bool,
    pub true_positive_reward: f64,
    pub false_positive_reward: f64,
    pub true_negative_reward: f64,
    pub false_negative_reward: f64,
}

impl Default for SecurityConf {
    fn default() -> Self {
        Self {
            probe_metrics: vec![
                json!("cpu_percent"),
                json!("memory_percent"),
                json!("bytes_sent"),
                json!("bytes_recv"),
                json!("ping_latency_ms"),
            ],
            mitigation: false,
            true_positive_reward: 1.0,
            false_positive_reward: -1.0,
            true_negative_reward: 1.0,
            false_negative_reward: -1.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AttackConf {
    pub target_ip: String,
    pub target_port: u16,
    pub bot_port: u16,
    pub duration: u64,
    pub packet_size: u64,
    pub delay: f64,
}

impl Default for AttackConf {
    fn default() -> Self {
        Self {
            target_ip: "172.18.0.4".into(),
            target_port: 80,
            bot_port: 5002,
            duration: 0,
            packet_size: 1024,
            delay: 0.001,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            logging_level: "info".into(),
            mode: "simulation".into(),
            manager_port: 8080,
            worker_api_port: 5000,
            run_label: "baseline".into(),
            topic_refresh_interval_secs: 10,
            cache_max_len: 100,
            proxy: false,
            vehicles: Vec::new(),
            worker_addresses: HashMap::new(),
            default_vehicle_config: default_vehicle_map(),
            default_consumer_config: default_consumer_map(),
            broker: BrokerConf::default(),
            probe: ProbeConf::default(),
            detection: DetectionConf::default(),
            security: SecurityConf::default(),
            attack: AttackConf::default(),
        }
    }
}

fn default_vehicle_map() -> Map<String, Value> {
    let v = json!({
        "kafka_broker": "kafka:9092",
        "probe_frequency_seconds": 2,
        "ping_thread_timeout": 5,
        "ping_host": "www.google.com",
        "mu_anomalies": 157,
        "mu_normal": 115,
        "alpha": 0.2,
        "beta": 1.9,
        "time_emulation": false,
        "anomaly_classes": "all",
        "diagnostics_classes": "all",
    });
    v.as_object().cloned().unwrap_or_default()
}

fn default_consumer_map() -> Map<String, Value> {
    let v = json!({
        "kafka_broker": "kafka:9092",
        "buffer_size": 1000,
        "batch_size": 32,
        "weights_push_freq_seconds": 30,
        "weights_pull_freq_seconds": 30,
        "learning_rate": 0.001,
        "epoch_size": 32,
        "dropout": 0.2,
        "optimizer": "adam",
        "training_freq_seconds": 5,
        "save_model_freq_epochs": 10,
        "anomaly_classes": "all",
        "diagnostics_classes": "all",
    });
    v.as_object().cloned().unwrap_or_default()
}

async fn read_config(path: &str) -> anyhow::Result<ControlConfig> {
    let txt = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {path}"))?;
    if txt.trim().is_empty() {
        return Ok(ControlConfig::default());
    }
    serde_yaml::from_str(&txt).with_context(|| format!("Failed to parse {path}"))
}

pub async fn load_config() -> ControlConfig {
    let path = std::env::var("FLOTILLE_CONTROL_CONFIG").unwrap_or_else(|_| "control.yaml".into());
    if !Path::new(&path).exists() {
        tracing::warn!("pas de {path}, usage config par défaut");
        return ControlConfig::default();
    }
    match read_config(&path).await {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("config inutilisable: {e:#}");
            ControlConfig::default()
        }
    }
}

/// Fusion superficielle : chaque clé de `overrides` remplace celle des
/// `defaults`. Fonction pure, sans I/O.
pub fn resolve(defaults: &Map<String, Value>, overrides: &Map<String, Value>) -> WorkerConfig {
    let mut merged = defaults.clone();
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

fn class_list(range: std::ops::Range<i64>) -> Value {
    Value::Array(range.map(Value::from).collect())
}

/// Liste de classes d'anomalies pour le marqueur "all". Les producers
/// incluent la classe 0 (trafic normal), les consumers non.
pub fn anomaly_class_labels(category: WorkerCategory) -> Value {
    match category {
        WorkerCategory::Producer => class_list(0..ANOMALY_CLASS_COUNT),
        WorkerCategory::Consumer => class_list(1..ANOMALY_CLASS_COUNT),
    }
}

pub fn diagnostic_class_labels() -> Value {
    class_list(1..DIAGNOSTIC_CLASS_COUNT)
}

/// Développe les marqueurs "all" en listes concrètes. Une liste
/// explicite passe inchangée ; une clé absente reçoit le développement
/// par défaut de la catégorie.
pub fn expand_class_labels(config: &mut WorkerConfig, category: WorkerCategory) {
    let expand = |current: Option<&Value>, expanded: Value| -> Option<Value> {
        match current {
            Some(Value::String(s)) if s == "all" => Some(expanded),
            Some(_) => None,
            None => Some(expanded),
        }
    };
    if let Some(v) = expand(
        config.get("anomaly_classes"),
        anomaly_class_labels(category),
    ) {
        config.insert("anomaly_classes".into(), v);
    }
    if let Some(v) = expand(config.get("diagnostics_classes"), diagnostic_class_labels()) {
        config.insert("diagnostics_classes".into(), v);
    }
}

/// Config résolue d'un véhicule pour une catégorie : défauts de la
/// catégorie ← overrides du véhicule, classes développées.
pub fn resolved_vehicle_config(
    cfg: &ControlConfig,
    vehicle: &str,
    category: WorkerCategory,
) -> WorkerConfig {
    let defaults = match category {
        WorkerCategory::Producer => cfg.default_vehicle_config.clone(),
        WorkerCategory::Consumer => {
            let mut d = cfg.default_consumer_config.clone();
            d.insert(
                "kafka_topic_update_interval_secs".into(),
                json!(cfg.topic_refresh_interval_secs),
            );
            d
        }
    };
    let empty = Map::new();
    let overrides = cfg
        .vehicles
        .iter()
        .find(|v| v.name() == vehicle)
        .and_then(|v| v.overrides())
        .unwrap_or(&empty);
    let mut resolved = resolve(&defaults, overrides);
    expand_class_labels(&mut resolved, category);
    resolved
}

fn pick(resolved: &Map<String, Value>, key: &str, default: Value) -> Value {
    resolved.get(key).cloned().unwrap_or(default)
}

/// Payload /configure d'un producer : config véhicule résolue + champs
/// globaux (réseau, attaque, timing, génération de données).
pub fn build_producer_payload(
    cfg: &ControlConfig,
    vehicle: &str,
    resolved: &WorkerConfig,
) -> WorkerConfig {
    let mut p = Map::new();
    p.insert("vehicle_name".into(), json!(vehicle));
    p.insert(
        "kafka_broker".into(),
        pick(resolved, "kafka_broker", json!(cfg.broker.url)),
    );
    p.insert("logging_level".into(), json!(cfg.logging_level));
    p.insert("manager_port".into(), json!(cfg.manager_port));
    p.insert("mode".into(), json!(cfg.mode));

    p.insert("target_ip".into(), json!(cfg.attack.target_ip));
    p.insert("target_port".into(), json!(cfg.attack.target_port));
    p.insert("bot_port".into(), json!(cfg.attack.bot_port));

    p.insert(
        "probe_frequency_seconds".into(),
        pick(resolved, "probe_frequency_seconds", json!(2)),
    );
    p.insert(
        "ping_thread_timeout".into(),
        pick(resolved, "ping_thread_timeout", json!(5)),
    );
    p.insert(
        "ping_host".into(),
        pick(resolved, "ping_host", json!("www.google.com")),
    );

    p.insert("duration".into(), json!(cfg.attack.duration));
    p.insert("packet_size".into(), json!(cfg.attack.packet_size));
    p.insert("delay".into(), json!(cfg.attack.delay));

    p.insert("mu_anomalies".into(), pick(resolved, "mu_anomalies", json!(157)));
    p.insert("mu_normal".into(), pick(resolved, "mu_normal", json!(115)));
    p.insert("alpha".into(), pick(resolved, "alpha", json!(0.2)));
    p.insert("beta".into(), pick(resolved, "beta", json!(1.9)));
    p.insert(
        "time_emulation".into(),
        pick(resolved, "time_emulation", json!(false)),
    );

    p.insert(
        "probe_metrics".into(),
        Value::Array(cfg.security.probe_metrics.clone()),
    );

    p.insert(
        "anomaly_classes".into(),
        pick(
            resolved,
            "anomaly_classes",
            anomaly_class_labels(WorkerCategory::Producer),
        ),
    );
    p.insert(
        "diagnostics_classes".into(),
        pick(resolved, "diagnostics_classes", diagnostic_class_labels()),
    );
    p
}

fn value_as_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Payload /configure d'un consumer : hyper-paramètres d'entraînement,
/// dimensions du modèle, rewards, et drapeaux optionnels uniquement
/// quand ils sont actifs.
pub fn build_consumer_payload(
    cfg: &ControlConfig,
    vehicle: &str,
    resolved: &WorkerConfig,
) -> WorkerConfig {
    let mut p = Map::new();
    p.insert(
        "kafka_broker".into(),
        pick(resolved, "kafka_broker", json!(cfg.broker.url)),
    );
    p.insert("buffer_size".into(), pick(resolved, "buffer_size", json!(1000)));
    p.insert("batch_size".into(), pick(resolved, "batch_size", json!(32)));
    p.insert("logging_level".into(), json!(cfg.logging_level));
    p.insert(
        "weights_push_freq_seconds".into(),
        pick(resolved, "weights_push_freq_seconds", json!(30)),
    );
    p.insert(
        "weights_pull_freq_seconds".into(),
        pick(resolved, "weights_pull_freq_seconds", json!(30)),
    );
    p.insert(
        "kafka_topic_update_interval_secs".into(),
        pick(
            resolved,
            "kafka_topic_update_interval_secs",
            json!(cfg.topic_refresh_interval_secs),
        ),
    );
    p.insert(
        "learning_rate".into(),
        pick(resolved, "learning_rate", json!(0.001)),
    );
    p.insert("epoch_size".into(), pick(resolved, "epoch_size", json!(32)));
    p.insert("input_dim".into(), json!(cfg.detection.input_dim));
    p.insert("output_dim".into(), json!(cfg.detection.output_dim));
    p.insert("h_dim".into(), json!(cfg.detection.h_dim));
    p.insert("num_layers".into(), json!(cfg.detection.num_layers));
    p.insert("dropout".into(), pick(resolved, "dropout", json!(0.2)));
    p.insert("optimizer".into(), pick(resolved, "optimizer", json!("adam")));
    p.insert(
        "training_freq_seconds".into(),
        pick(resolved, "training_freq_seconds", json!(5)),
    );
    p.insert(
        "save_model_freq_epochs".into(),
        pick(resolved, "save_model_freq_epochs", json!(10)),
    );
    p.insert(
        "model_saving_path".into(),
        json!(format!("{vehicle}_{}_model.pth", cfg.run_label)),
    );
    p.insert(
        "probe_metrics".into(),
        Value::Array(
            cfg.security
                .probe_metrics
                .iter()
                .map(|m| json!(value_as_string(m)))
                .collect(),
        ),
    );
    p.insert("mode".into(), json!(cfg.mode));
    p.insert("manager_port".into(), json!(cfg.manager_port));
    p.insert(
        "true_positive_reward".into(),
        json!(cfg.security.true_positive_reward),
    );
    p.insert(
        "false_positive_reward".into(),
        json!(cfg.security.false_positive_reward),
    );
    p.insert(
        "true_negative_reward".into(),
        json!(cfg.security.true_negative_reward),
    );
    p.insert(
        "false_negative_reward".into(),
        json!(cfg.security.false_negative_reward),
    );

    if cfg.security.mitigation {
        p.insert("mitigation".into(), json!(true));
    }
    if cfg.proxy {
        p.insert("no_proxy_host".into(), json!(true));
    }
    if cfg.detection.layer_norm {
        p.insert("layer_norm".into(), json!(true));
    }
    p
}

/// Payload complet d'un worker : résolution + développement + builder
/// de la catégorie. Les clés du résultat sont sérialisables telles
/// quelles (Map JSON par construction).
pub fn build_worker_payload(
    cfg: &ControlConfig,
    vehicle: &str,
    category: WorkerCategory,
) -> WorkerConfig {
    let resolved = resolved_vehicle_config(cfg, vehicle, category);
    match category {
        WorkerCategory::Producer => build_producer_payload(cfg, vehicle, &resolved),
        WorkerCategory::Consumer => build_consumer_payload(cfg, vehicle, &resolved),
    }
}
