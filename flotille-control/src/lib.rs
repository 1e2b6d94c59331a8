/*!
# Flotille Control - Coordination de flotte + consommation broker

Service central pilotant une flotte de workers distants via HTTP :
- Producers : véhicules simulés émettant télémétrie vers le broker
- Consumers : workers de détection d'anomalies

Côté broker, le service suit un ensemble de topics qui grandit en
continu (un véhicule = de nouveaux topics) et consomme chaque
enregistrement sans jamais laisser une erreur broker ou un payload
malformé terminer le process.
*/

pub mod broker;
pub mod cache;
pub mod config;
pub mod consumer;
pub mod fleet;
pub mod health;
pub mod http;
pub mod metrics;
pub mod models;
pub mod probe;
pub mod router;
pub mod topics;
pub mod workers;

#[cfg(test)]
mod test_utils;

use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

pub use broker::{BrokerConsumer, BrokerError, BrokerRecord, MemoryBroker, PollOutcome};
pub use config::{load_config, ControlConfig, WorkerConfig};
pub use consumer::{ConsumerTuning, StreamConsumer};
pub use fleet::FleetManager;
pub use models::{StartOutcome, WorkerCategory, WorkerHandle, WorkerPhase};
pub use probe::{HealthProbe, ProbePolicy};
pub use router::{FleetRouter, MessageRouter};
pub use topics::{TopicCategory, TopicTracker};
pub use workers::{WorkerClient, WorkerError};
