use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::topics::TopicCategory;

/// Compteurs cumulés d'un véhicule, alimentés par ses messages de
/// statistiques.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VehicleCounters {
    pub total_messages: i64,
    pub anomalies_messages: i64,
    pub normal_messages: i64,
}

/// Agrégation des statistiques de la flotte. Chaque message de
/// statistiques incrémente les compteurs du véhicule émetteur ; un
/// champ absent ou non numérique compte pour zéro.
#[derive(Debug, Default)]
pub struct FleetMetrics {
    per_vehicle: HashMap<String, VehicleCounters>,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Traite un message de statistiques. Le nom de véhicule vient du
    /// message, sinon du préfixe du topic, sinon "unknown_vehicle".
    pub fn process_stat_message(&mut self, topic: &str, msg: &Value) {
        let vehicle = msg
            .get("vehicle_name")
            .and_then(Value::as_str)
            .or_else(|| TopicCategory::vehicle_of(topic))
            .unwrap_or("unknown_vehicle")
            .to_string();
        tracing::debug!(vehicle = %vehicle, "processing statistics message");

        let counters = self.per_vehicle.entry(vehicle).or_default();
        counters.total_messages += numeric(msg, "total_messages");
        counters.anomalies_messages += numeric(msg, "anomalies_messages");
        counters.normal_messages += numeric(msg, "normal_messages");
    }

    pub fn snapshot(&self) -> HashMap<String, VehicleCounters> {
        self.per_vehicle.clone()
    }

    pub fn vehicle_count(&self) -> usize {
        self.per_vehicle.len()
    }
}

fn numeric(msg: &Value, key: &str) -> i64 {
    msg.get(key).and_then(Value::as_i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counters_accumulate_per_vehicle() {
        let mut metrics = FleetMetrics::new();
        metrics.process_stat_message(
            "car1_statistics",
            &json!({"vehicle_name": "car1", "total_messages": 10, "anomalies_messages": 2, "normal_messages": 8}),
        );
        metrics.process_stat_message(
            "car1_statistics",
            &json!({"vehicle_name": "car1", "total_messages": 5, "anomalies_messages": 1, "normal_messages": 4}),
        );
        let snap = metrics.snapshot();
        assert_eq!(snap["car1"].total_messages, 15);
        assert_eq!(snap["car1"].anomalies_messages, 3);
        assert_eq!(snap["car1"].normal_messages, 12);
    }

    #[test]
    fn missing_fields_count_as_zero() {
        let mut metrics = FleetMetrics::new();
        metrics.process_stat_message(
            "car2_statistics",
            &json!({"vehicle_name": "car2", "total_messages": "not-a-number"}),
        );
        let snap = metrics.snapshot();
        assert_eq!(snap["car2"].total_messages, 0);
        assert_eq!(snap["car2"].anomalies_messages, 0);
    }

    #[test]
    fn vehicle_name_falls_back_to_topic_prefix() {
        let mut metrics = FleetMetrics::new();
        metrics.process_stat_message("car3_statistics", &json!({"total_messages": 1}));
        assert!(metrics.snapshot().contains_key("car3"));

        metrics.process_stat_message("oddball", &json!({"total_messages": 1}));
        assert!(metrics.snapshot().contains_key("unknown_vehicle"));
    }
}
