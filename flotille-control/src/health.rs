use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::cache::MessageCache;
use crate::consumer::ConsumerStatus;
use crate::fleet::FleetManager;
use crate::models::WorkerPhase;
use crate::Shared;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: String,
    pub uptime_seconds: u64,
    pub workers_total: u32,
    pub workers_running: u32,
    pub workers_failed: u32,
    pub cached_messages: usize,
    pub memory_usage_mb: f32,
    pub consumer: ConsumerStatus,
}

#[derive(Clone)]
pub struct ControlHealth {
    start_time: Instant,
}

impl ControlHealth {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn get_health(
        &self,
        fleet: &FleetManager,
        consumer: &Shared<ConsumerStatus>,
        cache: &Shared<MessageCache>,
    ) -> SystemHealth {
        let uptime = self.start_time.elapsed().as_secs();
        let counts = fleet.phase_counts();
        let total: usize = counts.values().sum();
        let running = counts.get(&WorkerPhase::Running).copied().unwrap_or(0);
        let failed = counts.get(&WorkerPhase::Failed).copied().unwrap_or(0);
        let consumer = consumer.lock().clone();
        let cached = cache.lock().len("all");

        SystemHealth {
            status: if failed > 0 { "degraded" } else { "ok" }.to_string(),
            uptime_seconds: uptime,
            workers_total: total as u32,
            workers_running: running as u32,
            workers_failed: failed as u32,
            cached_messages: cached,
            memory_usage_mb: process_rss_mb(),
            consumer,
        }
    }
}

impl Default for ControlHealth {
    fn default() -> Self {
        Self::new()
    }
}

fn process_rss_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        let path = format!("/proc/{}/status", std::process::id());
        if let Ok(status) = std::fs::read_to_string(path) {
            let kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|value| value.parse::<u64>().ok());
            if let Some(kb) = kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlConfig;
    use crate::{new_state, Shared};
    use serde_json::json;

    fn fleet_with(vehicles: &[&str]) -> FleetManager {
        let mut cfg = ControlConfig::default();
        cfg.vehicles = vehicles
            .iter()
            .map(|v| crate::config::VehicleEntry::Name(v.to_string()))
            .collect();
        FleetManager::from_config(cfg)
    }

    fn empty_consumer() -> Shared<ConsumerStatus> {
        new_state(ConsumerStatus::default())
    }

    #[test]
    fn idle_fleet_reports_ok() {
        let fleet = fleet_with(&["car1"]);
        let cache = new_state(MessageCache::new(10));
        let health = ControlHealth::new().get_health(&fleet, &empty_consumer(), &cache);
        assert_eq!(health.status, "ok");
        assert_eq!(health.workers_total, 2);
        assert_eq!(health.workers_running, 0);
        assert_eq!(health.workers_failed, 0);
        assert_eq!(health.cached_messages, 0);
    }

    #[test]
    fn failed_worker_degrades_status() {
        let fleet = fleet_with(&["car1"]);
        {
            let registry = fleet.registry();
            let mut registry = registry.lock();
            let state = registry.get_mut("car1_producer").unwrap();
            state.transition(WorkerPhase::Failed);
        }
        let cache = new_state(MessageCache::new(10));
        let health = ControlHealth::new().get_health(&fleet, &empty_consumer(), &cache);
        assert_eq!(health.status, "degraded");
        assert_eq!(health.workers_failed, 1);
    }

    #[test]
    fn consumer_counters_and_cache_depth_flow_through() {
        let fleet = fleet_with(&[]);
        let consumer = empty_consumer();
        {
            let mut status = consumer.lock();
            status.running = true;
            status.records_routed = 7;
            status.topics_tracked = 3;
        }
        let cache = new_state(MessageCache::new(10));
        cache.lock().add("all", json!({"class": 1}));
        let health = ControlHealth::new().get_health(&fleet, &consumer, &cache);
        assert!(health.consumer.running);
        assert_eq!(health.consumer.records_routed, 7);
        assert_eq!(health.consumer.topics_tracked, 3);
        assert_eq!(health.cached_messages, 1);
    }
}
