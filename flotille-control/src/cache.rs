use serde_json::Value;
use std::collections::{HashMap, VecDeque};

/// Flux nommés du cache : messages réels confondus, anomalies seules,
/// données normales (diagnostics).
pub const CACHE_NAMES: [&str; 3] = ["all", "anomalies", "diagnostics"];

/// Caches bornés des messages récents, par flux. Au-delà de `max_len`,
/// les plus anciens sortent.
#[derive(Debug)]
pub struct MessageCache {
    max_len: usize,
    buffers: HashMap<String, VecDeque<Value>>,
}

impl MessageCache {
    pub fn new(max_len: usize) -> Self {
        let buffers = CACHE_NAMES
            .iter()
            .map(|name| (name.to_string(), VecDeque::new()))
            .collect();
        Self { max_len, buffers }
    }

    pub fn add(&mut self, name: &str, message: Value) {
        let buffer = self.buffers.entry(name.to_string()).or_default();
        buffer.push_back(message);
        while buffer.len() > self.max_len {
            buffer.pop_front();
        }
    }

    /// Les `limit` derniers messages du flux (tous si None), du plus
    /// ancien au plus récent.
    pub fn recent(&self, name: &str, limit: Option<usize>) -> Vec<Value> {
        let Some(buffer) = self.buffers.get(name) else {
            return Vec::new();
        };
        let take = limit.unwrap_or(buffer.len()).min(buffer.len());
        buffer.iter().skip(buffer.len() - take).cloned().collect()
    }

    pub fn len(&self, name: &str) -> usize {
        self.buffers.get(name).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, name: &str) -> bool {
        self.len(name) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_only_the_most_recent_messages() {
        let mut cache = MessageCache::new(3);
        for i in 0..5 {
            cache.add("all", json!({ "seq": i }));
        }
        let kept = cache.recent("all", None);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0]["seq"], 2);
        assert_eq!(kept[2]["seq"], 4);
    }

    #[test]
    fn recent_with_limit_returns_tail_in_order() {
        let mut cache = MessageCache::new(10);
        for i in 0..4 {
            cache.add("anomalies", json!(i));
        }
        assert_eq!(cache.recent("anomalies", Some(2)), vec![json!(2), json!(3)]);
        assert_eq!(cache.recent("anomalies", Some(99)).len(), 4);
    }

    #[test]
    fn unknown_stream_is_empty_not_an_error() {
        let cache = MessageCache::new(3);
        assert!(cache.recent("unrelated", None).is_empty());
        assert!(cache.is_empty("diagnostics"));
    }
}
