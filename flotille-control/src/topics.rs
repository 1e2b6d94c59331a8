/**
 * TOPICS FLOTILLE - Catégories de topics + suivi du set vivant
 *
 * RÔLE :
 * Les topics broker suivent une convention de nommage par catégorie
 * ({vehicule}_anomalies, {vehicule}_normal_data, {vehicule}_statistics)
 * et le set grandit tant que le système tourne : chaque nouveau
 * véhicule crée ses topics à la volée.
 *
 * FONCTIONNEMENT :
 * - Souscription par PATTERNS de catégorie, jamais topic par topic :
 *   les topics créés après coup matchent sans resouscription
 * - refresh() : listing complet → différence avec l'instantané →
 *   remplacement → resouscription uniquement si le set a grandi
 */
use serde::Serialize;
use std::collections::BTreeSet;

use crate::broker::{BrokerConsumer, BrokerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicCategory {
    Anomalies,
    NormalData,
    Statistics,
}

impl TopicCategory {
    pub const ALL: [TopicCategory; 3] = [
        TopicCategory::Anomalies,
        TopicCategory::NormalData,
        TopicCategory::Statistics,
    ];

    pub fn pattern(&self) -> &'static str {
        match self {
            TopicCategory::Anomalies => "^.*_anomalies$",
            TopicCategory::NormalData => "^.*_normal_data$",
            TopicCategory::Statistics => "^.*_statistics$",
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            TopicCategory::Anomalies => "_anomalies",
            TopicCategory::NormalData => "_normal_data",
            TopicCategory::Statistics => "_statistics",
        }
    }

    /// Catégorie d'un nom de topic, par suffixe.
    pub fn of(topic: &str) -> Option<TopicCategory> {
        TopicCategory::ALL
            .into_iter()
            .find(|c| topic.ends_with(c.suffix()))
    }

    /// Nom de véhicule porté par un topic conventionnel.
    pub fn vehicle_of(topic: &str) -> Option<&str> {
        TopicCategory::of(topic).and_then(|c| topic.strip_suffix(c.suffix()))
    }

    /// Liste des patterns de souscription, dans l'ordre des catégories.
    pub fn patterns() -> Vec<String> {
        TopicCategory::ALL
            .iter()
            .map(|c| c.pattern().to_string())
            .collect()
    }

    /// Vrai si `name` est exactement l'une des chaînes de pattern
    /// (certains brokers renvoient le pattern comme topic inconnu tant
    /// qu'aucun topic concret n'existe).
    pub fn is_pattern_echo(name: &str) -> bool {
        TopicCategory::ALL.iter().any(|c| c.pattern() == name)
    }
}

/// Instantané du set de topics connu, remplacé à chaque refresh.
#[derive(Debug, Default)]
pub struct TopicTracker {
    current: BTreeSet<String>,
}

impl TopicTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic_count(&self) -> usize {
        self.current.len()
    }

    pub fn topics(&self) -> Vec<String> {
        self.current.iter().cloned().collect()
    }

    /// Un cycle de rafraîchissement : listing complet, différence,
    /// remplacement de l'instantané, resouscription par patterns si et
    /// seulement si de nouveaux topics sont apparus. Rend les nouveaux
    /// noms.
    pub async fn refresh(&mut self, broker: &dyn BrokerConsumer) -> Result<Vec<String>, BrokerError> {
        let listing = broker.list_topics().await?;
        let fresh: BTreeSet<String> = listing.into_iter().collect();
        let new_topics: Vec<String> = fresh.difference(&self.current).cloned().collect();
        self.current = fresh;
        if !new_topics.is_empty() {
            tracing::debug!(
                new = ?new_topics,
                total = self.current.len(),
                "new topics detected, resubscribing with category patterns"
            );
            broker.subscribe(&TopicCategory::patterns()).await?;
        }
        Ok(new_topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;

    #[test]
    fn categories_match_by_suffix() {
        assert_eq!(
            TopicCategory::of("car1_anomalies"),
            Some(TopicCategory::Anomalies)
        );
        assert_eq!(
            TopicCategory::of("car1_normal_data"),
            Some(TopicCategory::NormalData)
        );
        assert_eq!(
            TopicCategory::of("car1_statistics"),
            Some(TopicCategory::Statistics)
        );
        assert_eq!(TopicCategory::of("unrelated"), None);
        assert_eq!(TopicCategory::vehicle_of("car1_anomalies"), Some("car1"));
    }

    #[test]
    fn pattern_echo_requires_exact_string() {
        assert!(TopicCategory::is_pattern_echo("^.*_anomalies$"));
        assert!(!TopicCategory::is_pattern_echo("car1_anomalies"));
        assert!(!TopicCategory::is_pattern_echo("^.*_anomalies"));
    }

    #[tokio::test]
    async fn refresh_without_change_does_not_resubscribe() {
        let broker = MemoryBroker::with_defaults();
        broker.create_topic("car1_anomalies");
        let mut tracker = TopicTracker::new();

        let first = tracker.refresh(&broker).await.unwrap();
        assert_eq!(first, vec!["car1_anomalies".to_string()]);
        assert_eq!(broker.subscription_calls().len(), 1);

        let second = tracker.refresh(&broker).await.unwrap();
        assert!(second.is_empty());
        let third = tracker.refresh(&broker).await.unwrap();
        assert!(third.is_empty());
        // toujours une seule souscription
        assert_eq!(broker.subscription_calls().len(), 1);
    }

    #[tokio::test]
    async fn one_new_topic_triggers_exactly_one_pattern_resubscription() {
        let broker = MemoryBroker::with_defaults();
        broker.create_topic("car1_anomalies");
        let mut tracker = TopicTracker::new();
        tracker.refresh(&broker).await.unwrap();

        broker.create_topic("car2_anomalies");
        let new_topics = tracker.refresh(&broker).await.unwrap();
        assert_eq!(new_topics, vec!["car2_anomalies".to_string()]);

        let calls = broker.subscription_calls();
        assert_eq!(calls.len(), 2);
        // resouscription par patterns de catégorie, pas par topic
        assert_eq!(calls[1], TopicCategory::patterns());
    }

    #[tokio::test]
    async fn empty_listing_then_created_topic_is_reported() {
        let broker = MemoryBroker::with_defaults();
        let mut tracker = TopicTracker::new();
        let none = tracker.refresh(&broker).await.unwrap();
        assert!(none.is_empty());
        assert_eq!(tracker.topic_count(), 0);

        broker.create_topic("car9_statistics");
        let found = tracker.refresh(&broker).await.unwrap();
        assert_eq!(found, vec!["car9_statistics".to_string()]);
        assert_eq!(tracker.topic_count(), 1);
    }
}
