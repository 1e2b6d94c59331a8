/**
 * FLOTILLE CONTROL - Point d'entrée principal du service de contrôle
 *
 * RÔLE : Orchestration de tous les modules : config, broker, flotte, HTTP, santé.
 * Bootstrap du système complet avec gestion d'erreurs et logging.
 *
 * ARCHITECTURE : API REST de coordination + consommation broker continue.
 * UTILITÉ : point d'administration unique de la flotte de workers.
 */

use anyhow::Context;
use flotille_control::broker::{BrokerConsumer, MemoryBroker};
use flotille_control::cache::MessageCache;
use flotille_control::config::load_config;
use flotille_control::consumer::{ConsumerTuning, StreamConsumer};
use flotille_control::fleet::FleetManager;
use flotille_control::health::ControlHealth;
use flotille_control::http::{build_router, AppState};
use flotille_control::metrics::FleetMetrics;
use flotille_control::new_state;
use flotille_control::router::FleetRouter;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let cfg = load_config().await;
    let manager_port = cfg.manager_port;

    // état partagé : messages récents, compteurs par véhicule
    let cache = new_state(MessageCache::new(cfg.cache_max_len));
    let metrics = new_state(FleetMetrics::default());
    let router = Arc::new(FleetRouter::new(cache.clone(), metrics.clone()));

    // binding broker derrière le trait de consommation
    let broker: Arc<dyn BrokerConsumer> = match cfg.broker.driver.as_str() {
        "memory" => Arc::new(MemoryBroker::new((&cfg.broker).into())),
        other => {
            tracing::error!(driver = %other, "unknown broker driver, no binding available");
            std::process::exit(1);
        }
    };

    let tuning = ConsumerTuning::from_config(&cfg);
    let consumer = StreamConsumer::spawn(broker, router, tuning).await;
    let consumer_status = consumer.status_handle();

    let fleet = Arc::new(FleetManager::from_config(cfg));
    let health_tracker = ControlHealth::new();

    // fabrique l'état unique pour Axum
    let app_state = AppState {
        fleet,
        cache,
        metrics,
        consumer: consumer_status,
        health_tracker,
    };

    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], manager_port));
    tracing::info!("listening on http://{addr}");
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind manager port")?;

    // le serveur rend la main sur Ctrl-C ; la consommation est alors
    // arrêtée proprement et le handle broker libéré
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    consumer.stop().await;
    tracing::info!("control stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
    }
}
