mod family;
mod map;
mod poller;
mod problem;
mod router;
mod site;
mod telemetry;
mod view;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tracing::info;

use placement_safety_api::SafetyApiClient;
use placement_safety_core::Thresholds;
use placement_safety_util::{load_env_file, AppConfig};

use crate::site::{Pipeline, Site, SiteKind};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let http = reqwest::Client::builder()
        .timeout(UPSTREAM_TIMEOUT)
        .user_agent(concat!("placement-safety/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let client = SafetyApiClient::new(
        config.safety_api_base_url.clone(),
        http,
        config.safety_api_token.clone(),
    );
    let thresholds = Thresholds {
        warning_hours: config.check_in_warning_hours,
        critical_hours: config.check_in_critical_hours,
    };
    let pipeline = Arc::new(Pipeline::new(client, thresholds, config.map_history_days));

    let family = Arc::new(Site::new(
        SiteKind::Family,
        pipeline.clone(),
        config.family.interval,
    ));
    let map = Arc::new(Site::new(SiteKind::Map, pipeline, config.map.interval));

    for (site, settings) in [(&family, &config.family), (&map, &config.map)] {
        if let Some(subject_id) = settings.initial_subject.as_deref() {
            site.watch(subject_id);
        }
    }

    let state = router::AppState::new(metrics, family.clone(), map.clone());

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    family.unwatch();
    map.unwatch();
    info!(stage = "app", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(stage = "app", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
