use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{info, warn};

use match_details::config::Settings;
use match_details::db::Db;
use match_details::endpoint::RateLimiter;
use match_details::region::Region;
use match_details::signals;
use match_details::util::env as env_util;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_util::init_env();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init();

    let settings = Settings::from_env();
    let regions = Settings::regions();
    let database_url = env_util::db_url().context("store DSN required")?;
    let db = Db::connect(&database_url, settings.db_max_conns).await?;
    let limiter = Arc::new(RateLimiter::from_env());

    info!(regions = %regions.join(","), "match details worker starting");

    // Startup gate: no region runs until the control plane hands out a
    // usable credential and the service flag is on.
    let first = wait_until_enabled(&db, &settings).await;

    let handles: Vec<_> = regions
        .iter()
        .map(|name| {
            let region = Region::new(
                name,
                settings.clone(),
                db.clone(),
                limiter.get_endpoint(name, "match-details-v5"),
            );
            let runner = tokio::spawn(region.clone().run());
            (region, runner)
        })
        .collect();
    apply_signals(&handles, &first);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                break;
            }
            _ = sleep(settings.signal_poll) => {
                let snap = signals::fetch(&db, &settings.config_table).await;
                apply_signals(&handles, &snap);
            }
        }
    }

    for (region, _) in &handles {
        region.shutdown();
    }
    for (_, runner) in handles {
        let _ = runner.await;
    }
    db.pool.close().await;
    info!("match details worker stopped");
    Ok(())
}

/// Poll until the service is enabled and a valid key is present.
async fn wait_until_enabled(db: &Db, settings: &Settings) -> signals::Signals {
    loop {
        let snap = signals::fetch(db, &settings.config_table).await;
        if snap.service_enabled && snap.valid_api_key().is_some() {
            return snap;
        }
        if snap.api_key.as_deref().is_some_and(|k| !signals::api_key_valid(k)) {
            warn!("credential present but not RGAPI-prefixed; waiting");
        }
        sleep(Duration::from_secs(5)).await;
    }
}

/// Drive start/stop from one signal snapshot; never touches in-flight work.
fn apply_signals(handles: &[(Arc<Region>, tokio::task::JoinHandle<()>)], snap: &signals::Signals) {
    let key = snap.valid_api_key();
    for (region, _) in handles {
        match key {
            Some(key) if snap.service_enabled && snap.region_enabled(&region.name) => {
                region.set_api_key(key);
                region.start();
            }
            _ => region.stop(),
        }
    }
}
