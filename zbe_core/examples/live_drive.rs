//! Live drive demo - the proximity engine on the real clock.
//!
//! Loads zones from the Madrid geoportal (or a saved query response when
//! a path is given), falling back to the static list when that fails.
//! Then drives a short route down Gran Vía towards Sol, one fix every
//! 200 ms, logs alerts as they fire and prints the session report. The
//! cache snapshot survives between runs, so a second run serves the zone
//! list from disk.
//!
//! Run: `ZBE_ENV=production cargo run --example live_drive [zones.json]`

use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::FmtSubscriber;
use zbe_core::zones::{ArcGisFileSource, FallbackZoneSource, GeoportalZoneSource};
use zbe_core::{ChannelSink, EngineConfig, ProximityMonitor, SledSnapshotStore, TracingSink, ZoneSource};
use zbe_env::{Position, TokioContext, ZbeContext};

const START: (f64, f64) = (40.4200, -3.7150);
const SOL: (f64, f64) = (40.4168, -3.7038);
const STEPS: u32 = 20;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = EngineConfig::from_env()?;

    let subscriber = FmtSubscriber::builder().with_max_level(config.log_level()).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    info!(environment = %config.environment, "Configuration loaded");

    let context = TokioContext::shared();
    let store_path = std::env::temp_dir().join("zbe-live-drive");
    let store = Arc::new(SledSnapshotStore::for_config(store_path, &config.cache)?);
    let geoportal = GeoportalZoneSource::new(config.geoportal_url.as_str())?;
    let (channel_sink, mut notifications) = ChannelSink::channel(16);

    let monitor = ProximityMonitor::with_store(context.clone(), config, store)
        .with_sink(Box::new(TracingSink))
        .with_sink(Box::new(channel_sink));
    monitor.start();

    let source: Box<dyn ZoneSource> = match std::env::args().nth(1) {
        Some(path) => Box::new(FallbackZoneSource::new(ArcGisFileSource::new(path))),
        None => Box::new(FallbackZoneSource::new(geoportal)),
    };
    let zones = monitor.load_zones(&*source).await?;
    info!(count = zones.len(), source = source.name(), "Zones ready");

    for i in 0..=STEPS {
        let t = i as f64 / STEPS as f64;
        let position = Position::new(
            START.0 + (SOL.0 - START.0) * t,
            START.1 + (SOL.1 - START.1) * t,
            8.0,
            context.now_ms(),
        );

        let alerts = monitor.process_position(&position, &zones);
        if let Some(primary) = alerts.first() {
            // The driver acknowledges anything above info
            if primary.level.priority > 1 {
                monitor.dismiss_alert(primary);
            }
        }

        let status = monitor.status(&position, &zones);
        if !status.inside.is_empty() {
            info!(inside = ?status.inside, "Inside ZBE");
        }

        context.sleep(Duration::from_millis(200)).await;
    }

    while let Ok(notification) = notifications.try_recv() {
        info!(tag = %notification.tag, color = %notification.color, "{}", notification.body);
    }

    monitor.shutdown();
    let stats = monitor.cache_stats();
    info!(entries = stats.entries, hit_ratio = stats.hit_ratio, "Cache at shutdown");

    println!("{}", serde_json::to_string_pretty(&monitor.report())?);
    Ok(())
}
