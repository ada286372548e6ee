use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use metrics_observatory::{ActionScheduler, Metrics, MetricsConfig, MetricsData};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod load_generator;

/// Number of concurrent Tokio tasks generating load
const CONCURRENCY: u32 = 16;
/// Percentage of operations that are reads (0–100)
const READ_PCT: u8 = 70;
const DEFAULT_DURATION_SECS: u64 = 15;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── 1. Load configuration ────────────────────────────────────
    let config = match std::env::var("OBSERVATORY_CONFIG") {
        Ok(path) => {
            info!(%path, "loading metrics configuration");
            MetricsConfig::from_json(&std::fs::read_to_string(path)?)?
        }
        Err(_) => MetricsConfig::default(),
    };
    let duration_secs = std::env::var("OBSERVATORY_DURATION_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_DURATION_SECS);

    // ── 2. Build the metrics tree ────────────────────────────────
    let metrics = Arc::new(Metrics::new(config)?);
    let instruments = load_generator::Instruments::register(&metrics)?;

    // ── 3. Periodic reports ──────────────────────────────────────
    let scheduler = Arc::new(ActionScheduler::new());
    metrics.schedule_reports(scheduler.clone(), log_summary)?;

    // ── 4. Generate load ─────────────────────────────────────────
    info!(
        workers = CONCURRENCY,
        duration_secs,
        read_pct = READ_PCT,
        "starting load generator"
    );
    load_generator::run(
        Arc::new(AtomicBool::new(true)),
        instruments,
        CONCURRENCY,
        Duration::from_secs(duration_secs),
        READ_PCT,
    )
    .await;

    // ── 5. Final report & teardown ───────────────────────────────
    scheduler.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&metrics.data())?);
    metrics.shutdown();

    Ok(())
}

/// One log line per timer plus the request meter.
fn log_summary(data: &MetricsData) {
    if let Some(http) = data.child("http") {
        for meter in &http.meters {
            info!(
                meter = %meter.name,
                count = meter.value.count,
                m1 = meter.value.one_minute_rate,
                mean = meter.value.mean_rate,
                "throughput"
            );
        }
    }
    if let Some(store) = data.child("store") {
        for timer in &store.timers {
            let h = &timer.value.histogram;
            info!(
                timer = %timer.name,
                count = h.count,
                active = timer.value.active_sessions,
                p50_ms = h.median,
                p99_ms = h.p99,
                max_ms = h.max,
                "latency"
            );
        }
    }
}
