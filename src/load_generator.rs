use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics_observatory::{
    Counter, Histogram, Meter, Metrics, MetricsContext, Result, SamplingType, TimeUnit, Timer,
    Unit,
};
use tracing::debug;

// ─── Instruments ─────────────────────────────────────────────────

/// Metrics every worker records into, registered once up front.
#[derive(Clone)]
pub struct Instruments {
    reads: Arc<Timer>,
    writes: Arc<Timer>,
    throughput: Arc<Meter>,
    payload: Arc<Histogram>,
    errors: Arc<Counter>,
    pub active_workers: Arc<AtomicU32>,
}

impl Instruments {
    pub fn register(metrics: &Metrics) -> Result<Self> {
        let store = metrics.context("store")?;
        let http = metrics.context("http")?;

        let active_workers = Arc::new(AtomicU32::new(0));
        {
            let active = active_workers.clone();
            http.gauge(
                "active_workers",
                move || active.load(Ordering::Relaxed) as f64,
                Unit::custom("Workers"),
            )?;
        }

        Ok(Self {
            reads: timer(&store, "reads")?,
            writes: timer(&store, "writes")?,
            throughput: http.meter("requests", Unit::requests(), TimeUnit::Seconds)?,
            payload: http.histogram(
                "payload_bytes",
                Unit::custom("Bytes"),
                SamplingType::HighDynamicRange,
            )?,
            errors: http.counter("errors", Unit::errors())?,
            active_workers,
        })
    }
}

fn timer(context: &MetricsContext, name: &str) -> Result<Arc<Timer>> {
    context.timer(
        name,
        Unit::calls(),
        SamplingType::Default,
        TimeUnit::Seconds,
        TimeUnit::Milliseconds,
    )
}

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `concurrency` Tokio tasks that simulate traffic until the
/// deadline or the `running` flag is set to false.
pub async fn run(
    running: Arc<AtomicBool>,
    instruments: Instruments,
    concurrency: u32,
    duration: Duration,
    read_pct: u8,
) {
    let deadline = tokio::time::Instant::now() + duration;

    let mut handles = Vec::with_capacity(concurrency as usize);
    for worker_id in 0..concurrency {
        let running = running.clone();
        let instruments = instruments.clone();
        handles.push(tokio::spawn(async move {
            worker(worker_id, running, instruments, deadline, read_pct).await;
        }));
    }

    // Wait for all workers to finish
    for h in handles {
        let _ = h.await;
    }

    running.store(false, Ordering::SeqCst);
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(
    id: u32,
    running: Arc<AtomicBool>,
    instruments: Instruments,
    deadline: tokio::time::Instant,
    read_pct: u8,
) {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);
    instruments.active_workers.fetch_add(1, Ordering::Relaxed);
    debug!(worker = id, "load worker started");

    while running.load(Ordering::Relaxed) && tokio::time::Instant::now() < deadline {
        let is_read = rng.gen_range(0u8..100) < read_pct;
        let (timer, endpoint) = if is_read {
            (&instruments.reads, "GET /api/items/:id")
        } else {
            (&instruments.writes, "POST /api/items")
        };

        // Reads are cheap, writes pay for persistence
        let latency_us = if is_read {
            rng.gen_range(50..400u64)
        } else {
            rng.gen_range(300..2_500u64)
        };
        let request_id = format!("req_{:08x}", rng.gen::<u32>());

        let mut context = timer.new_context(None);
        context.track_user_value(request_id);
        tokio::time::sleep(Duration::from_micros(latency_us)).await;
        drop(context);

        instruments.throughput.mark_item(endpoint, 1);
        instruments.payload.update(rng.gen_range(128..16_384));
        // ~1 % of requests fail
        if rng.gen_bool(0.01) {
            instruments.errors.increment_item(endpoint, 1);
        }
    }

    instruments.active_workers.fetch_sub(1, Ordering::Relaxed);
    debug!(worker = id, "load worker finished");
}
