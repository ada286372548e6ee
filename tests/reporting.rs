use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use metrics_observatory::{
    Clock, ManualClock, ManualScheduler, Metrics, MetricsConfig, MetricsData, MetricsError,
    SamplingType, Scheduler, Snapshot, TimeUnit, Unit,
};

struct Harness {
    clock: Arc<ManualClock>,
    scheduler: Arc<ManualScheduler>,
    metrics: Metrics,
    reports: Arc<Mutex<Vec<MetricsData>>>,
}

fn harness(interval_secs: u64) -> Harness {
    let clock = Arc::new(ManualClock::new());
    let scheduler = Arc::new(ManualScheduler::new(clock.clone()));
    let config = MetricsConfig {
        report_interval_secs: interval_secs,
        ..MetricsConfig::default()
    };
    let metrics = Metrics::with_clock(config, clock.clone()).unwrap();

    let reports = Arc::new(Mutex::new(Vec::new()));
    {
        let reports = reports.clone();
        metrics
            .schedule_reports(scheduler.clone(), move |data: &MetricsData| {
                reports.lock().push(data.clone())
            })
            .unwrap();
    }
    Harness {
        clock,
        scheduler,
        metrics,
        reports,
    }
}

#[test]
fn reports_fire_once_per_interval() {
    let h = harness(10);
    let counter = h.metrics.context("jobs").unwrap().counter("done", Unit::items()).unwrap();

    counter.increment();
    h.scheduler.advance(Duration::from_secs(9));
    assert!(h.reports.lock().is_empty());

    h.scheduler.advance(Duration::from_secs(1));
    counter.increment_by(2);
    h.scheduler.advance(Duration::from_secs(25));

    let reports = h.reports.lock();
    assert_eq!(reports.len(), 3);
    let counts: Vec<i64> = reports
        .iter()
        .map(|r| r.child("jobs").unwrap().counters[0].value.count)
        .collect();
    assert_eq!(counts, vec![1, 3, 3]);
    // each report is stamped with the clock at the moment it ran
    assert!(reports[0].timestamp < reports[1].timestamp);
    assert_eq!(h.clock.nanoseconds(), TimeUnit::Seconds.to_nanos(35));
}

#[test]
fn shutdown_stops_reports() {
    let h = harness(1);
    h.scheduler.advance(Duration::from_secs(2));
    assert_eq!(h.reports.lock().len(), 2);

    h.metrics.shutdown();
    h.scheduler.advance(Duration::from_secs(5));
    assert_eq!(h.reports.lock().len(), 2);

    // a stopped scheduler tolerates another stop
    h.scheduler.stop();
}

#[test]
fn meter_rates_through_reports() {
    let h = harness(5);
    let meter = h
        .metrics
        .root()
        .meter("requests", Unit::requests(), TimeUnit::Seconds)
        .unwrap();

    meter.mark();
    h.scheduler.advance(Duration::from_secs(10));

    let reports = h.reports.lock();
    let last = &reports.last().unwrap().meters[0].value;
    assert_eq!(last.count, 1);
    assert!((last.mean_rate - 0.1).abs() < 1e-9);
    assert!((last.one_minute_rate - 0.1840).abs() < 1e-4);
    assert!((last.five_minute_rate - 0.1967).abs() < 1e-4);
    assert!((last.fifteen_minute_rate - 0.1989).abs() < 1e-4);
}

#[test]
fn timer_sessions_are_visible_while_running() {
    let h = harness(1);
    let timer = h
        .metrics
        .context("db")
        .unwrap()
        .timer(
            "query",
            Unit::calls(),
            SamplingType::Uniform,
            TimeUnit::Seconds,
            TimeUnit::Milliseconds,
        )
        .unwrap();

    let running = timer.new_context(None);
    h.scheduler.advance(Duration::from_secs(1));
    drop(running);
    h.scheduler.advance(Duration::from_secs(1));

    let reports = h.reports.lock();
    let during = &reports[0].child("db").unwrap().timers[0].value;
    let after = &reports[1].child("db").unwrap().timers[0].value;
    assert_eq!(during.active_sessions, 1);
    assert_eq!(during.histogram.count, 0);
    assert_eq!(after.active_sessions, 0);
    assert_eq!(after.histogram.count, 1);
    assert!((after.histogram.max - 1_000.0).abs() < 1e-6);
}

#[test]
fn decaying_histogram_survives_an_hour_of_idle_time() {
    let h = harness(60);
    let histogram = h
        .metrics
        .root()
        .histogram("latency", Unit::none(), SamplingType::ExponentiallyDecaying)
        .unwrap();

    for v in 1..=10 {
        histogram.update(v);
    }
    h.scheduler.advance(Duration::from_secs(2 * 60 * 60));
    histogram.update(1_000);

    let value = histogram.value();
    assert_eq!(value.count, 11);
    assert_eq!(value.sample_size, 11);
    assert_eq!(value.max, 1_000.0);
    // the fresh sample dominates the forward-decayed weights
    assert_eq!(value.p99, 1_000.0);
}

#[test]
fn quantile_errors_reach_callers() {
    let h = harness(1);
    let histogram = h
        .metrics
        .root()
        .histogram("sizes", Unit::items(), SamplingType::Uniform)
        .unwrap();
    histogram.update(3);

    let snapshot = histogram.snapshot();
    assert!(matches!(snapshot.value(1.5), Err(MetricsError::InvalidQuantile(_))));
    assert!(matches!(snapshot.value(f64::NAN), Err(MetricsError::InvalidQuantile(_))));
    assert_eq!(snapshot.value(1.0).unwrap(), 3.0);
}

#[test]
fn report_json_is_reporter_friendly() {
    let h = harness(1);
    let http = h.metrics.context("http").unwrap();
    http.counter("requests", Unit::requests()).unwrap().increment_item("GET /", 3);
    http.gauge("ratio", || f64::NAN, Unit::none()).unwrap();

    h.scheduler.advance(Duration::from_secs(1));
    let reports = h.reports.lock();
    let json = serde_json::to_value(&reports[0]).unwrap();

    let http = &json["children"][0];
    assert_eq!(http["context"], "http");
    assert_eq!(http["counters"][0]["name"], "requests");
    assert_eq!(http["counters"][0]["value"]["count"], 3);
    assert_eq!(http["counters"][0]["value"]["items"][0]["item"], "GET /");
    assert_eq!(http["counters"][0]["unit"], "Requests");
    assert!(http["gauges"][0]["value"].is_null());
}
