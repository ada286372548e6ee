use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::data::{MetricValueEntry, MetricsData};
use crate::clock::Clock;
use crate::config::MetricsConfig;
use crate::error::{MetricsError, Result};
use crate::metrics::{
    Counter, CounterValue, Gauge, Histogram, HistogramValue, Meter, MeterValue, MetricTags,
    MetricType, TimeUnit, Timer, TimerValue, Unit,
};
use crate::sampling::{Reservoir, SamplingType};

/// Separator between the segments of a context path.
pub const PATH_SEPARATOR: char = '.';

/// Configuration and time source shared by every node of one tree.
pub(crate) struct Shared {
    pub(crate) config: MetricsConfig,
    pub(crate) clock: Arc<dyn Clock>,
}

/// A named scope owning metrics and child scopes.
///
/// Children are created lazily by path and owned by their parent; each node
/// serialises its own mutations behind one lock. Metrics are fully built
/// before they are published into the node, so enumeration never sees a
/// half-constructed instance.
pub struct MetricsContext {
    name: String,
    parent: Weak<MetricsContext>,
    shared: Arc<Shared>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    children: BTreeMap<String, Arc<MetricsContext>>,
    metrics: BTreeMap<String, Registered>,
    disposed: bool,
}

#[derive(Clone)]
struct Registered {
    name: String,
    handle: Handle,
    unit: Unit,
    tags: MetricTags,
    rate_unit: TimeUnit,
    duration_unit: TimeUnit,
}

#[derive(Clone)]
enum Handle {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Meter(Arc<Meter>),
    Histogram(Arc<Histogram>),
    Timer(Arc<Timer>),
}

impl Handle {
    fn metric_type(&self) -> MetricType {
        match self {
            Handle::Counter(_) => MetricType::Counter,
            Handle::Gauge(_) => MetricType::Gauge,
            Handle::Meter(_) => MetricType::Meter,
            Handle::Histogram(_) => MetricType::Histogram,
            Handle::Timer(_) => MetricType::Timer,
        }
    }
}

/// Units and tags a metric is registered with.
struct Descriptor {
    unit: Unit,
    tags: MetricTags,
    rate_unit: TimeUnit,
    duration_unit: TimeUnit,
}

impl Descriptor {
    fn new(unit: Unit, tags: MetricTags) -> Self {
        Self {
            unit,
            tags,
            rate_unit: TimeUnit::Seconds,
            duration_unit: TimeUnit::Milliseconds,
        }
    }
}

impl MetricsContext {
    pub(crate) fn root(name: String, shared: Arc<Shared>) -> Arc<Self> {
        Arc::new(Self {
            name,
            parent: Weak::new(),
            shared,
            state: Mutex::new(State::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Arc<MetricsContext>> {
        self.parent.upgrade()
    }

    /// Dotted path from the root, root name included.
    pub fn path(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}{PATH_SEPARATOR}{}", parent.path(), self.name),
            None => self.name.clone(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    // ─── Child contexts ──────────────────────────────────────────

    /// Resolve `path` (e.g. `"http.handlers"`) below this context, creating
    /// missing nodes. The same path always yields the same instance.
    pub fn context(self: &Arc<Self>, path: &str) -> Result<Arc<MetricsContext>> {
        if path.split(PATH_SEPARATOR).any(str::is_empty) {
            return Err(MetricsError::InvalidContextName(path.to_owned()));
        }
        let (head, rest) = match path.split_once(PATH_SEPARATOR) {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        let child = {
            let mut state = self.state.lock();
            if state.disposed {
                return Err(MetricsError::ContextDisposed(self.name.clone()));
            }
            state
                .children
                .entry(head.to_owned())
                .or_insert_with(|| {
                    debug!(parent = %self.name, context = head, "creating metrics context");
                    Arc::new(MetricsContext {
                        name: head.to_owned(),
                        parent: Arc::downgrade(self),
                        shared: self.shared.clone(),
                        state: Mutex::new(State::default()),
                    })
                })
                .clone()
        };

        match rest {
            Some(rest) => child.context(rest),
            None => Ok(child),
        }
    }

    pub fn children(&self) -> Vec<Arc<MetricsContext>> {
        self.state.lock().children.values().cloned().collect()
    }

    // ─── Registration ────────────────────────────────────────────

    pub fn counter(&self, name: &str, unit: Unit) -> Result<Arc<Counter>> {
        self.counter_with_tags(name, unit, MetricTags::new())
    }

    pub fn counter_with_tags(
        &self,
        name: &str,
        unit: Unit,
        tags: MetricTags,
    ) -> Result<Arc<Counter>> {
        let descriptor = Descriptor::new(unit, tags);
        let handle = self.get_or_register(name, MetricType::Counter, descriptor, || {
            Ok(Handle::Counter(Arc::new(Counter::new())))
        })?;
        match handle {
            Handle::Counter(counter) => Ok(counter),
            other => Err(self.mismatch(name, other.metric_type(), MetricType::Counter)),
        }
    }

    /// Register `provider` as a gauge. A second call with the same name
    /// keeps the first provider.
    pub fn gauge<F>(&self, name: &str, provider: F, unit: Unit) -> Result<Arc<Gauge>>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        self.gauge_with_tags(name, Gauge::new(provider), unit, MetricTags::new())
    }

    pub fn gauge_with_tags(
        &self,
        name: &str,
        gauge: Gauge,
        unit: Unit,
        tags: MetricTags,
    ) -> Result<Arc<Gauge>> {
        let handle = self.get_or_register(name, MetricType::Gauge, Descriptor::new(unit, tags), || {
            Ok(Handle::Gauge(Arc::new(gauge)))
        })?;
        match handle {
            Handle::Gauge(gauge) => Ok(gauge),
            other => Err(self.mismatch(name, other.metric_type(), MetricType::Gauge)),
        }
    }

    pub fn meter(&self, name: &str, unit: Unit, rate_unit: TimeUnit) -> Result<Arc<Meter>> {
        self.meter_with_tags(name, unit, rate_unit, MetricTags::new())
    }

    pub fn meter_with_tags(
        &self,
        name: &str,
        unit: Unit,
        rate_unit: TimeUnit,
        tags: MetricTags,
    ) -> Result<Arc<Meter>> {
        let mut descriptor = Descriptor::new(unit, tags);
        descriptor.rate_unit = rate_unit;
        let clock = self.shared.clock.clone();
        let handle = self.get_or_register(name, MetricType::Meter, descriptor, || {
            Ok(Handle::Meter(Arc::new(Meter::new(clock))))
        })?;
        match handle {
            Handle::Meter(meter) => Ok(meter),
            other => Err(self.mismatch(name, other.metric_type(), MetricType::Meter)),
        }
    }

    pub fn histogram(
        &self,
        name: &str,
        unit: Unit,
        sampling: SamplingType,
    ) -> Result<Arc<Histogram>> {
        self.histogram_with_tags(name, unit, sampling, MetricTags::new())
    }

    pub fn histogram_with_tags(
        &self,
        name: &str,
        unit: Unit,
        sampling: SamplingType,
        tags: MetricTags,
    ) -> Result<Arc<Histogram>> {
        let descriptor = Descriptor::new(unit, tags);
        let handle = self.get_or_register(name, MetricType::Histogram, descriptor, || {
            let clock = self.shared.clock.clone();
            let reservoir = Reservoir::build(sampling, &self.shared.config, clock)?;
            Ok(Handle::Histogram(Arc::new(Histogram::new(reservoir))))
        })?;
        match handle {
            Handle::Histogram(histogram) => Ok(histogram),
            other => Err(self.mismatch(name, other.metric_type(), MetricType::Histogram)),
        }
    }

    pub fn timer(
        &self,
        name: &str,
        unit: Unit,
        sampling: SamplingType,
        rate_unit: TimeUnit,
        duration_unit: TimeUnit,
    ) -> Result<Arc<Timer>> {
        self.timer_with_tags(name, unit, sampling, rate_unit, duration_unit, MetricTags::new())
    }

    pub fn timer_with_tags(
        &self,
        name: &str,
        unit: Unit,
        sampling: SamplingType,
        rate_unit: TimeUnit,
        duration_unit: TimeUnit,
        tags: MetricTags,
    ) -> Result<Arc<Timer>> {
        let descriptor = Descriptor {
            unit,
            tags,
            rate_unit,
            duration_unit,
        };
        let handle = self.get_or_register(name, MetricType::Timer, descriptor, || {
            let clock = self.shared.clock.clone();
            let reservoir = Reservoir::build(sampling, &self.shared.config, clock.clone())?;
            Ok(Handle::Timer(Arc::new(Timer::new(reservoir, clock))))
        })?;
        match handle {
            Handle::Timer(timer) => Ok(timer),
            other => Err(self.mismatch(name, other.metric_type(), MetricType::Timer)),
        }
    }

    /// Return the metric registered as `name`, or build, publish and return
    /// a new one. The existing metric must be of `kind`.
    fn get_or_register<F>(
        &self,
        name: &str,
        kind: MetricType,
        descriptor: Descriptor,
        build: F,
    ) -> Result<Handle>
    where
        F: FnOnce() -> Result<Handle>,
    {
        if name.is_empty() {
            return Err(MetricsError::Config("metric name must not be empty".into()));
        }

        let mut state = self.state.lock();
        if state.disposed {
            return Err(MetricsError::ContextDisposed(self.name.clone()));
        }
        if let Some(existing) = state.metrics.get(name) {
            let existing = existing.handle.clone();
            if existing.metric_type() != kind {
                return Err(self.mismatch(name, existing.metric_type(), kind));
            }
            return Ok(existing);
        }

        let handle = build()?;
        debug!(context = %self.name, metric = name, %kind, "registering metric");
        state.metrics.insert(
            name.to_owned(),
            Registered {
                name: name.to_owned(),
                handle: handle.clone(),
                unit: descriptor.unit,
                tags: descriptor.tags,
                rate_unit: descriptor.rate_unit,
                duration_unit: descriptor.duration_unit,
            },
        );
        Ok(handle)
    }

    fn mismatch(&self, name: &str, existing: MetricType, requested: MetricType) -> MetricsError {
        warn!(context = %self.name, metric = name, %existing, %requested, "metric type mismatch");
        MetricsError::MetricTypeMismatch {
            name: name.to_owned(),
            existing,
            requested,
        }
    }

    // ─── Enumeration ─────────────────────────────────────────────

    /// Handles of every metric registered right now. Values are read later,
    /// one metric at a time, as the caller iterates.
    ///
    /// A disabled tree still registers metrics but never reports them.
    fn registered(&self) -> Vec<Registered> {
        if !self.shared.config.enabled {
            return Vec::new();
        }
        self.state.lock().metrics.values().cloned().collect()
    }

    pub fn gauges(&self) -> impl Iterator<Item = MetricValueEntry<f64>> {
        self.registered().into_iter().filter_map(|r| match &r.handle {
            Handle::Gauge(gauge) => Some(entry(&r, gauge.value())),
            _ => None,
        })
    }

    pub fn counters(&self) -> impl Iterator<Item = MetricValueEntry<CounterValue>> {
        self.registered().into_iter().filter_map(|r| match &r.handle {
            Handle::Counter(counter) => Some(entry(&r, counter.value())),
            _ => None,
        })
    }

    /// Meter values, rates expressed per each meter's registered rate unit.
    pub fn meters(&self) -> impl Iterator<Item = MetricValueEntry<MeterValue>> {
        self.registered().into_iter().filter_map(|r| match &r.handle {
            Handle::Meter(meter) => Some(entry(&r, meter.value().scale(r.rate_unit))),
            _ => None,
        })
    }

    pub fn histograms(&self) -> impl Iterator<Item = MetricValueEntry<HistogramValue>> {
        self.registered().into_iter().filter_map(|r| match &r.handle {
            Handle::Histogram(histogram) => Some(entry(&r, histogram.value())),
            _ => None,
        })
    }

    /// Timer values scaled to each timer's registered rate and duration units.
    pub fn timers(&self) -> impl Iterator<Item = MetricValueEntry<TimerValue>> {
        self.registered().into_iter().filter_map(|r| match &r.handle {
            Handle::Timer(timer) => {
                Some(entry(&r, timer.value().scale(r.rate_unit, r.duration_unit)))
            }
            _ => None,
        })
    }

    /// Collect this context and all of its descendants.
    pub fn data(&self) -> MetricsData {
        MetricsData {
            context: self.name.clone(),
            timestamp: self.shared.clock.utc_now(),
            gauges: self.gauges().collect(),
            counters: self.counters().collect(),
            meters: self.meters().collect(),
            histograms: self.histograms().collect(),
            timers: self.timers().collect(),
            children: self.children().iter().map(|c| c.data()).collect(),
        }
    }

    /// Merge every histogram called `name` in this subtree into one value.
    ///
    /// All of them must share a sampling policy. `None` when no such
    /// histogram exists.
    pub fn aggregate_histogram(&self, name: &str) -> Result<Option<HistogramValue>> {
        if !self.shared.config.enabled {
            return Ok(None);
        }
        let mut found = Vec::new();
        self.collect_histograms(name, &mut found);
        let Some(first) = found.first() else {
            return Ok(None);
        };

        let reservoir = Reservoir::build(
            first.sampling_type(),
            &self.shared.config,
            self.shared.clock.clone(),
        )?;
        let merged = Histogram::new(reservoir);
        for histogram in &found {
            merged.merge(histogram)?;
        }
        Ok(Some(merged.value()))
    }

    fn collect_histograms(&self, name: &str, out: &mut Vec<Arc<Histogram>>) {
        let (own, children) = {
            let state = self.state.lock();
            let own = match state.metrics.get(name).map(|r| &r.handle) {
                Some(Handle::Histogram(h)) => Some(h.clone()),
                _ => None,
            };
            (own, state.children.values().cloned().collect::<Vec<_>>())
        };
        out.extend(own);
        for child in children {
            child.collect_histograms(name, out);
        }
    }

    // ─── Teardown ────────────────────────────────────────────────

    /// Detach every metric and child context from this node.
    pub fn clear_all_metrics(&self) {
        let children = {
            let mut state = self.state.lock();
            state.metrics.clear();
            std::mem::take(&mut state.children)
        };
        for child in children.into_values() {
            child.dispose();
        }
    }

    /// Clear this node, detach it from its parent and refuse further
    /// registration. Calling it again does nothing.
    pub fn dispose(&self) {
        let children = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.metrics.clear();
            std::mem::take(&mut state.children)
        };
        for child in children.into_values() {
            child.dispose();
        }
        if let Some(parent) = self.parent() {
            parent.detach_child(self);
        }
        debug!(context = %self.name, "disposed metrics context");
    }

    fn detach_child(&self, child: &MetricsContext) {
        let mut state = self.state.lock();
        let is_same = state
            .children
            .get(&child.name)
            .is_some_and(|c| std::ptr::eq(Arc::as_ptr(c), child));
        if is_same {
            state.children.remove(&child.name);
        }
    }
}

fn entry<T>(registered: &Registered, value: T) -> MetricValueEntry<T> {
    MetricValueEntry {
        name: registered.name.clone(),
        value,
        unit: registered.unit.clone(),
        tags: registered.tags.clone(),
    }
}
