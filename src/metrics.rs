use crate::config::MetricsConfig;
use crate::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramTimer, HistogramVec, IntCounterVec, Opts,
    Registry, TextEncoder,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

const PATH_SEPARATOR: &str = "/";

/// How a routed message left the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Completed,
    Skipped,
    Failed,
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Completed => "completed",
            MessageOutcome::Skipped => "skipped",
            MessageOutcome::Failed => "failed",
        }
    }
}

/// Process-wide metrics registry shared by every worker.
pub struct MetricsCatalog {
    enabled: bool,
    scope_duration: HistogramVec,
    messages: IntCounterVec,
    registry: Registry,
}

impl MetricsCatalog {
    pub fn new(config: &MetricsConfig) -> Result<Arc<Self>> {
        let registry = Registry::new();

        let scope_duration = HistogramVec::new(
            HistogramOpts::new(
                "scope_duration_seconds",
                "Wall time spent inside a metrics scope",
            )
            .namespace(config.namespace.clone()),
            &["path", "timer"],
        )?;

        let messages = IntCounterVec::new(
            Opts::new("messages_total", "Messages handled per source and outcome")
                .namespace(config.namespace.clone()),
            &["source", "outcome"],
        )?;

        registry.register(Box::new(scope_duration.clone()))?;
        registry.register(Box::new(messages.clone()))?;

        Ok(Arc::new(Self {
            enabled: config.enabled,
            scope_duration,
            messages,
            registry,
        }))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Fresh, empty scope stack for one worker.
    pub fn scope(self: &Arc<Self>) -> MetricsScope {
        MetricsScope {
            catalog: Arc::clone(self),
            path: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn record_message(&self, source: &str, outcome: MessageOutcome) {
        if self.enabled {
            self.messages
                .with_label_values(&[source, outcome.as_str()])
                .inc();
        }
    }

    pub fn message_count(&self, source: &str, outcome: MessageOutcome) -> u64 {
        self.messages
            .with_label_values(&[source, outcome.as_str()])
            .get()
    }

    /// Number of observations recorded by the timer `name` at `path`.
    pub fn timer_count(&self, path: &str, name: &str) -> u64 {
        self.scope_duration
            .with_label_values(&[path, name])
            .get_sample_count()
    }

    /// Prometheus text exposition of every registered metric.
    pub fn gather_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    fn histogram(&self, path: &str, name: &str) -> Option<Histogram> {
        self.enabled
            .then(|| self.scope_duration.with_label_values(&[path, name]))
    }
}

/// Hierarchical path of pushed segments, confined to one worker thread.
///
/// Clones share the same stack.
#[derive(Clone)]
pub struct MetricsScope {
    catalog: Arc<MetricsCatalog>,
    path: Rc<RefCell<Vec<String>>>,
}

impl MetricsScope {
    /// Pushes `segment`; it is popped when the guard drops.
    #[must_use = "the segment is popped as soon as the guard is dropped"]
    pub fn push(&self, segment: impl Into<String>) -> ScopeGuard {
        let mut path = self.path.borrow_mut();
        let depth = path.len();
        path.push(segment.into());
        ScopeGuard {
            path: Rc::clone(&self.path),
            depth,
        }
    }

    pub fn path(&self) -> String {
        self.path.borrow().join(PATH_SEPARATOR)
    }

    pub fn depth(&self) -> usize {
        self.path.borrow().len()
    }

    /// Timer bound to the current path.
    pub fn timer(&self, name: &str) -> Timer {
        Timer {
            histogram: self.catalog.histogram(&self.path(), name),
        }
    }

    pub fn catalog(&self) -> &Arc<MetricsCatalog> {
        &self.catalog
    }
}

pub struct ScopeGuard {
    path: Rc<RefCell<Vec<String>>>,
    depth: usize,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.path.borrow_mut().truncate(self.depth);
    }
}

pub struct Timer {
    histogram: Option<Histogram>,
}

impl Timer {
    /// Starts timing; the elapsed time is observed when the guard drops.
    #[must_use = "the timer stops as soon as the guard is dropped"]
    pub fn time(&self) -> TimerGuard {
        TimerGuard {
            _timer: self.histogram.as_ref().map(Histogram::start_timer),
        }
    }
}

pub struct TimerGuard {
    _timer: Option<HistogramTimer>,
}
