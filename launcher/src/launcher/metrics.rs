use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
};

/// Outcome of a tick.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    /// The latest diff was fully applied.
    Applied,
    /// The supplier was not ready or no snapshot was available.
    Skipped,
    /// Computing or applying the diff failed.
    Failed,
}

/// Label for tick metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Tick {
    pub outcome: Outcome,
}

/// Kind of change made to a tracked deployment.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Kind {
    Creation,
    NewCandidate,
    Promotion,
    Revocation,
    Removal,
}

/// Label for transition metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Transition {
    pub kind: Kind,
}

/// Metrics for the [Actor](super::Actor).
#[derive(Clone, Default)]
pub struct Metrics {
    /// Number of DONs with a running deployment
    pub tracked: Gauge,
    /// Number of plugin pipelines with a candidate deployed
    pub candidates: Gauge,
    /// Number of ticks by outcome
    pub ticks: Family<Tick, Counter>,
    /// Number of successful deployment transitions by kind
    pub transitions: Family<Transition, Counter>,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register(
            "tracked",
            "Number of DONs with a running deployment",
            metrics.tracked.clone(),
        );
        context.register(
            "candidates",
            "Number of plugin pipelines with a candidate deployed",
            metrics.candidates.clone(),
        );
        context.register("ticks", "Number of ticks by outcome", metrics.ticks.clone());
        context.register(
            "transitions",
            "Number of successful deployment transitions by kind",
            metrics.transitions.clone(),
        );
        metrics
    }

    /// Record the outcome of a tick.
    pub fn tick(&self, outcome: Outcome) {
        self.ticks.get_or_create(&Tick { outcome }).inc();
    }

    /// Record a successful transition.
    pub fn transition(&self, kind: Kind) {
        self.transitions.get_or_create(&Transition { kind }).inc();
    }
}
