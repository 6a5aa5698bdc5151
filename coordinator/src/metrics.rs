use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::Registry,
};
use roundplay_types::RoundDuration;
use std::sync::atomic::AtomicU64;

/// Buckets (in seconds) for settlement latency.
const LATENCY: [f64; 8] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DurationLabel {
    pub duration: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResultLabel {
    pub duration: String,
    pub result: String,
}

/// Counters shared by every component of a scheduler.
#[derive(Clone)]
pub struct Metrics {
    pub resyncs: Family<ResultLabel, Counter<u64, AtomicU64>>,
    pub settlements: Family<ResultLabel, Counter<u64, AtomicU64>>,
    pub bets: Family<ResultLabel, Counter<u64, AtomicU64>>,
    pub expirations: Family<DurationLabel, Counter<u64, AtomicU64>>,
    pub settle_latency: Histogram,
}

impl Default for Metrics {
    /// Unregistered metrics, for components built outside a scheduler.
    fn default() -> Self {
        Self {
            resyncs: Family::default(),
            settlements: Family::default(),
            bets: Family::default(),
            expirations: Family::default(),
            settle_latency: Histogram::new(LATENCY.into_iter()),
        }
    }
}

impl Metrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "resyncs",
            "Number of clock seedings by source",
            metrics.resyncs.clone(),
        );
        registry.register(
            "settlements",
            "Number of settlement attempts by result",
            metrics.settlements.clone(),
        );
        registry.register("bets", "Number of bets by result", metrics.bets.clone());
        registry.register(
            "expirations",
            "Number of round clock expirations",
            metrics.expirations.clone(),
        );
        registry.register(
            "settle_latency",
            "Latency of settlement (seconds)",
            metrics.settle_latency.clone(),
        );
        metrics
    }

    pub fn resync(&self, duration: RoundDuration, source: &str) {
        self.resyncs.get_or_create(&label(duration, source)).inc();
    }

    pub fn settlement(&self, duration: RoundDuration, result: &str) {
        self.settlements.get_or_create(&label(duration, result)).inc();
    }

    pub fn bet(&self, duration: RoundDuration, result: &str) {
        self.bets.get_or_create(&label(duration, result)).inc();
    }

    pub fn expired(&self, duration: RoundDuration) {
        self.expirations
            .get_or_create(&DurationLabel {
                duration: duration.to_string(),
            })
            .inc();
    }

    /// Current count for a `(duration, result)` series of `family`.
    pub fn count(
        family: &Family<ResultLabel, Counter<u64, AtomicU64>>,
        duration: RoundDuration,
        result: &str,
    ) -> u64 {
        family.get_or_create(&label(duration, result)).get()
    }
}

fn label(duration: RoundDuration, result: &str) -> ResultLabel {
    ResultLabel {
        duration: duration.to_string(),
        result: result.to_string(),
    }
}
