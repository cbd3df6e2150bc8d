//! Prometheus metrics for the mirror.

use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry, TextEncoder,
};

/// Mirror metrics collection.
///
/// One instance per process, shared by every flow; per-flow series are
/// separated by the `flow` label (`source->target`).
pub struct MirrorMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Records copied source→target, by flow and topic.
    pub records_replicated: CounterVec,

    /// Payload bytes copied source→target, by flow and topic.
    pub bytes_replicated: CounterVec,

    /// Offset sync points emitted, by flow.
    pub offset_syncs_emitted: CounterVec,

    /// Checkpoints published, by flow and group.
    pub checkpoints_emitted: CounterVec,

    /// Checkpoints withheld because emission would have regressed, by flow
    /// and group.
    pub checkpoints_withheld: CounterVec,

    /// Translation queries answered "not yet mirrored", by flow.
    pub translation_gaps: CounterVec,

    /// Heartbeats emitted.
    pub heartbeats_emitted: IntCounter,

    /// Wall time of one replication pass over a partition, by flow.
    pub replication_poll_seconds: HistogramVec,
}

impl MirrorMetrics {
    /// Create and register the full metric set.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails, which cannot happen with the
    /// unique names used here.
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let records_replicated = CounterVec::new(
            Opts::new(
                "mirror_records_replicated_total",
                "Records copied from source to target",
            ),
            &["flow", "topic"],
        )
        .expect("metric creation should succeed");

        let bytes_replicated = CounterVec::new(
            Opts::new(
                "mirror_bytes_replicated_total",
                "Payload bytes copied from source to target",
            ),
            &["flow", "topic"],
        )
        .expect("metric creation should succeed");

        let offset_syncs_emitted = CounterVec::new(
            Opts::new(
                "mirror_offset_syncs_emitted_total",
                "Offset sync points emitted",
            ),
            &["flow"],
        )
        .expect("metric creation should succeed");

        let checkpoints_emitted = CounterVec::new(
            Opts::new(
                "mirror_checkpoints_emitted_total",
                "Consumer-group checkpoints published",
            ),
            &["flow", "group"],
        )
        .expect("metric creation should succeed");

        let checkpoints_withheld = CounterVec::new(
            Opts::new(
                "mirror_checkpoints_withheld_total",
                "Checkpoints withheld to preserve monotonicity",
            ),
            &["flow", "group"],
        )
        .expect("metric creation should succeed");

        let translation_gaps = CounterVec::new(
            Opts::new(
                "mirror_translation_gaps_total",
                "Offset translations answered as not-yet-mirrored",
            ),
            &["flow"],
        )
        .expect("metric creation should succeed");

        let heartbeats_emitted = IntCounter::new(
            "mirror_heartbeats_emitted_total",
            "Heartbeat records emitted",
        )
        .expect("metric creation should succeed");

        let replication_poll_seconds = HistogramVec::new(
            HistogramOpts::new(
                "mirror_replication_poll_seconds",
                "Wall time of one replication pass over a partition",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["flow"],
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(records_replicated.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(bytes_replicated.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(offset_syncs_emitted.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(checkpoints_emitted.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(checkpoints_withheld.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(translation_gaps.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(heartbeats_emitted.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(replication_poll_seconds.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            records_replicated,
            bytes_replicated,
            offset_syncs_emitted,
            checkpoints_emitted,
            checkpoints_withheld,
            translation_gaps,
            heartbeats_emitted,
            replication_poll_seconds,
        }
    }

    /// Render the registry in Prometheus text exposition format.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder
            .encode(&self.registry.gather(), &mut buf)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for MirrorMetrics {
    fn default() -> Self {
        Self::new()
    }
}
