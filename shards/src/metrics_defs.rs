use shared::metrics_defs::{MetricDef, MetricType};

pub const SHARD_PROBE_DURATION: MetricDef = MetricDef {
    name: "shard.probe.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent connecting to and querying a single shard, in seconds. Tagged with shard, outcome.",
};

pub const SHARD_PROBE_FAILURES: MetricDef = MetricDef {
    name: "shard.probe.failures",
    metric_type: MetricType::Counter,
    description: "Number of shard probes that failed or timed out. Tagged with shard.",
};

pub const ALL_METRICS: &[MetricDef] = &[SHARD_PROBE_DURATION, SHARD_PROBE_FAILURES];
