use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS_TOTAL: MetricDef = MetricDef {
    name: "requests.total",
    metric_type: MetricType::Counter,
    description: "Number of handled requests. Tagged with route, status.",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with route, status.",
};

pub const ALL_METRICS: &[MetricDef] = &[REQUESTS_TOTAL, REQUEST_DURATION];
