use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Gateway request duration in seconds. Tagged with status, action.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const UPSTREAM_ATTEMPTS: MetricDef = MetricDef {
    name: "upstream.attempts",
    metric_type: MetricType::Counter,
    description: "Upstream attempts. Tagged with upstream, outcome.",
};

pub const UPSTREAM_FAILOVERS: MetricDef = MetricDef {
    name: "upstream.failovers",
    metric_type: MetricType::Counter,
    description: "Requests retried against the secondary upstream",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    UPSTREAM_ATTEMPTS,
    UPSTREAM_FAILOVERS,
];
