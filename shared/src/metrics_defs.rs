//! Common types for metrics definitions.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

/// Registers descriptions for every metric with the installed recorder.
pub fn describe_all(defs: &[MetricDef]) {
    for def in defs {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}

#[macro_export]
macro_rules! counter {
    ($def:expr $(, $key:expr => $value:expr)* $(,)?) => {
        metrics::counter!($def.name $(, $key => $value)*)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr $(, $key:expr => $value:expr)* $(,)?) => {
        metrics::histogram!($def.name $(, $key => $value)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::CapturingRecorder;

    const REQUESTS: MetricDef = MetricDef {
        name: "test.requests",
        metric_type: MetricType::Counter,
        description: "Requests",
    };

    const LATENCY: MetricDef = MetricDef {
        name: "test.latency",
        metric_type: MetricType::Histogram,
        description: "Latency",
    };

    #[test]
    fn test_macros_use_definition_name() {
        let recorder = CapturingRecorder::new();
        metrics::with_local_recorder(&recorder, || {
            describe_all(&[REQUESTS, LATENCY]);
            crate::counter!(REQUESTS, "route" => "/query").increment(1);
            crate::histogram!(LATENCY).record(0.5);
        });

        assert_eq!(recorder.described(), vec!["test.requests", "test.latency"]);
        assert_eq!(
            recorder.registered(),
            vec!["test.requests{route=/query}", "test.latency{}"]
        );
    }
}
