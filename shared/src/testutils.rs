//! A metrics recorder that remembers what was described and registered.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct CapturingRecorder {
    described: Mutex<Vec<String>>,
    registered: Mutex<Vec<String>>,
}

impl CapturingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names passed to `describe_*`, in call order.
    pub fn described(&self) -> Vec<String> {
        self.described.lock().clone()
    }

    /// Registered keys formatted as `name{label=value,...}`, in call order.
    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().clone()
    }

    fn describe(&self, key: KeyName) {
        self.described.lock().push(key.as_str().to_string());
    }

    fn register(&self, key: &Key) {
        let labels: Vec<String> = key
            .labels()
            .map(|label| format!("{}={}", label.key(), label.value()))
            .collect();
        self.registered
            .lock()
            .push(format!("{}{{{}}}", key.name(), labels.join(",")));
    }
}

impl Recorder for CapturingRecorder {
    fn describe_counter(&self, key: KeyName, _unit: Option<Unit>, _description: SharedString) {
        self.describe(key);
    }

    fn describe_gauge(&self, key: KeyName, _unit: Option<Unit>, _description: SharedString) {
        self.describe(key);
    }

    fn describe_histogram(&self, key: KeyName, _unit: Option<Unit>, _description: SharedString) {
        self.describe(key);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        self.register(key);
        Counter::noop()
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        self.register(key);
        Gauge::noop()
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        self.register(key);
        Histogram::noop()
    }
}
