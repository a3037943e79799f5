use metrics::Label;

use crate::context::TelemetryLabels;

fn labels(labels: &TelemetryLabels) -> Vec<Label> {
    labels
        .tags()
        .into_iter()
        .map(|(key, value)| Label::new(key, value))
        .collect()
}

pub fn record_counter(name: &'static str, value: u64, tags: &TelemetryLabels) {
    metrics::counter!(name, labels(tags)).increment(value);
}

pub fn record_histogram(name: &'static str, value: f64, tags: &TelemetryLabels) {
    metrics::histogram!(name, labels(tags)).record(value);
}

pub fn record_gauge(name: &'static str, value: f64, tags: &TelemetryLabels) {
    metrics::gauge!(name, labels(tags)).set(value);
}
