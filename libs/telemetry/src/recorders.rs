use ::metrics::Label;

use crate::context::TelemetryLabels;

fn labels_of(labels: &TelemetryLabels) -> Vec<Label> {
    labels
        .tags()
        .into_iter()
        .map(|(key, value)| Label::new(key, value))
        .collect()
}

pub fn record_counter(name: &'static str, value: u64, labels: &TelemetryLabels) {
    ::metrics::counter!(name, labels_of(labels)).increment(value);
}

pub fn record_histogram(name: &'static str, value: f64, labels: &TelemetryLabels) {
    ::metrics::histogram!(name, labels_of(labels)).record(value);
}

pub fn record_gauge(name: &'static str, value: f64, labels: &TelemetryLabels) {
    ::metrics::gauge!(name, labels_of(labels)).set(value);
}
