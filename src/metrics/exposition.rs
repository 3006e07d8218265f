use crate::metrics::types::Sample;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

/// Render a completed cycle's sample set in Prometheus text exposition format.
///
/// HELP and TYPE headers are emitted once per metric name, metric names are
/// sorted for stable output, and the configured static labels are appended to
/// every sample.
pub fn render_prometheus(samples: &[Sample], static_labels: &HashMap<String, String>) -> String {
    let mut by_name: BTreeMap<&str, Vec<&Sample>> = BTreeMap::new();
    for sample in samples {
        by_name
            .entry(sample.descriptor.name)
            .or_default()
            .push(sample);
    }

    let mut output = String::new();
    for (name, group) in by_name {
        let descriptor = group[0].descriptor;
        let _ = writeln!(output, "# HELP {name} {}", descriptor.help);
        let _ = writeln!(output, "# TYPE {name} gauge");

        for sample in group {
            let labels = render_labels(sample, static_labels);
            let _ = writeln!(output, "{name}{labels} {}", sample.value);
        }
    }

    output
}

fn render_labels(sample: &Sample, static_labels: &HashMap<String, String>) -> String {
    let mut pairs: Vec<(&str, &str)> = sample
        .descriptor
        .variable_labels
        .iter()
        .copied()
        .zip(sample.label_values.iter().map(String::as_str))
        .collect();

    for (key, value) in static_labels {
        pairs.push((key.as_str(), value.as_str()));
    }

    if pairs.is_empty() {
        return String::new();
    }
    pairs.sort_by_key(|(key, _)| *key);

    let body = pairs
        .into_iter()
        .map(|(key, value)| format!("{key}=\"{}\"", escape_label_value(value)))
        .collect::<Vec<_>>()
        .join(",");

    format!("{{{body}}}")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
