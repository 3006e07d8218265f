use tokio::sync::mpsc;

/// Static description of one exported metric: its name, help text and the
/// ordered set of variable label names every sample must provide values for.
#[derive(Debug)]
pub struct Descriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub variable_labels: &'static [&'static str],
}

/// One gauge observation produced during a collection cycle.
///
/// `label_values` is positional: it pairs up with the descriptor's
/// `variable_labels`.
#[derive(Debug, Clone)]
pub struct Sample {
    pub descriptor: &'static Descriptor,
    pub value: f64,
    pub label_values: Vec<String>,
}

impl Sample {
    pub fn gauge(descriptor: &'static Descriptor, value: f64, label_values: Vec<String>) -> Self {
        debug_assert_eq!(
            descriptor.variable_labels.len(),
            label_values.len(),
            "label value count mismatch for {}",
            descriptor.name
        );
        Self {
            descriptor,
            value,
            label_values,
        }
    }
}

/// Append-only sink the collection engine produces samples into. The engine
/// never reads it back; the driving scrape request drains it once the cycle
/// has completed.
pub type MetricSink = mpsc::UnboundedSender<Sample>;

/// Send a sample, ignoring a closed receiver. The receiver lives for the whole
/// cycle, so a send can only fail if the driver already gave up on the cycle.
pub fn emit(sink: &MetricSink, sample: Sample) {
    let _ = sink.send(sample);
}
