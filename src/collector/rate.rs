use std::collections::HashMap;
use std::sync::Mutex;

/// Outcome of one rate estimation for a (group, topic) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateEstimate {
    /// First cycle since process start; no prior scrape to diff against.
    Unavailable,
    /// Offset delta was zero or negative (no consumption, or a rewind).
    Stalled { elapsed_secs: i64 },
    /// Net consumption observed.
    Progressing {
        rate_per_sec: f64,
        drain_secs: f64,
        elapsed_secs: i64,
    },
}

impl RateEstimate {
    /// Wire encoding of the rate, one decimal. `-1.0` marks "unavailable".
    pub fn rate_label(&self) -> String {
        match self {
            Self::Unavailable => "-1.0".to_string(),
            Self::Stalled { .. } => "0.0".to_string(),
            Self::Progressing { rate_per_sec, .. } => format!("{rate_per_sec:.1}"),
        }
    }

    /// Wire encoding of the estimated drain time in whole seconds. `-2` marks
    /// "unavailable", `-1` marks "not applicable".
    pub fn eta_label(&self) -> String {
        match self {
            Self::Unavailable => "-2".to_string(),
            Self::Stalled { .. } => "-1".to_string(),
            Self::Progressing { drain_secs, .. } => format!("{drain_secs:.0}"),
        }
    }

    pub fn elapsed_label(&self) -> String {
        match self {
            Self::Unavailable => "0".to_string(),
            Self::Stalled { elapsed_secs } | Self::Progressing { elapsed_secs, .. } => {
                elapsed_secs.to_string()
            }
        }
    }
}

#[derive(Debug, Default)]
struct RateInner {
    /// Last observed aggregate committed offset per (group, topic). Each pair
    /// is an independent key; one topic's update never touches another's.
    baselines: HashMap<(String, String), i64>,
    /// Unix timestamp of the previous completed cycle, shared by all groups
    /// and topics. `None` until the first cycle finishes.
    last_scrape: Option<i64>,
}

/// Scrape-to-scrape state for consumption rate estimation. The only entity
/// that outlives a collection cycle; all access goes through one lock.
#[derive(Debug, Default)]
pub struct ConsumptionState {
    inner: Mutex<RateInner>,
}

impl ConsumptionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff the current aggregate committed offset against the stored
    /// baseline and the shared last-scrape timestamp, then store the new
    /// baseline so the next cycle diffs against it.
    pub fn update(&self, group: &str, topic: &str, current_sum: i64, now_secs: i64) -> RateEstimate {
        let mut inner = self.inner.lock().expect("rate state lock poisoned");

        let key = (group.to_string(), topic.to_string());
        let previous = inner.baselines.insert(key, current_sum).unwrap_or(0);

        let Some(last_scrape) = inner.last_scrape else {
            return RateEstimate::Unavailable;
        };

        let elapsed_secs = now_secs - last_scrape;
        let delta = current_sum - previous;

        if delta <= 0 || elapsed_secs <= 0 {
            return RateEstimate::Stalled {
                elapsed_secs: elapsed_secs.max(0),
            };
        }

        let rate_per_sec = delta as f64 / elapsed_secs as f64;
        RateEstimate::Progressing {
            rate_per_sec,
            drain_secs: current_sum as f64 / rate_per_sec,
            elapsed_secs,
        }
    }

    /// Advance the shared last-scrape timestamp. Called once per completed
    /// cycle, after every group and topic has been updated.
    pub fn finish_cycle(&self, now_secs: i64) {
        let mut inner = self.inner.lock().expect("rate state lock poisoned");
        inner.last_scrape = Some(now_secs);
    }
}
