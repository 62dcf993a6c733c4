//! Request-rate monitoring
//!
//! The rate feed delivers one requests-per-second sample at a time plus
//! per-sampling-session request counts. Samples roll through a fixed window
//! sized for the rate chart; the chart's axis maximum moves in steps of ten,
//! raised immediately when a sample overshoots it and lowered at most once
//! every ten seconds to the window's rounded maximum.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::protocol::ServerMessage;

/// Number of samples kept, one per chart bar.
pub const RATE_BAR_COUNT: usize = 20;

/// Minimum time between down-scale checks.
const DOWNSCALE_INTERVAL_MS: i64 = 10_000;

/// Rolling window of req/sec samples with a sticky-upward axis scale.
#[derive(Debug)]
pub struct RequestRateWindow {
    samples: VecDeque<u64>,
    y_scale: u64,
    rescale_checked_at: Option<DateTime<Utc>>,
}

impl Default for RequestRateWindow {
    fn default() -> Self {
        Self {
            samples: std::iter::repeat(0).take(RATE_BAR_COUNT).collect(),
            y_scale: 10,
            rescale_checked_at: None,
        }
    }
}

impl RequestRateWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// The window contents, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = u64> + '_ {
        self.samples.iter().copied()
    }

    /// The most recent sample.
    pub fn current(&self) -> u64 {
        self.samples.back().copied().unwrap_or(0)
    }

    /// Axis maximum for the rate chart, always a multiple of ten.
    pub fn y_scale(&self) -> u64 {
        self.y_scale
    }

    /// Roll one sample into the window, adjusting the axis scale.
    pub fn push(&mut self, req_per_sec: f64, now: DateTime<Utc>) {
        let sample = req_per_sec.ceil().max(0.0) as u64;
        self.samples.pop_front();
        self.samples.push_back(sample);

        if sample > self.y_scale {
            self.y_scale = round_up_to_ten(sample);
            tracing::debug!(y_scale = self.y_scale, "Raised request-rate scale");
        } else {
            self.maybe_downscale(now);
        }
    }

    /// At most once per interval, drop the scale down to the window's
    /// rounded maximum.
    fn maybe_downscale(&mut self, now: DateTime<Utc>) {
        let due = match self.rescale_checked_at {
            None => true,
            Some(at) => now.signed_duration_since(at) > Duration::milliseconds(DOWNSCALE_INTERVAL_MS),
        };
        if !due {
            return;
        }

        let max = self.samples.iter().copied().max().unwrap_or(0);
        let rounded = round_up_to_ten(max);
        if rounded < self.y_scale {
            self.y_scale = rounded;
            tracing::debug!(y_scale = self.y_scale, "Lowered request-rate scale");
        }
        self.rescale_checked_at = Some(now);
    }
}

/// Next multiple of ten strictly above any non-multiple, matching the
/// chart's observed headroom behavior (exact multiples step up too).
fn round_up_to_ten(value: u64) -> u64 {
    value + (10 - value % 10)
}

/// Folds the rate feed: req/sec samples and per-sampling request counts.
#[derive(Debug, Default)]
pub struct RequestMonitor {
    window: RequestRateWindow,
    sampling_counts: HashMap<String, u64>,
}

impl RequestMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(&self) -> &RequestRateWindow {
        &self.window
    }

    /// Requests captured so far by the given sampling session, when known.
    pub fn count_for(&self, sampling_id: &str) -> Option<u64> {
        self.sampling_counts.get(sampling_id).copied()
    }

    /// Fold one rate-feed message in. Returns whether anything changed.
    /// Counts for ids absent from an update keep their previous value.
    pub fn apply_message(&mut self, msg: &Value, now: DateTime<Utc>) -> bool {
        match ServerMessage::classify(msg) {
            Some(ServerMessage::RequestRate(rate)) => {
                self.window.push(rate, now);
                true
            }
            Some(ServerMessage::SamplingCounts(counts)) => {
                self.sampling_counts.extend(counts);
                true
            }
            _ => false,
        }
    }
}
