//! Aggregate conditions layered on top of a control's expression.

use serde::{Deserialize, Serialize};

/// Threshold gating a control.
///
/// ```yaml
/// threshold:
///   type: count
///   value: 3
///   window_secs: 86400
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Threshold {
    /// Qualifying hits in the trailing window must reach `value`.
    Count { value: u64, window_secs: u64 },
    /// Qualifying hits as a share of all of the subject's events in the window,
    /// in percent (0-100), must reach `value`.
    Percent { value: f64, window_secs: u64 },
    /// At least one qualifying hit in the trailing window.
    TimeWindow { window_secs: u64 },
}

impl Threshold {
    pub fn window_secs(&self) -> u64 {
        match self {
            Threshold::Count { window_secs, .. }
            | Threshold::Percent { window_secs, .. }
            | Threshold::TimeWindow { window_secs } => *window_secs,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Threshold::Count { .. } => "count",
            Threshold::Percent { .. } => "percent",
            Threshold::TimeWindow { .. } => "time_window",
        }
    }
}
