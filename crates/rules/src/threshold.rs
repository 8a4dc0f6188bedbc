//! Pure threshold decision over counts already fetched from the store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::Threshold;

/// Inclusive time range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    /// The trailing window of `threshold` ending at `as_of`.
    ///
    /// A window reaching past the earliest representable instant starts there.
    pub fn trailing(threshold: &Threshold, as_of: DateTime<Utc>) -> Self {
        let start = i64::try_from(threshold.window_secs())
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|span| as_of.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end: as_of }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Inputs and verdict of one threshold check, frozen into evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDecision {
    #[serde(rename = "type")]
    pub kind: String,
    /// Configured value (count or percent).
    pub value: f64,
    pub window: Window,
    pub qualifying: u64,
    pub total: u64,
    /// Observed percentage, for percent thresholds with a non-zero total.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_percent: Option<f64>,
    pub satisfied: bool,
}

/// Decide whether `threshold` holds given `qualifying` hits out of `total`
/// events in `window`.
///
/// A percent threshold with no events in the window is not satisfied.
pub fn decide(threshold: &Threshold, window: Window, qualifying: u64, total: u64) -> ThresholdDecision {
    let (value, observed_percent, satisfied) = match threshold {
        Threshold::Count { value, .. } => (*value as f64, None, qualifying >= *value),
        Threshold::Percent { value, .. } => {
            if total == 0 {
                (*value, None, false)
            } else {
                let pct = qualifying as f64 * 100.0 / total as f64;
                (*value, Some(pct), pct >= *value)
            }
        }
        Threshold::TimeWindow { .. } => (1.0, None, qualifying >= 1),
    };

    ThresholdDecision {
        kind: threshold.kind().to_string(),
        value,
        window,
        qualifying,
        total,
        observed_percent,
        satisfied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> Window {
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        Window::trailing(
            &Threshold::Count {
                value: 1,
                window_secs: 86_400,
            },
            end,
        )
    }

    #[test]
    fn trailing_window_bounds() {
        let w = window();
        assert_eq!(w.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(w.contains(w.start));
        assert!(w.contains(w.end));
        assert!(!w.contains(w.end + Duration::seconds(1)));
    }

    #[test]
    fn oversized_window_starts_at_min_utc() {
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        for window_secs in [10_000_000_000_000_000, u64::MAX, 400_000 * 366 * 86_400] {
            let w = Window::trailing(
                &Threshold::Count {
                    value: 3,
                    window_secs,
                },
                end,
            );
            assert_eq!(w.start, DateTime::<Utc>::MIN_UTC);
            assert_eq!(w.end, end);
        }
    }

    #[test]
    fn count_threshold() {
        let t = Threshold::Count {
            value: 3,
            window_secs: 86_400,
        };
        assert!(!decide(&t, window(), 2, 10).satisfied);
        assert!(decide(&t, window(), 3, 3).satisfied);
    }

    #[test]
    fn percent_with_zero_total_is_false() {
        let t = Threshold::Percent {
            value: 50.0,
            window_secs: 3600,
        };
        let d = decide(&t, window(), 0, 0);
        assert!(!d.satisfied);
        assert_eq!(d.observed_percent, None);
    }

    #[test]
    fn percent_threshold() {
        let t = Threshold::Percent {
            value: 50.0,
            window_secs: 3600,
        };
        assert!(decide(&t, window(), 1, 2).satisfied);
        assert!(!decide(&t, window(), 1, 3).satisfied);
        assert_eq!(decide(&t, window(), 1, 4).observed_percent, Some(25.0));
    }

    #[test]
    fn time_window_needs_one_hit() {
        let t = Threshold::TimeWindow { window_secs: 60 };
        assert!(!decide(&t, window(), 0, 5).satisfied);
        assert!(decide(&t, window(), 1, 1).satisfied);
    }
}
