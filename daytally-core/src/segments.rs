//! Segment builder
//!
//! Pure, stateless functions that turn ordered event sequences into usage
//! durations and per-context keypress counts. Inputs must already be sorted
//! ascending by timestamp; that is the caller's responsibility (the storage
//! layer returns events in timestamp order).
//!
//! An activation event marks the start of an interval that runs until the
//! next activation. The final, open-ended interval is closed at "now" when
//! the last activation falls on the current local calendar day, otherwise at
//! 23:59:59 of its own day so a stale session never leaks into the present.

use crate::types::{day_end, local_day, ActivationEvent, KeypressEvent};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Active time attributed to one context over a window.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextUsage {
    pub context_label: String,
    pub duration_secs: i64,
}

/// Keypresses attributed to one context over a window.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextKeypresses {
    pub context_label: String,
    pub count: i64,
}

/// Histogram bucket width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketGranularity {
    /// One bucket per minute
    Minute,
    /// One bucket per local calendar day
    Day,
}

/// One histogram bucket: keypress count for the interval starting at
/// `bucket_start`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBucket {
    pub bucket_start: DateTime<Utc>,
    pub count: i64,
}

/// Per-context active durations from an ascending activation sequence.
///
/// Each consecutive pair `(cur, next)` credits `next - cur` to `cur`'s
/// context. Negative intervals (out-of-order clocks) are clamped to zero.
/// Output is sorted by duration descending, ties broken by label ascending
/// for reproducibility. Empty input yields empty output.
pub fn usage_durations(activations: &[ActivationEvent], now: DateTime<Utc>) -> Vec<ContextUsage> {
    let mut totals: BTreeMap<&str, i64> = BTreeMap::new();

    for pair in activations.windows(2) {
        let span = (pair[1].timestamp - pair[0].timestamp).num_seconds().max(0);
        *totals.entry(pair[0].context_label.as_str()).or_insert(0) += span;
    }

    if let Some(last) = activations.last() {
        let end = if local_day(last.timestamp) == local_day(now) {
            now
        } else {
            day_end(local_day(last.timestamp))
        };
        let span = (end - last.timestamp).num_seconds().max(0);
        *totals.entry(last.context_label.as_str()).or_insert(0) += span;
    }

    let mut usages: Vec<ContextUsage> = totals
        .into_iter()
        .map(|(label, secs)| ContextUsage {
            context_label: label.to_string(),
            duration_secs: secs,
        })
        .collect();
    usages.sort_by(|a, b| {
        b.duration_secs
            .cmp(&a.duration_secs)
            .then_with(|| a.context_label.cmp(&b.context_label))
    });
    usages
}

/// Attribute each keypress to the context active at its time.
///
/// Both inputs must be ascending; attribution is a monotonic two-pointer
/// walk that never moves the activation cursor backward. A keypress earlier
/// than every activation has no owner and is dropped, not attributed to the
/// first context. Callers that need a defined start state inject a
/// carry-over activation at the window start.
pub fn keypress_counts(
    activations: &[ActivationEvent],
    keypresses: &[KeypressEvent],
) -> Vec<ContextKeypresses> {
    let mut counts: BTreeMap<&str, i64> = BTreeMap::new();

    if !activations.is_empty() {
        let mut idx = 0usize;
        for kp in keypresses {
            while idx + 1 < activations.len() && activations[idx + 1].timestamp <= kp.timestamp {
                idx += 1;
            }
            if activations[idx].timestamp <= kp.timestamp {
                *counts
                    .entry(activations[idx].context_label.as_str())
                    .or_insert(0) += 1;
            }
        }
    }

    let mut segments: Vec<ContextKeypresses> = counts
        .into_iter()
        .map(|(label, count)| ContextKeypresses {
            context_label: label.to_string(),
            count,
        })
        .collect();
    segments.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.context_label.cmp(&b.context_label))
    });
    segments
}

/// Group keypresses into fixed buckets, ascending by bucket start.
///
/// Minute buckets truncate to the wall-clock minute; day buckets truncate
/// to local midnight.
pub fn keypress_histogram(
    keypresses: &[KeypressEvent],
    granularity: BucketGranularity,
) -> Vec<HistogramBucket> {
    let mut buckets: BTreeMap<DateTime<Utc>, i64> = BTreeMap::new();

    for kp in keypresses {
        let start = match granularity {
            BucketGranularity::Minute => {
                let rem = kp.timestamp.timestamp().rem_euclid(60);
                kp.timestamp - Duration::seconds(rem)
            }
            BucketGranularity::Day => crate::types::day_start(local_day(kp.timestamp)),
        };
        *buckets.entry(start).or_insert(0) += 1;
    }

    buckets
        .into_iter()
        .map(|(bucket_start, count)| HistogramBucket { bucket_start, count })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn activation(ts: DateTime<Utc>, label: &str) -> ActivationEvent {
        ActivationEvent {
            timestamp: ts,
            context_label: label.to_string(),
        }
    }

    fn keypress(ts: DateTime<Utc>) -> KeypressEvent {
        KeypressEvent {
            timestamp: ts,
            key_code: 36,
        }
    }

    /// A local wall-clock time on today's date, as UTC.
    fn today_at(hour: u32, min: u32) -> DateTime<Utc> {
        let today = Local::now().date_naive();
        crate::types::resolve_local(today.and_hms_opt(hour, min, 0).unwrap())
    }

    /// A local wall-clock time `days_ago` days in the past, as UTC.
    fn past_day_at(days_ago: i64, hour: u32, min: u32) -> DateTime<Utc> {
        let date = Local::now().date_naive() - chrono::Duration::days(days_ago);
        crate::types::resolve_local(date.and_hms_opt(hour, min, 0).unwrap())
    }

    #[test]
    fn test_empty_activations_empty_output() {
        let now = Utc::now();
        assert!(usage_durations(&[], now).is_empty());
        assert!(keypress_counts(&[], &[keypress(now)]).is_empty());
    }

    #[test]
    fn test_duration_sum_identity_today() {
        // Sum of per-context durations equals (now - first timestamp) when
        // the last activation is on the current day.
        let acts = vec![
            activation(today_at(9, 0), "editor"),
            activation(today_at(9, 30), "browser"),
            activation(today_at(10, 0), "editor"),
        ];
        let now = today_at(11, 0);
        let usages = usage_durations(&acts, now);
        let total: i64 = usages.iter().map(|u| u.duration_secs).sum();
        assert_eq!(total, (now - acts[0].timestamp).num_seconds());
    }

    #[test]
    fn test_stale_open_session_bounded_to_its_day() {
        // Last activation two days ago: the open interval ends at 23:59:59
        // of that day, not "now".
        let acts = vec![
            activation(past_day_at(2, 9, 0), "editor"),
            activation(past_day_at(2, 10, 0), "terminal"),
        ];
        let usages = usage_durations(&acts, Utc::now());
        let total: i64 = usages.iter().map(|u| u.duration_secs).sum();
        let end = day_end(local_day(acts[1].timestamp));
        assert_eq!(total, (end - acts[0].timestamp).num_seconds());
    }

    #[test]
    fn test_negative_interval_clamped() {
        // Out-of-order clock: second event earlier than the first.
        let t0 = past_day_at(2, 10, 0);
        let t1 = past_day_at(2, 9, 0);
        let acts = vec![activation(t0, "editor"), activation(t1, "browser")];
        let usages = usage_durations(&acts, Utc::now());
        let editor = usages
            .iter()
            .find(|u| u.context_label == "editor")
            .unwrap();
        assert_eq!(editor.duration_secs, 0);
    }

    #[test]
    fn test_usage_sorted_desc_with_label_tiebreak() {
        let acts = vec![
            activation(past_day_at(1, 9, 0), "zsh"),
            activation(past_day_at(1, 9, 10), "alpha"),
            activation(past_day_at(1, 9, 20), "mid"),
            activation(past_day_at(1, 10, 20), "idle"),
        ];
        let usages = usage_durations(&acts, Utc::now());
        // "idle" owns the open interval to 23:59:59, the largest share
        assert_eq!(usages[0].context_label, "idle");
        assert_eq!(usages[1].context_label, "mid");
        // "alpha" and "zsh" both have 10min; ties break ascending by label
        assert_eq!(usages[2].context_label, "alpha");
        assert_eq!(usages[3].context_label, "zsh");
    }

    #[test]
    fn test_attribution_example() {
        // Activations 09:00 A, 09:30 B; keypresses 09:10 and 09:45.
        let acts = vec![
            activation(today_at(9, 0), "A"),
            activation(today_at(9, 30), "B"),
        ];
        let kps = vec![keypress(today_at(9, 10)), keypress(today_at(9, 45))];
        let counts = keypress_counts(&acts, &kps);
        assert_eq!(counts.len(), 2);
        for c in &counts {
            assert_eq!(c.count, 1, "{} should own one keypress", c.context_label);
        }

        let now = today_at(10, 0);
        let usages = usage_durations(&acts, now);
        let a = usages.iter().find(|u| u.context_label == "A").unwrap();
        let b = usages.iter().find(|u| u.context_label == "B").unwrap();
        assert_eq!(a.duration_secs, 30 * 60);
        assert_eq!(b.duration_secs, (now - acts[1].timestamp).num_seconds());
    }

    #[test]
    fn test_keypress_before_first_activation_dropped() {
        let acts = vec![activation(today_at(9, 0), "editor")];
        let kps = vec![keypress(today_at(8, 0)), keypress(today_at(9, 5))];
        let counts = keypress_counts(&acts, &kps);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].context_label, "editor");
        // The 08:00 keypress is excluded from every count
        let total: i64 = counts.iter().map(|c| c.count).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_keypress_exactly_at_activation_owned_by_it() {
        let t = today_at(9, 0);
        let acts = vec![activation(t, "editor")];
        let counts = keypress_counts(&acts, &[keypress(t)]);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].count, 1);
    }

    #[test]
    fn test_histogram_minute_buckets() {
        let base = Utc.with_ymd_and_hms(2024, 6, 15, 9, 0, 0).unwrap();
        let kps = vec![
            keypress(base + Duration::seconds(5)),
            keypress(base + Duration::seconds(42)),
            keypress(base + Duration::seconds(70)),
        ];
        let hist = keypress_histogram(&kps, BucketGranularity::Minute);
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[0].bucket_start, base);
        assert_eq!(hist[0].count, 2);
        assert_eq!(hist[1].bucket_start, base + Duration::seconds(60));
        assert_eq!(hist[1].count, 1);
        assert!(hist[0].bucket_start < hist[1].bucket_start);
    }

    #[test]
    fn test_histogram_day_buckets() {
        let kps = vec![
            keypress(past_day_at(2, 9, 0)),
            keypress(past_day_at(2, 18, 0)),
            keypress(past_day_at(1, 12, 0)),
        ];
        let hist = keypress_histogram(&kps, BucketGranularity::Day);
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[0].count, 2);
        assert_eq!(hist[1].count, 1);
        assert_eq!(
            hist[0].bucket_start,
            crate::types::day_start(local_day(kps[0].timestamp))
        );
    }
}
