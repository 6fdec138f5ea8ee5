use chrono::{DateTime, Duration, Utc};

use crate::domain::models::{GUST_FIELD, SUSTAINED_FIELD, TelemetrySample};

const GUST_MAX_GAP_MS: i64 = 2_000;
const GUST_MIN_DURATION_MS: i64 = 3_000;
const GUST_MAX_DURATION_MS: i64 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindStats {
    pub instantaneous: Option<f64>,
    pub sustained: Option<f64>,
    pub gust: Option<f64>,
}

pub fn within_window(
    samples: &[TelemetrySample],
    now: DateTime<Utc>,
    lookback: Duration,
) -> Vec<TelemetrySample> {
    let from = now - lookback;
    samples
        .iter()
        .filter(|sample| {
            sample
                .recorded_at()
                .is_some_and(|at| from <= at && at <= now)
        })
        .cloned()
        .collect()
}

/// Device values on the latest sample win when numeric and nonzero; a device
/// zero counts as missing. The fallback mean and the gust scan only see
/// samples whose speed parses as a number: non-numeric speeds are left out of
/// both the sum and the count rather than counted as zero.
pub fn compute_wind_stats(samples: &[TelemetrySample]) -> WindStats {
    let mut timed: Vec<(DateTime<Utc>, &TelemetrySample)> = samples
        .iter()
        .filter_map(|sample| sample.recorded_at().map(|at| (at, sample)))
        .collect();
    timed.sort_by_key(|(at, _)| *at);

    let Some((_, latest)) = timed.last() else {
        return WindStats::default();
    };

    let speeds: Vec<(DateTime<Utc>, f64)> = timed
        .iter()
        .filter_map(|(at, sample)| sample.windspeed().map(|speed| (*at, speed)))
        .collect();

    let sustained = device_value(latest, SUSTAINED_FIELD).or_else(|| mean_speed(&speeds));
    let gust = device_value(latest, GUST_FIELD).or_else(|| detect_gust(&speeds));

    WindStats {
        instantaneous: latest.windspeed(),
        sustained,
        gust,
    }
}

/// Expects `series` sorted by time. `None` when no run reaches 3 s.
pub fn detect_gust(series: &[(DateTime<Utc>, f64)]) -> Option<f64> {
    let mut max_gust: Option<f64> = None;

    for (start_index, (segment_start, first_speed)) in series.iter().enumerate() {
        let mut segment_max = *first_speed;
        let mut last_time = *segment_start;

        for (time, speed) in &series[start_index + 1..] {
            let gap = (*time - last_time).num_milliseconds();
            if gap > GUST_MAX_GAP_MS {
                break;
            }

            segment_max = segment_max.max(*speed);
            last_time = *time;

            let elapsed = (last_time - *segment_start).num_milliseconds();
            if elapsed >= GUST_MIN_DURATION_MS {
                max_gust = Some(max_gust.map_or(segment_max, |current| current.max(segment_max)));
            }
            if elapsed > GUST_MAX_DURATION_MS {
                break;
            }
        }
    }

    max_gust
}

fn device_value(sample: &TelemetrySample, key: &str) -> Option<f64> {
    sample.field_number(key).filter(|value| *value != 0.0)
}

fn mean_speed(speeds: &[(DateTime<Utc>, f64)]) -> Option<f64> {
    if speeds.is_empty() {
        return None;
    }

    let total: f64 = speeds.iter().map(|(_, speed)| speed).sum();
    Some(total / speeds.len() as f64)
}
