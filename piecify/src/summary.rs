//! Whole-outing totals: distance, time and how much of it was spent moving.

use serde::{Deserialize, Serialize};

use crate::track::Track;

/// Smoothed splits faster than this count as moving (5:00/500 m).
const MOVING_PACE_S: f64 = 300.0;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutSummary {
    pub total_distance_m: f64,
    pub total_time_s: f64,
    pub moving_time_s: f64,
    pub moving_distance_m: f64,
    pub moving_pace: Option<f64>,
    /// Fastest smoothed split over the outing.
    pub best_pace: Option<f64>,
    pub readings: usize,
    pub mean_interval_s: f64,
}

/// Whole-outing figures: totals, time spent moving and GPS sampling rate.
pub fn summarize(track: &Track) -> WorkoutSummary {
    let points = track.points();
    let mut moving_time_s = 0.0;
    let mut moving_distance_m = 0.0;

    for pair in points.windows(2) {
        let (prev, point) = (&pair[0], &pair[1]);
        if point.smoothed_pace.is_some_and(|p| p < MOVING_PACE_S) {
            moving_time_s += point.offset_s - prev.offset_s;
            moving_distance_m += point.segment_m;
        }
    }

    let last = track.last_index();
    let total_time_s = track.elapsed_s(0, last);
    WorkoutSummary {
        total_distance_m: track.point(last).total_m,
        total_time_s,
        moving_time_s,
        moving_distance_m,
        moving_pace: (moving_distance_m > 0.0).then(|| moving_time_s * 500.0 / moving_distance_m),
        best_pace: track.min_smoothed_pace(),
        readings: points.len(),
        mean_interval_s: total_time_s / points.len() as f64,
    }
}
