//! Start and finish refinement for segmented pieces.

use tracing::debug;

use crate::segment::{split, Piece, StartType};
use crate::track::Track;

const SEARCH_MARGIN_S: f64 = 10.0;
/// Pieces starting this close to the first fix are searched from the first fix.
const START_OF_FILE_S: f64 = 20.0;
/// Slower than 5:00/500 m counts as stopped.
const STOPPED_PACE_S: f64 = 300.0;
/// Faster than 4:00/500 m counts as moving off.
const MOVING_PACE_S: f64 = 240.0;
const ROLLING_SCAN_POINTS: usize = 20;
const ROLLING_SETTLE_S: f64 = 1.0;
const ROLLING_AVERAGE_MARGIN_S: f64 = 2.0;
const CANONICAL_STEP_M: f64 = 250.0;
const CANONICAL_BIAS_M: f64 = 10.0;

/// Classify and refine the start of `piece`, holding its finish fixed.
pub fn tune_start(track: &Track, piece: &mut Piece) -> StartType {
    let located = if piece.start_offset_s < track.point(0).offset_s + START_OF_FILE_S {
        0
    } else {
        let back = piece.start_index.saturating_sub(track.smoothing_window());
        track.closest_index(track.point(back).offset_s - SEARCH_MARGIN_S)
    };
    debug!(
        start = piece.start_index,
        located, "searching for start of piece"
    );

    let stopped = located == 0 || track.pace(located).map_or(true, |p| p > STOPPED_PACE_S);
    if stopped {
        for i in located..=piece.start_index {
            if track.pace(i).is_some_and(|p| p < MOVING_PACE_S) {
                piece.set_start(track, i);
                debug!(start = i, "standing start");
                return StartType::Standing;
            }
        }
    } else {
        let average = piece.pace;
        let limit = (piece.start_index + ROLLING_SCAN_POINTS).min(piece.finish_index);
        for i in located..limit {
            let (Some(pace), Some(prev)) = (track.pace(i), track.pace(i - 1)) else {
                continue;
            };
            if pace >= prev - ROLLING_SETTLE_S && pace < average + ROLLING_AVERAGE_MARGIN_S {
                piece.set_start(track, i);
                debug!(start = i, "rolling start");
                return StartType::Rolling;
            }
        }
    }

    debug!(start = piece.start_index, "start left unresolved");
    StartType::RollingUnresolved
}

/// Move the finish to where pace first rises above `threshold` near the
/// recorded finish.
pub fn refine_finish(track: &Track, piece: &mut Piece, threshold: f64) {
    let back = piece.finish_index.saturating_sub(track.smoothing_window());
    let mut end = track.closest_index(track.point(back).offset_s - SEARCH_MARGIN_S);
    while end < track.last_index() && track.pace(end).is_some_and(|p| p < threshold) {
        end += 1;
    }
    if end <= piece.start_index {
        end = piece.start_index + 1;
    }
    debug!(
        finish = piece.finish_index,
        revised = end,
        "refined finish"
    );
    piece.set_finish(track, end);
}

/// Round the piece to the nearest canonical distance and interpolate the
/// finish time at exactly that distance.
pub fn trim_finish(track: &Track, piece: &mut Piece) {
    let start = piece.start_index;
    let available = track.distance_m(start, track.last_index());

    let mut target =
        (((piece.distance_m + CANONICAL_BIAS_M) / CANONICAL_STEP_M).round() * CANONICAL_STEP_M)
            .max(CANONICAL_STEP_M);
    while target > available {
        target -= CANONICAL_STEP_M;
    }
    if target < CANONICAL_STEP_M {
        debug!(start, available, "track too short to trim piece");
        return;
    }

    let mut end = start;
    while track.distance_m(start, end) < target {
        end += 1;
    }

    let end_point = track.point(end);
    let excess = (track.distance_m(start, end) - target) / end_point.segment_m;
    let duration = track.elapsed_s(start, end) - track.elapsed_s(end - 1, end) * excess;

    piece.finish_index = end;
    piece.finish_offset_s = piece.start_offset_s + duration;
    piece.finish_time = track.time_at(piece.finish_offset_s);
    piece.finish_distance_m = piece.start_distance_m + target;
    piece.duration_s = duration;
    piece.distance_m = target;
    piece.pace = split(duration, target);
    debug!(start, finish = end, target, duration, "trimmed piece");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::build_track;
    use crate::Fix;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};

    const DEG_PER_M: f64 = 1.0 / (6_371_000.0 * std::f64::consts::PI / 180.0);

    fn track_from_speeds(speeds: &[f64]) -> Track {
        let mut fixes = Vec::with_capacity(speeds.len() + 1);
        let mut metres = 0.0;
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        fixes.push(Fix::new(t0, 0.0, 0.0));
        for (i, v) in speeds.iter().enumerate() {
            metres += v;
            fixes.push(Fix::new(
                t0 + chrono::Duration::seconds(i as i64 + 1),
                metres * DEG_PER_M,
                0.0,
            ));
        }
        build_track(&fixes, 4).unwrap()
    }

    fn blocks(parts: &[(usize, f64)]) -> Vec<f64> {
        parts
            .iter()
            .flat_map(|&(n, v)| std::iter::repeat(v).take(n))
            .collect()
    }

    #[test]
    fn standing_start_snaps_to_first_movement() {
        // Sitting still (0.5 m/s = 16:40/500 m) then rowing at 5 m/s.
        let track = track_from_speeds(&blocks(&[(60, 0.5), (120, 5.0), (30, 0.5)]));
        let mut piece = Piece::between(&track, 64, 182);
        let kind = tune_start(&track, &mut piece);
        assert_eq!(kind, StartType::Standing);
        assert_eq!(piece.start_index, 61);
        assert_eq!(piece.finish_index, 182);
        assert_relative_eq!(piece.duration_s, 121.0, epsilon = 1e-9);
    }

    #[test]
    fn piece_near_file_start_searches_from_first_point() {
        let track = track_from_speeds(&blocks(&[(3, 0.5), (120, 5.0), (30, 0.5)]));
        let mut piece = Piece::between(&track, 6, 124);
        assert_eq!(tune_start(&track, &mut piece), StartType::Standing);
        assert_eq!(piece.start_index, 4);
    }

    #[test]
    fn rolling_start_waits_for_acceleration_to_settle() {
        // Paddling at 2.5 m/s, accelerating over three strokes, then 5 m/s.
        let track = track_from_speeds(&blocks(&[
            (60, 2.5),
            (1, 3.5),
            (1, 4.2),
            (1, 4.7),
            (120, 5.0),
            (30, 2.5),
        ]));
        let mut piece = Piece::between(&track, 63, 184);
        assert_eq!(tune_start(&track, &mut piece), StartType::Rolling);
        // Point 64 is the first at full speed but its split still fell by
        // more than a second.
        assert_eq!(piece.start_index, 65);
    }

    #[test]
    fn exhausted_standing_scan_is_flagged() {
        // Never faster than 4:00/500 m before the recorded start.
        let track = track_from_speeds(&blocks(&[(60, 0.5), (60, 1.5), (60, 0.5)]));
        let mut piece = Piece::between(&track, 90, 120);
        let before = piece.clone();
        let kind = tune_start(&track, &mut piece);
        assert_eq!(kind, StartType::RollingUnresolved);
        assert!(kind.needs_review());
        assert_eq!(piece, before);
    }

    #[test]
    fn rolling_start_still_accelerating_is_flagged() {
        // Paddling at 3 m/s, then gaining 0.1 m/s every second up to 6 m/s.
        // Each split falls by well over a second through the search window.
        let mut speeds = blocks(&[(60, 3.0)]);
        speeds.extend((1..=30).map(|k| 3.0 + 0.1 * k as f64));
        speeds.extend(blocks(&[(120, 6.0), (30, 3.0)]));
        let track = track_from_speeds(&speeds);
        let mut piece = Piece::between(&track, 62, 210);
        let before = piece.clone();

        let kind = tune_start(&track, &mut piece);
        assert_eq!(kind, StartType::RollingUnresolved);
        assert!(kind.needs_review());
        assert_eq!(piece, before);
    }

    #[test]
    fn refine_finish_stops_where_pace_drops_off() {
        let track = track_from_speeds(&blocks(&[(60, 2.5), (120, 5.0), (60, 2.5)]));
        let mut piece = Piece::between(&track, 62, 183);
        refine_finish(&track, &mut piece, 115.0);
        assert_eq!(piece.finish_index, 181);
        assert_relative_eq!(piece.duration_s, 119.0, epsilon = 1e-9);
        assert_relative_eq!(
            piece.pace,
            piece.duration_s * 500.0 / piece.distance_m,
            epsilon = 1e-9
        );
    }

    #[test]
    fn refine_finish_never_lands_on_start() {
        let track = track_from_speeds(&blocks(&[(40, 2.5)]));
        let mut piece = Piece::between(&track, 1, 2);
        refine_finish(&track, &mut piece, 115.0);
        assert!(piece.finish_index > piece.start_index);
        assert!(piece.distance_m > 0.0);
    }

    #[test]
    fn trim_rounds_to_canonical_distance() {
        // 5 m/s for 110 s: 550 m rounds to 500 m.
        let track = track_from_speeds(&blocks(&[(10, 2.0), (110, 5.0), (10, 2.0)]));
        let mut piece = Piece::between(&track, 10, 120);
        trim_finish(&track, &mut piece);
        assert_relative_eq!(piece.distance_m, 500.0);
        assert_relative_eq!(piece.duration_s, 100.0, epsilon = 1e-6);
        assert_relative_eq!(piece.pace, 100.0, epsilon = 1e-6);
        assert_relative_eq!(
            piece.finish_distance_m,
            piece.start_distance_m + 500.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn trim_interpolates_inside_last_segment() {
        // 4 m/s from the start: 500 m is reached 125 s in.
        let track = track_from_speeds(&blocks(&[(200, 4.0)]));
        let mut piece = Piece::between(&track, 0, 130);
        trim_finish(&track, &mut piece);
        assert_relative_eq!(piece.distance_m, 500.0);
        assert_relative_eq!(piece.duration_s, 125.0, epsilon = 1e-6);
        assert!(piece.finish_index >= 125);
    }

    #[test]
    fn trim_steps_down_when_track_runs_out() {
        // 740 m would round to 750 m, but only 740 m remain.
        let track = track_from_speeds(&blocks(&[(148, 5.0)]));
        let mut piece = Piece::between(&track, 0, 148);
        trim_finish(&track, &mut piece);
        assert_relative_eq!(piece.distance_m, 500.0);
    }
}
