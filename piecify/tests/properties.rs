mod common;

use piecify::{build_track, find_pieces, haversine_distance, match_targets, Params, Target};
use proptest::prelude::*;

use common::{outing_from_speeds, speeds, DEG_PER_M};

fn step() -> impl Strategy<Value = f64> {
    prop_oneof![1 => Just(0.0), 6 => -15.0f64..15.0]
}

/// Random walk as (north metres, east metres, seconds) steps.
fn wander() -> impl Strategy<Value = Vec<(f64, f64, i64)>> {
    prop::collection::vec((step(), step(), 1i64..4), 1..150)
}

/// Rowing outing as blocks of (seconds, metres per second).
fn outing_blocks() -> impl Strategy<Value = Vec<(usize, f64)>> {
    prop::collection::vec((5usize..80, 1.0f64..6.0), 2..12)
}

proptest! {
    #[test]
    fn cumulative_distance_is_prefix_sum(walk in wander()) {
        let mut fixes = outing_from_speeds(&[]);
        let (mut lat, mut lon) = (fixes[0].latitude, fixes[0].longitude);
        let mut t = fixes[0].timestamp;
        for (north, east, dt) in walk {
            lat += north * DEG_PER_M;
            lon += east * DEG_PER_M;
            t += chrono::Duration::seconds(dt);
            fixes.push(piecify::Fix::new(t, lat, lon));
        }

        let track = build_track(&fixes, 4).unwrap();
        let mut expected = 0.0;
        for pair in track.points().windows(2) {
            let (prev, point) = (&pair[0], &pair[1]);
            let raw = haversine_distance(prev.latitude, prev.longitude, point.latitude, point.longitude);
            prop_assert!(point.segment_m > 0.0);
            if raw > 0.0 {
                prop_assert!((point.segment_m - raw).abs() < 1e-9);
            }
            expected += point.segment_m;
            prop_assert!(point.total_m >= prev.total_m);
            prop_assert!((point.total_m - expected).abs() < 1e-6);
            prop_assert!(point.pace.is_some_and(f64::is_finite));
        }
    }

    #[test]
    fn segmentation_is_repeatable_and_well_formed(
        blocks in outing_blocks(),
        trim in any::<bool>(),
        min_distance in 100.0f64..600.0,
    ) {
        let fixes = outing_from_speeds(&speeds(&blocks));
        let track = build_track(&fixes, 4).unwrap();
        let params = Params {
            min_piece_distance_m: min_distance,
            trim_to_canonical: trim,
            ..Params::default()
        };

        let first = find_pieces(&track, &params).unwrap();
        let second = find_pieces(&track, &params).unwrap();
        prop_assert_eq!(&first.pieces, &second.pieces);
        prop_assert_eq!(first.threshold_pace, second.threshold_pace);
        prop_assert_eq!(first.params_hash, second.params_hash);

        for (n, piece) in first.pieces.iter().enumerate() {
            prop_assert_eq!(piece.id, n + 1);
            prop_assert!(piece.start_index < piece.finish_index);
            prop_assert!(piece.distance_m >= min_distance);
            prop_assert!(piece.duration_s > 0.0);
        }
        for pair in first.pieces.windows(2) {
            prop_assert!(pair[0].start_index <= pair[1].start_index);
        }
    }

    #[test]
    fn matched_windows_never_overlap(
        blocks in outing_blocks(),
        distances in prop::collection::vec(100.0f64..1500.0, 1..6),
    ) {
        let fixes = outing_from_speeds(&speeds(&blocks));
        let track = build_track(&fixes, 4).unwrap();
        let targets: Vec<Target> = distances
            .iter()
            .enumerate()
            .map(|(i, &d)| Target::new(i as u32 + 1, d))
            .collect();

        let report = match_targets(&track, &targets).unwrap();
        prop_assert_eq!(report.results.len(), targets.len());

        let mut spans: Vec<(usize, usize)> = Vec::new();
        for (target, window) in report.matched() {
            prop_assert!(window.start_index < window.end_index);
            prop_assert!(window.covered_m >= target.distance_m);
            spans.push((window.start_index, window.end_index));
        }
        spans.sort();
        for pair in spans.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].0);
        }
        prop_assert_eq!(report.chronological_ids.len(), spans.len());
    }
}
