//! Synthetic outings for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use piecify::Fix;

/// Degrees of latitude per metre on the 6,371 km haversine sphere.
pub const DEG_PER_M: f64 = 1.0 / (6_371_000.0 * std::f64::consts::PI / 180.0);

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap()
}

/// 1 Hz outing heading due north. Each `(count, split)` block adds `count`
/// one-second segments rowed at `split` seconds per 500 m.
pub fn outing_from_splits(blocks: &[(usize, f64)]) -> Vec<Fix> {
    let speeds: Vec<f64> = blocks
        .iter()
        .flat_map(|&(n, split)| std::iter::repeat(500.0 / split).take(n))
        .collect();
    outing_from_speeds(&speeds)
}

/// 1 Hz outing heading due north; `speeds[i]` is metres covered in second `i + 1`.
pub fn outing_from_speeds(speeds: &[f64]) -> Vec<Fix> {
    let t0 = start_time();
    let mut fixes = Vec::with_capacity(speeds.len() + 1);
    fixes.push(Fix::new(t0, 51.0, -0.1));
    let mut metres = 0.0;
    for (i, v) in speeds.iter().enumerate() {
        metres += v;
        fixes.push(Fix::new(
            t0 + Duration::seconds(i as i64 + 1),
            51.0 + metres * DEG_PER_M,
            -0.1,
        ));
    }
    fixes
}

/// Blocks of `(count, metres per second)`.
pub fn speeds(blocks: &[(usize, f64)]) -> Vec<f64> {
    blocks
        .iter()
        .flat_map(|&(n, v)| std::iter::repeat(v).take(n))
        .collect()
}
