//! Distance and pace enrichment of a fix stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Fix, PieceError};

const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Stand-in for a zero-length segment so pace stays finite.
pub const ZERO_SEGMENT_EPS_M: f64 = 1e-5;
const CLOSEST_POINT_MAX_GAP_S: f64 = 3600.0;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub index: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    /// Seconds since the first point of the track.
    pub offset_s: f64,
    pub segment_m: f64,
    pub total_m: f64,
    /// Seconds per 500 m over the segment ending at this point.
    pub pace: Option<f64>,
    pub smoothed_pace: Option<f64>,
}

/// Enriched, immutable point arena. Everything downstream addresses points
/// by index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    points: Vec<Point>,
    smoothing_window: usize,
}

impl Track {
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn point(&self, index: usize) -> &Point {
        &self.points[index]
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    pub fn smoothing_window(&self) -> usize {
        self.smoothing_window
    }

    /// Seconds between two points.
    pub fn elapsed_s(&self, from: usize, to: usize) -> f64 {
        self.points[to].offset_s - self.points[from].offset_s
    }

    /// Metres between two points along the track.
    pub fn distance_m(&self, from: usize, to: usize) -> f64 {
        self.points[to].total_m - self.points[from].total_m
    }

    pub fn pace(&self, index: usize) -> Option<f64> {
        self.points[index].pace
    }

    pub fn min_smoothed_pace(&self) -> Option<f64> {
        self.points
            .iter()
            .filter_map(|p| p.smoothed_pace)
            .fold(None, |best: Option<f64>, v| {
                Some(best.map_or(v, |b| b.min(v)))
            })
    }

    /// Index of the point whose offset is closest to `offset_s`. Ties keep
    /// the earlier point; nothing within an hour yields index 0.
    pub fn closest_index(&self, offset_s: f64) -> usize {
        let mut best_gap = CLOSEST_POINT_MAX_GAP_S;
        let mut best = 0;
        for point in &self.points {
            let gap = (point.offset_s - offset_s).abs();
            if gap < best_gap {
                best_gap = gap;
                best = point.index;
            }
        }
        best
    }

    /// Absolute timestamp for an offset from the first point.
    pub fn time_at(&self, offset_s: f64) -> DateTime<Utc> {
        let base = self.points[0].timestamp;
        base + chrono::Duration::milliseconds((offset_s * 1000.0).round() as i64)
    }
}

/// Build the enriched track. Fails with `InsufficientData` on fewer than two
/// fixes, repeated or decreasing timestamps or unusable coordinates.
pub fn build_track(fixes: &[Fix], smoothing_window: usize) -> Result<Track, PieceError> {
    if smoothing_window == 0 {
        return Err(PieceError::InvalidParameter(
            "smoothing window must be at least one point".into(),
        ));
    }
    if fixes.len() < 2 {
        return Err(PieceError::InsufficientData(format!(
            "need at least 2 fixes, got {}",
            fixes.len()
        )));
    }

    let base = fixes[0].timestamp;
    let mut points: Vec<Point> = Vec::with_capacity(fixes.len());
    let mut total = 0.0;

    for (index, fix) in fixes.iter().enumerate() {
        check_coordinates(index, fix)?;
        let offset_s = (fix.timestamp - base).num_milliseconds() as f64 / 1000.0;

        let Some(prev) = points.last() else {
            points.push(Point {
                index,
                latitude: fix.latitude,
                longitude: fix.longitude,
                timestamp: fix.timestamp,
                offset_s,
                segment_m: 0.0,
                total_m: 0.0,
                pace: None,
                smoothed_pace: None,
            });
            continue;
        };

        if fix.timestamp <= prev.timestamp {
            return Err(PieceError::InsufficientData(format!(
                "timestamp does not advance at fix {index}"
            )));
        }

        let mut segment =
            haversine_distance(prev.latitude, prev.longitude, fix.latitude, fix.longitude);
        if segment == 0.0 {
            segment = ZERO_SEGMENT_EPS_M;
        }
        total += segment;

        let pace = (offset_s - prev.offset_s) * 500.0 / segment;
        let smoothed = if index >= smoothing_window {
            let back = &points[index - smoothing_window];
            (offset_s - back.offset_s) * 500.0 / (total - back.total_m)
        } else {
            pace
        };

        points.push(Point {
            index,
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: fix.timestamp,
            offset_s,
            segment_m: segment,
            total_m: total,
            pace: Some(pace),
            smoothed_pace: Some(smoothed),
        });
    }

    Ok(Track {
        points,
        smoothing_window,
    })
}

fn check_coordinates(index: usize, fix: &Fix) -> Result<(), PieceError> {
    let lat_ok = fix.latitude.is_finite() && (-90.0..=90.0).contains(&fix.latitude);
    let lon_ok = fix.longitude.is_finite() && (-180.0..=180.0).contains(&fix.longitude);
    if lat_ok && lon_ok {
        Ok(())
    } else {
        Err(PieceError::InsufficientData(format!(
            "missing or invalid coordinates at fix {index}"
        )))
    }
}

/// Great-circle distance in metres between two degree-valued positions.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}
