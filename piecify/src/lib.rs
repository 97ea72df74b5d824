//! Rowing piece detection and target matching over recorded GPS tracks.
//!
//! A raw stream of position fixes is enriched into a [`Track`] (distance and
//! pace per point), which is then either segmented into pieces from pace
//! dynamics ([`find_pieces`]) or matched against a planned list of target
//! distances ([`match_targets`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod matcher;
pub mod pace;
pub mod parse;
pub mod segment;
pub mod summary;
pub mod track;
pub mod tune;

pub use matcher::{match_targets, MatchReport, MatchWindow, Target, TargetMatch, TargetResult};
pub use pace::{format_duration, format_pace, parse_pace_token};
pub use parse::parse_records;
pub use segment::{find_pieces, segment_fixes, Piece, PieceReport, StartType};
pub use summary::{summarize, WorkoutSummary};
pub use track::{build_track, haversine_distance, Point, Track};

#[derive(Error, Debug)]
pub enum PieceError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to parse FIT file: {0}")]
    FitParse(String),
    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),
    #[error("failed to parse TCX file: {0}")]
    TcxParse(String),
    #[error("failed to parse SpeedCoach CSV: {0}")]
    CsvParse(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// A single position fix as delivered by a decoder.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Fix {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

impl Fix {
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
        }
    }
}

/// Per-call configuration for track building and segmentation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    /// Number of trailing points used for the smoothed pace.
    pub smoothing_window: usize,
    pub min_piece_distance_m: f64,
    /// Seconds per 500 m. `None` derives it as 1.2x the best smoothed pace.
    pub pace_threshold: Option<f64>,
    pub merge_gap_s: f64,
    /// Trim finishes to the nearest canonical 250 m distance.
    pub trim_to_canonical: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            smoothing_window: 4,
            min_piece_distance_m: 250.0,
            pace_threshold: None,
            merge_gap_s: 30.0,
            trim_to_canonical: false,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), PieceError> {
        if self.smoothing_window == 0 {
            return Err(PieceError::InvalidParameter(
                "smoothing window must be at least one point".into(),
            ));
        }
        if !(self.min_piece_distance_m > 0.0) {
            return Err(PieceError::InvalidParameter(format!(
                "minimum piece distance must be positive (got {})",
                self.min_piece_distance_m
            )));
        }
        if !(self.merge_gap_s >= 0.0) {
            return Err(PieceError::InvalidParameter(format!(
                "merge gap must be >= 0 (got {})",
                self.merge_gap_s
            )));
        }
        if let Some(threshold) = self.pace_threshold {
            if !(threshold > 0.0) || !threshold.is_finite() {
                return Err(PieceError::InvalidParameter(format!(
                    "pace threshold must be a positive number of seconds (got {threshold})"
                )));
            }
        }
        Ok(())
    }

    /// SHA-256 of the JSON form, stable for identical configurations.
    pub fn fingerprint(&self) -> Result<String, PieceError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| PieceError::InvalidParameter(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
