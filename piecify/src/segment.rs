//! Autonomous piece discovery from smoothed pace.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::track::{build_track, Track};
use crate::tune;
use crate::{Fix, Params, PieceError};

const AUTO_THRESHOLD_FACTOR: f64 = 1.2;
/// Pieces must finish faster than threshold + this margin (s/500 m).
const SLOW_PIECE_MARGIN_S: f64 = 4.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StartType {
    Standing,
    Rolling,
    /// Start tuning found no movement onset; the boundary needs review.
    #[serde(rename = "Rolling*")]
    RollingUnresolved,
}

impl StartType {
    pub fn needs_review(&self) -> bool {
        matches!(self, StartType::RollingUnresolved)
    }
}

impl fmt::Display for StartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StartType::Standing => "Standing",
            StartType::Rolling => "Rolling",
            StartType::RollingUnresolved => "Rolling*",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Piece {
    pub id: usize,
    pub start_index: usize,
    pub start_time: DateTime<Utc>,
    pub start_offset_s: f64,
    pub start_distance_m: f64,
    pub finish_index: usize,
    pub finish_time: DateTime<Utc>,
    pub finish_offset_s: f64,
    pub finish_distance_m: f64,
    pub duration_s: f64,
    pub distance_m: f64,
    /// Average split, seconds per 500 m.
    pub pace: f64,
    pub start_type: StartType,
}

impl Piece {
    /// Piece spanning two track points. Callers guarantee `start < finish`.
    pub(crate) fn between(track: &Track, start: usize, finish: usize) -> Self {
        let s = track.point(start);
        let f = track.point(finish);
        let duration_s = f.offset_s - s.offset_s;
        let distance_m = f.total_m - s.total_m;
        Self {
            id: 0,
            start_index: start,
            start_time: s.timestamp,
            start_offset_s: s.offset_s,
            start_distance_m: s.total_m,
            finish_index: finish,
            finish_time: f.timestamp,
            finish_offset_s: f.offset_s,
            finish_distance_m: f.total_m,
            duration_s,
            distance_m,
            pace: split(duration_s, distance_m),
            start_type: StartType::RollingUnresolved,
        }
    }

    /// Move the start to `index`, keeping the finish where it is.
    pub(crate) fn set_start(&mut self, track: &Track, index: usize) {
        let p = track.point(index);
        self.start_index = index;
        self.start_time = p.timestamp;
        self.start_offset_s = p.offset_s;
        self.start_distance_m = p.total_m;
        self.recompute();
    }

    /// Move the finish onto the point at `index`.
    pub(crate) fn set_finish(&mut self, track: &Track, index: usize) {
        let p = track.point(index);
        self.finish_index = index;
        self.finish_time = p.timestamp;
        self.finish_offset_s = p.offset_s;
        self.finish_distance_m = p.total_m;
        self.recompute();
    }

    fn recompute(&mut self) {
        self.duration_s = self.finish_offset_s - self.start_offset_s;
        self.distance_m = self.finish_distance_m - self.start_distance_m;
        self.pace = split(self.duration_s, self.distance_m);
    }
}

pub(crate) fn split(duration_s: f64, distance_m: f64) -> f64 {
    duration_s * 500.0 / distance_m
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PieceReport {
    pub params_hash: String,
    /// Threshold actually applied, seconds per 500 m.
    pub threshold_pace: f64,
    /// Candidates found by the scan, before tuning and filtering.
    pub candidate_count: usize,
    pub pieces: Vec<Piece>,
}

impl PieceReport {
    pub fn flagged(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.iter().filter(|p| p.start_type.needs_review())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanState {
    Idle,
    InPiece { start: usize },
}

/// Discover, tune, filter and number the pieces of an outing.
pub fn find_pieces(track: &Track, params: &Params) -> Result<PieceReport, PieceError> {
    params.validate()?;
    let threshold = resolve_threshold(track, params)?;

    let mut pieces = detect_candidates(track, threshold, params.merge_gap_s);
    let candidate_count = pieces.len();
    debug!(candidate_count, threshold, "scanned track for pieces");

    for piece in &mut pieces {
        piece.start_type = tune::tune_start(track, piece);
        if params.trim_to_canonical {
            tune::trim_finish(track, piece);
        } else {
            tune::refine_finish(track, piece, threshold);
        }
    }

    pieces.retain(|p| p.distance_m >= params.min_piece_distance_m);
    pieces.retain(|p| p.pace < threshold + SLOW_PIECE_MARGIN_S);
    pieces.sort_by_key(|p| p.start_index);
    for (n, piece) in pieces.iter_mut().enumerate() {
        piece.id = n + 1;
    }

    Ok(PieceReport {
        params_hash: params.fingerprint()?,
        threshold_pace: threshold,
        candidate_count,
        pieces,
    })
}

/// Build the track from raw fixes with `params.smoothing_window`, then segment.
pub fn segment_fixes(fixes: &[Fix], params: &Params) -> Result<PieceReport, PieceError> {
    params.validate()?;
    let track = build_track(fixes, params.smoothing_window)?;
    find_pieces(&track, params)
}

fn resolve_threshold(track: &Track, params: &Params) -> Result<f64, PieceError> {
    match params.pace_threshold {
        Some(threshold) => Ok(threshold),
        None => track
            .min_smoothed_pace()
            .map(|best| best * AUTO_THRESHOLD_FACTOR)
            .ok_or_else(|| PieceError::InsufficientData("no smoothed pace available".into())),
    }
}

fn detect_candidates(track: &Track, threshold: f64, merge_gap_s: f64) -> Vec<Piece> {
    let mut pieces: Vec<Piece> = Vec::new();
    let mut state = ScanState::Idle;

    for point in track.points() {
        let Some(smoothed) = point.smoothed_pace else {
            continue;
        };
        match state {
            ScanState::Idle if smoothed < threshold => {
                let resumed = pieces
                    .last()
                    .filter(|prev| point.offset_s - prev.finish_offset_s < merge_gap_s)
                    .map(|prev| prev.start_index);
                let start = match resumed {
                    Some(prev_start) => {
                        pieces.pop();
                        debug!(at = point.index, prev_start, "merging with previous piece");
                        prev_start
                    }
                    None => point.index,
                };
                state = ScanState::InPiece { start };
            }
            ScanState::InPiece { start } if smoothed > threshold => {
                pieces.push(Piece::between(track, start, point.index));
                state = ScanState::Idle;
            }
            _ => {}
        }
    }

    if let ScanState::InPiece { start } = state {
        let last = track.last_index();
        if start < last {
            pieces.push(Piece::between(track, start, last));
        }
    }
    pieces
}
