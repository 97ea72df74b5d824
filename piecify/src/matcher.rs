//! Matching planned target distances against a recorded track.
//!
//! Targets are identified only by distance. Each one claims the fastest
//! window covering its distance that no longer target has already claimed;
//! targets sharing a distance are then handed their windows in identifier
//! order. That last step assumes repeats were rowed in the planned order,
//! so the report carries a chronology check rather than trusting it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::track::Track;
use crate::PieceError;

pub type TargetId = u32;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub id: TargetId,
    pub distance_m: f64,
}

impl Target {
    pub fn new(id: TargetId, distance_m: f64) -> Self {
        Self { id, distance_m }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MatchWindow {
    pub start_index: usize,
    pub end_index: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Elapsed time between the two window points.
    pub elapsed_s: f64,
    /// Distance actually covered, at least the target distance.
    pub covered_m: f64,
    /// Target distance this window was matched to.
    pub distance_m: f64,
    /// Elapsed time pro-rated to exactly `distance_m`.
    pub target_elapsed_s: f64,
    pub pace: f64,
}

impl MatchWindow {
    fn new(track: &Track, start: usize, end: usize, distance_m: f64) -> Self {
        let elapsed_s = track.elapsed_s(start, end);
        let covered_m = track.distance_m(start, end);
        let target_elapsed_s = elapsed_s * distance_m / covered_m;
        Self {
            start_index: start,
            end_index: end,
            start_time: track.point(start).timestamp,
            end_time: track.point(end).timestamp,
            elapsed_s,
            covered_m,
            distance_m,
            target_elapsed_s,
            pace: target_elapsed_s * 500.0 / distance_m,
        }
    }

    /// Percentage of a boat class's 2000 m gold medal time, scaled to this
    /// window's distance.
    pub fn gmt_percent(&self, gmt_2000m_s: f64) -> Option<f64> {
        if self.target_elapsed_s <= 0.0 || gmt_2000m_s <= 0.0 {
            return None;
        }
        Some(100.0 * gmt_2000m_s * self.distance_m / (self.target_elapsed_s * 2000.0))
    }
}

fn overlaps(claimed: &[(usize, usize)], start: usize, end: usize) -> bool {
    claimed.iter().any(|&(s, e)| !(end <= s || start >= e))
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", content = "window", rename_all = "snake_case")]
pub enum TargetMatch {
    Matched(MatchWindow),
    /// No window left for this target; needs manual reconciliation.
    Unmatched,
}

impl TargetMatch {
    pub fn window(&self) -> Option<&MatchWindow> {
        match self {
            TargetMatch::Matched(window) => Some(window),
            TargetMatch::Unmatched => None,
        }
    }

    fn from_option(window: Option<MatchWindow>) -> Self {
        window.map_or(TargetMatch::Unmatched, TargetMatch::Matched)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TargetResult {
    pub target: Target,
    pub outcome: TargetMatch,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchReport {
    /// One entry per target, in input order.
    pub results: Vec<TargetResult>,
    /// Matched identifiers are non-decreasing in track order.
    pub chronological: bool,
    /// Matched identifiers sorted by window start.
    pub chronological_ids: Vec<TargetId>,
}

impl MatchReport {
    pub fn matched(&self) -> impl Iterator<Item = (&Target, &MatchWindow)> {
        self.results
            .iter()
            .filter_map(|r| r.outcome.window().map(|w| (&r.target, w)))
    }

    pub fn unmatched(&self) -> impl Iterator<Item = &Target> {
        self.results
            .iter()
            .filter(|r| r.outcome.window().is_none())
            .map(|r| &r.target)
    }
}

/// Locate every target in the track, longest first.
pub fn match_targets(track: &Track, targets: &[Target]) -> Result<MatchReport, PieceError> {
    for target in targets {
        if !(target.distance_m > 0.0) || !target.distance_m.is_finite() {
            return Err(PieceError::InvalidParameter(format!(
                "target {} has invalid distance {}",
                target.id, target.distance_m
            )));
        }
    }

    let mut order: Vec<usize> = (0..targets.len()).collect();
    order.sort_by(|&a, &b| targets[b].distance_m.total_cmp(&targets[a].distance_m));

    let mut windows: Vec<Option<MatchWindow>> = vec![None; targets.len()];
    let mut claimed: Vec<(usize, usize)> = Vec::with_capacity(targets.len());
    for &i in &order {
        let target = &targets[i];
        let found = fastest_window(track, target.distance_m, &claimed);
        match &found {
            Some(w) => {
                debug!(
                    target = target.id,
                    start = w.start_index,
                    end = w.end_index,
                    elapsed = w.elapsed_s,
                    "matched target"
                );
                claimed.push((w.start_index, w.end_index));
            }
            None => debug!(target = target.id, "no free window for target"),
        }
        windows[i] = found;
    }

    reassign_same_distance(targets, &mut windows);

    let results: Vec<TargetResult> = targets
        .iter()
        .cloned()
        .zip(windows)
        .map(|(target, window)| TargetResult {
            target,
            outcome: TargetMatch::from_option(window),
        })
        .collect();
    let (chronological, chronological_ids) = chronological_order(&results);

    Ok(MatchReport {
        results,
        chronological,
        chronological_ids,
    })
}

/// Minimum-time window covering `distance_m` that avoids every claimed range.
/// The shortest end for each start only moves forward, so one pass suffices.
fn fastest_window(
    track: &Track,
    distance_m: f64,
    claimed: &[(usize, usize)],
) -> Option<MatchWindow> {
    let last = track.last_index();
    let mut best: Option<(usize, usize, f64)> = None;
    let mut end = 0;

    for start in 0..track.len() {
        end = end.max(start);
        while end < last && track.distance_m(start, end) < distance_m {
            end += 1;
        }
        if track.distance_m(start, end) < distance_m {
            break;
        }
        let elapsed = track.elapsed_s(start, end);
        if best.map_or(true, |(_, _, t)| elapsed < t) && !overlaps(claimed, start, end) {
            best = Some((start, end, elapsed));
        }
    }

    best.map(|(start, end, _)| MatchWindow::new(track, start, end, distance_m))
}

/// Within each group of equal-distance targets, hand the windows out in
/// track order to the targets in identifier order. Unmatched slots sort first.
fn reassign_same_distance(targets: &[Target], windows: &mut [Option<MatchWindow>]) {
    let mut groups: BTreeMap<OrderedFloat<f64>, Vec<usize>> = BTreeMap::new();
    for (i, target) in targets.iter().enumerate() {
        groups
            .entry(OrderedFloat(target.distance_m))
            .or_default()
            .push(i);
    }

    for members in groups.values().filter(|m| m.len() > 1) {
        let mut found: Vec<Option<MatchWindow>> =
            members.iter().map(|&i| windows[i].take()).collect();
        found.sort_by_key(|w| w.as_ref().map(|w| w.start_index));

        let mut by_id = members.clone();
        by_id.sort_by_key(|&i| targets[i].id);
        for (i, window) in by_id.into_iter().zip(found) {
            windows[i] = window;
        }
    }
}

fn chronological_order(results: &[TargetResult]) -> (bool, Vec<TargetId>) {
    let mut matched: Vec<(usize, TargetId)> = results
        .iter()
        .filter_map(|r| r.outcome.window().map(|w| (w.start_index, r.target.id)))
        .collect();
    matched.sort_by_key(|&(start, _)| start);
    let ids: Vec<TargetId> = matched.into_iter().map(|(_, id)| id).collect();
    let valid = ids.windows(2).all(|pair| pair[0] <= pair[1]);
    (valid, ids)
}
