use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use piecify::{
    build_track, format_duration, format_pace, match_targets, parse_pace_token, parse_records,
    segment_fixes, summarize, Fix, Params, PieceReport, Target, TargetMatch,
};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Rowing piece detection and target matching", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Skip the parsed-file cache
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    no_cache: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect pieces in one or more outings
    Pieces(PiecesArgs),
    /// Match planned target distances against a single outing
    Match(MatchArgs),
    /// Whole-outing totals for one or more outings
    Summary(SummaryArgs),
    /// Export the per-point distance and pace table
    Points(PointsArgs),
}

#[derive(Parser, Debug)]
struct PiecesArgs {
    /// FIT/GPX/TCX/SpeedCoach CSV files to segment
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// JSON parameter file used as the base configuration
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Smoothing window (points)
    #[arg(long)]
    smooth: Option<usize>,

    /// Minimum piece distance (metres)
    #[arg(long)]
    min_distance: Option<f64>,

    /// Pace threshold per 500 m (m:ss or seconds); derived from the best split if omitted
    #[arg(long)]
    threshold: Option<String>,

    /// Merge candidates separated by less than this many seconds
    #[arg(long)]
    gap: Option<f64>,

    /// Trim finishes to the nearest 250 m
    #[arg(long, action = ArgAction::SetTrue)]
    trim: bool,
}

#[derive(Parser, Debug)]
struct MatchArgs {
    /// Recorded outing
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Targets as `id:metres` or plain metres, comma separated
    #[arg(long, conflicts_with = "targets_file", required_unless_present = "targets_file")]
    targets: Option<String>,

    /// Targets as a JSON array or CSV with `id,distance_m` columns
    #[arg(long, value_hint = ValueHint::FilePath)]
    targets_file: Option<PathBuf>,

    /// Boat-class 2000 m gold medal time (m:ss.t) for GMT percentages
    #[arg(long)]
    gmt: Option<String>,

    /// Smoothing window (points)
    #[arg(long, default_value_t = 4)]
    smooth: usize,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct SummaryArgs {
    /// Recorded outings
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Smoothing window (points)
    #[arg(long, default_value_t = 4)]
    smooth: usize,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct PointsArgs {
    /// Recorded outing
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Smoothing window (points)
    #[arg(long, default_value_t = 4)]
    smooth: usize,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "points.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let cache_dir = if cli.no_cache {
        None
    } else {
        let dir = PathBuf::from(".cache").join("parsed_fixes");
        let _ = fs::create_dir_all(&dir);
        Some(dir)
    };

    match cli.command {
        Command::Pieces(args) => handle_pieces(args, cache_dir.as_deref()),
        Command::Match(args) => handle_match(args, cache_dir.as_deref()),
        Command::Summary(args) => handle_summary(args, cache_dir.as_deref()),
        Command::Points(args) => handle_points(args, cache_dir.as_deref()),
    }
}

fn handle_pieces(args: PiecesArgs, cache_dir: Option<&Path>) -> Result<()> {
    let params = resolve_params(&args)?;
    debug!(fingerprint = %params.fingerprint()?, "segmentation parameters");

    let t_parse = Instant::now();
    let outings = load_outings(&args.inputs, cache_dir);
    info!(
        "Parse stage: {:.1} ms ({} files)",
        t_parse.elapsed().as_secs_f64() * 1000.0,
        outings.len()
    );

    let reports: Vec<(PathBuf, Result<PieceReport>)> = outings
        .into_par_iter()
        .map(|(path, fixes)| {
            let report = fixes.and_then(|fixes| {
                segment_fixes(&fixes, &params)
                    .with_context(|| format!("failed to segment {}", path.display()))
            });
            (path, report)
        })
        .collect();

    let mut writer = output_writer(&args.output)?;
    writer.write_record([
        "file",
        "piece",
        "start_time",
        "finish_time",
        "start_type",
        "distance_m",
        "duration",
        "pace",
        "start_index",
        "finish_index",
    ])?;

    let mut written = 0usize;
    for (path, report) in reports {
        let report = match report {
            Ok(report) => report,
            Err(err) => {
                warn!("Skipping {}: {:#}", path.display(), err);
                continue;
            }
        };
        info!(
            "{}: {} pieces from {} candidates (threshold {})",
            path.display(),
            report.pieces.len(),
            report.candidate_count,
            format_pace(report.threshold_pace)
        );
        for piece in report.flagged() {
            warn!(
                "{}: piece {} start could not be resolved; check it by hand",
                path.display(),
                piece.id
            );
        }

        let file = path.display().to_string();
        for piece in &report.pieces {
            writer.write_record([
                file.clone(),
                piece.id.to_string(),
                format_time(piece.start_time),
                format_time(piece.finish_time),
                piece.start_type.to_string(),
                format!("{:.1}", piece.distance_m),
                format_duration(piece.duration_s),
                format_pace(piece.pace),
                piece.start_index.to_string(),
                piece.finish_index.to_string(),
            ])?;
            written += 1;
        }
    }

    writer.flush()?;
    info!("Wrote {} pieces to {}", written, args.output.display());
    Ok(())
}

fn handle_match(args: MatchArgs, cache_dir: Option<&Path>) -> Result<()> {
    let targets = match (&args.targets, &args.targets_file) {
        (Some(list), _) => parse_target_list(list)?,
        (None, Some(path)) => load_targets_file(path)?,
        (None, None) => bail!("no targets supplied"),
    };
    let gmt = args
        .gmt
        .as_deref()
        .map(|token| {
            parse_pace_token(token).ok_or_else(|| anyhow!("invalid gold medal time '{token}'"))
        })
        .transpose()?;

    let fixes = load_fixes(&args.input, cache_dir)?;
    let track = build_track(&fixes, args.smooth)
        .with_context(|| format!("failed to build track for {}", args.input.display()))?;
    let report = match_targets(&track, &targets)?;

    let mut writer = output_writer(&args.output)?;
    for result in &report.results {
        let window = result.outcome.window();
        if matches!(result.outcome, TargetMatch::Unmatched) {
            warn!(
                "Target {} ({} m) has no free window; reconcile it by hand",
                result.target.id, result.target.distance_m
            );
        }
        writer.serialize(MatchRow {
            target: result.target.id,
            distance_m: result.target.distance_m,
            status: if window.is_some() { "matched" } else { "unmatched" },
            start_time: window.map(|w| format_time(w.start_time)),
            end_time: window.map(|w| format_time(w.end_time)),
            elapsed: window.map(|w| format_duration(w.target_elapsed_s)),
            pace: window.map(|w| format_pace(w.pace)),
            gmt_percent: window
                .zip(gmt)
                .and_then(|(w, gmt)| w.gmt_percent(gmt))
                .map(|p| format!("{p:.1}")),
            start_index: window.map(|w| w.start_index),
            end_index: window.map(|w| w.end_index),
        })?;
    }
    writer.flush()?;

    if report.chronological {
        info!(
            "Matched {} of {} targets in planned order",
            report.matched().count(),
            targets.len()
        );
    } else {
        warn!(
            "Matched targets are out of planned order on the water: {:?}",
            report.chronological_ids
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct MatchRow {
    target: u32,
    distance_m: f64,
    status: &'static str,
    start_time: Option<String>,
    end_time: Option<String>,
    elapsed: Option<String>,
    pace: Option<String>,
    gmt_percent: Option<String>,
    start_index: Option<usize>,
    end_index: Option<usize>,
}

fn handle_summary(args: SummaryArgs, cache_dir: Option<&Path>) -> Result<()> {
    let outings = load_outings(&args.inputs, cache_dir);
    let mut writer = output_writer(&args.output)?;
    writer.write_record([
        "file",
        "distance_m",
        "time",
        "moving_time",
        "moving_distance_m",
        "moving_pace",
        "best_pace",
        "readings",
        "mean_interval_s",
    ])?;

    for (path, fixes) in outings {
        let summary = match fixes.and_then(|fixes| {
            build_track(&fixes, args.smooth)
                .with_context(|| format!("failed to build track for {}", path.display()))
        }) {
            Ok(track) => summarize(&track),
            Err(err) => {
                warn!("Skipping {}: {:#}", path.display(), err);
                continue;
            }
        };
        writer.write_record([
            path.display().to_string(),
            format!("{:.1}", summary.total_distance_m),
            format_duration(summary.total_time_s),
            format_duration(summary.moving_time_s),
            format!("{:.1}", summary.moving_distance_m),
            summary.moving_pace.map(format_pace).unwrap_or_default(),
            summary.best_pace.map(format_pace).unwrap_or_default(),
            summary.readings.to_string(),
            format!("{:.2}", summary.mean_interval_s),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn handle_points(args: PointsArgs, cache_dir: Option<&Path>) -> Result<()> {
    let fixes = load_fixes(&args.input, cache_dir)?;
    let track = build_track(&fixes, args.smooth)
        .with_context(|| format!("failed to build track for {}", args.input.display()))?;

    let mut writer = output_writer(&args.output)?;
    writer.write_record([
        "index",
        "latitude",
        "longitude",
        "time",
        "segment_m",
        "total_m",
        "pace",
        "smoothed_pace",
    ])?;
    for point in track.points() {
        writer.write_record([
            point.index.to_string(),
            format!("{:.7}", point.latitude),
            format!("{:.7}", point.longitude),
            format_time(point.timestamp),
            format!("{:.3}", point.segment_m),
            format!("{:.3}", point.total_m),
            point.pace.map(|p| format!("{p:.2}")).unwrap_or_default(),
            point
                .smoothed_pace
                .map(|p| format!("{p:.2}"))
                .unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    info!("Wrote {} points to {}", track.len(), args.output.display());
    Ok(())
}

fn resolve_params(args: &PiecesArgs) -> Result<Params> {
    let mut params = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => Params::default(),
    };
    if let Some(window) = args.smooth {
        params.smoothing_window = window;
    }
    if let Some(distance) = args.min_distance {
        params.min_piece_distance_m = distance;
    }
    if let Some(token) = args.threshold.as_deref() {
        let threshold = parse_pace_token(token)
            .ok_or_else(|| anyhow!("invalid pace threshold '{token}'; expected m:ss or seconds"))?;
        params.pace_threshold = Some(threshold);
    }
    if let Some(gap) = args.gap {
        params.merge_gap_s = gap;
    }
    if args.trim {
        params.trim_to_canonical = true;
    }
    params.validate()?;
    Ok(params)
}

/// `id:metres` pairs or bare distances numbered from 1.
fn parse_target_list(input: &str) -> Result<Vec<Target>> {
    let mut targets = Vec::new();
    let tokens = input.split(',').map(str::trim).filter(|t| !t.is_empty());
    for (n, token) in tokens.enumerate() {
        let target = match token.split_once(':') {
            Some((id, distance)) => Target::new(
                id.trim()
                    .parse()
                    .with_context(|| format!("invalid target id in '{token}'"))?,
                distance
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid target distance in '{token}'"))?,
            ),
            None => Target::new(
                n as u32 + 1,
                token
                    .parse()
                    .with_context(|| format!("invalid target distance '{token}'"))?,
            ),
        };
        targets.push(target);
    }
    if targets.is_empty() {
        bail!("no targets supplied");
    }
    Ok(targets)
}

fn load_targets_file(path: &Path) -> Result<Vec<Target>> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let targets: Vec<Target> = if is_json {
        let text =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        reader
            .deserialize()
            .collect::<Result<_, _>>()
            .with_context(|| format!("failed to parse {}", path.display()))?
    };
    if targets.is_empty() {
        bail!("{} lists no targets", path.display());
    }
    Ok(targets)
}

/// Decode every input in parallel, keeping input order. Failures are carried
/// per file so one bad outing does not sink the batch.
fn load_outings(
    inputs: &[PathBuf],
    cache_dir: Option<&Path>,
) -> Vec<(PathBuf, Result<Vec<Fix>>)> {
    inputs
        .par_iter()
        .map(|path| (path.clone(), load_fixes(path, cache_dir)))
        .collect()
}

fn load_fixes(path: &Path, cache_dir: Option<&Path>) -> Result<Vec<Fix>> {
    let key = match cache_dir {
        Some(dir) => {
            let key = cache_key(path)?;
            if let Some(cached) = read_cache(dir, &key) {
                debug!("cache hit for {}", path.display());
                return Ok(cached);
            }
            Some(key)
        }
        None => None,
    };

    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let hint = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let fixes =
        parse_records(&data, hint).with_context(|| format!("failed to parse {}", path.display()))?;

    if let (Some(dir), Some(key)) = (cache_dir, key) {
        if let Err(err) = write_cache(dir, &key, &fixes) {
            debug!("cache write failed for {}: {:#}", path.display(), err);
        }
    }
    Ok(fixes)
}

fn cache_key(path: &Path) -> Result<String> {
    use std::time::SystemTime;
    let meta = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    let modified = meta
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    path.to_string_lossy().hash(&mut hasher);
    meta.len().hash(&mut hasher);
    (modified.as_secs(), modified.subsec_nanos()).hash(&mut hasher);
    Ok(format!("{:016x}", hasher.finish()))
}

fn read_cache(dir: &Path, key: &str) -> Option<Vec<Fix>> {
    let text = fs::read_to_string(dir.join(format!("{key}.json"))).ok()?;
    serde_json::from_str(&text).ok()
}

fn write_cache(dir: &Path, key: &str, fixes: &[Fix]) -> Result<()> {
    let path = dir.join(format!("{key}.json"));
    let text = serde_json::to_string(fixes)?;
    fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn output_writer(path: &Path) -> Result<csv::Writer<Box<dyn Write>>> {
    let sink: Box<dyn Write> = if path.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )
    };
    Ok(csv::Writer::from_writer(sink))
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S%.1f").to_string()
}
