//! Decoders that turn recorded files into the fix stream.

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use tracing::debug;

use crate::{Fix, PieceError};

const SEMICIRCLES_TO_DEGREES: f64 = 180.0 / 2_147_483_648.0;

/// Parse FIT, GPX, TCX or SpeedCoach CSV bytes using the provided format hint
/// (extension or file name).
pub fn parse_records(input: &[u8], format: &str) -> Result<Vec<Fix>, PieceError> {
    let format_lc = format.to_ascii_lowercase();
    if format_lc.ends_with(".fit") || format_lc == "fit" {
        parse_fit_records(input)
    } else if format_lc.ends_with(".gpx") || format_lc == "gpx" {
        parse_gpx_records(input)
    } else if format_lc.ends_with(".tcx") || format_lc == "tcx" {
        parse_tcx_records(input)
    } else if format_lc.ends_with(".csv") || format_lc == "csv" {
        parse_speedcoach_records(input)
    } else {
        Err(PieceError::UnsupportedFormat(format.to_string()))
    }
}

fn parse_fit_records(input: &[u8]) -> Result<Vec<Fix>, PieceError> {
    use fitparser::de::from_bytes;
    use fitparser::profile::MesgNum;
    let records = from_bytes(input).map_err(|e| PieceError::FitParse(e.to_string()))?;
    let mut out = Vec::new();

    for record in records.into_iter() {
        if record.kind() != MesgNum::Record {
            continue;
        }
        let mut timestamp: Option<DateTime<Utc>> = None;
        let mut lat: Option<f64> = None;
        let mut lon: Option<f64> = None;
        for field in record.fields() {
            match field.name() {
                "timestamp" => {
                    if let fitparser::Value::Timestamp(ts) = field.value() {
                        timestamp = Some(ts.with_timezone(&Utc));
                    }
                }
                "position_lat" => lat = fit_value_to_f64(field.value()),
                "position_long" => lon = fit_value_to_f64(field.value()),
                _ => {}
            }
        }
        if let (Some(ts), Some(lat), Some(lon)) = (timestamp, lat, lon) {
            out.push(Fix::new(
                ts,
                lat * SEMICIRCLES_TO_DEGREES,
                lon * SEMICIRCLES_TO_DEGREES,
            ));
        }
    }

    debug!(fixes = out.len(), "decoded FIT records");
    Ok(out)
}

fn fit_value_to_f64(value: &fitparser::Value) -> Option<f64> {
    match value {
        fitparser::Value::Float32(v) => Some(*v as f64),
        fitparser::Value::Float64(v) => Some(*v),
        fitparser::Value::SInt16(v) => Some(*v as f64),
        fitparser::Value::UInt16(v) => Some(*v as f64),
        fitparser::Value::SInt32(v) => Some(*v as f64),
        fitparser::Value::UInt32(v) => Some(*v as f64),
        fitparser::Value::SInt64(v) => Some(*v as f64),
        fitparser::Value::UInt64(v) => Some(*v as f64),
        fitparser::Value::UInt32z(v) => Some(*v as f64),
        fitparser::Value::SInt8(v) => Some(*v as f64),
        fitparser::Value::UInt8(v) => Some(*v as f64),
        _ => None,
    }
}

fn parse_gpx_records(input: &[u8]) -> Result<Vec<Fix>, PieceError> {
    use gpx::read;
    use std::io::Cursor;

    let mut cursor = Cursor::new(input);
    let gpx = read(&mut cursor).map_err(|e| PieceError::GpxParse(e.to_string()))?;
    let mut out = Vec::new();

    for track in gpx.tracks {
        for segment in track.segments {
            for point in segment.points {
                let Some(time) = point.time else {
                    continue;
                };
                let iso = time
                    .format()
                    .map_err(|e| PieceError::GpxParse(e.to_string()))?;
                let utc = DateTime::parse_from_rfc3339(&iso)
                    .map_err(|e| PieceError::GpxParse(e.to_string()))?
                    .with_timezone(&Utc);
                let geo = point.point();
                out.push(Fix::new(utc, geo.y(), geo.x()));
            }
        }
    }
    debug!(fixes = out.len(), "decoded GPX points");
    Ok(out)
}

/// Garmin Training Center trackpoints. Points lacking a time or a position
/// (pauses, indoor laps) are skipped.
fn parse_tcx_records(input: &[u8]) -> Result<Vec<Fix>, PieceError> {
    let text = std::str::from_utf8(input).map_err(|e| PieceError::TcxParse(e.to_string()))?;
    let doc = roxmltree::Document::parse(text).map_err(|e| PieceError::TcxParse(e.to_string()))?;
    let mut out = Vec::new();

    for point in doc.descendants().filter(|n| n.has_tag_name("Trackpoint")) {
        let Some(raw_time) = child_text(point, "Time") else {
            continue;
        };
        let Some(position) = point.children().find(|n| n.has_tag_name("Position")) else {
            continue;
        };
        let latitude = child_text(position, "LatitudeDegrees").and_then(|v| v.parse().ok());
        let longitude = child_text(position, "LongitudeDegrees").and_then(|v| v.parse().ok());
        let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
            continue;
        };
        let timestamp = DateTime::parse_from_rfc3339(raw_time)
            .map_err(|e| PieceError::TcxParse(format!("trackpoint time '{raw_time}': {e}")))?
            .with_timezone(&Utc);
        out.push(Fix::new(timestamp, latitude, longitude));
    }

    debug!(fixes = out.len(), "decoded TCX trackpoints");
    Ok(out)
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .and_then(|n| n.text())
        .map(str::trim)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SpeedCoachSection {
    Preamble,
    SessionInfo,
    Summary { start: DateTime<Utc> },
    StrokeHeader { start: DateTime<Utc> },
    Strokes { start: DateTime<Utc> },
}

const SC_ELAPSED_COL: usize = 3;
const SC_LAT_COL: usize = 22;
const SC_LON_COL: usize = 23;

/// NK SpeedCoach session export: a session block carrying the start time,
/// then per-stroke rows with elapsed time and position.
fn parse_speedcoach_records(input: &[u8]) -> Result<Vec<Fix>, PieceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);

    let mut section = SpeedCoachSection::Preamble;
    let mut out = Vec::new();

    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| PieceError::CsvParse(e.to_string()))?;
        let first = record.get(0).map(str::trim).unwrap_or("");
        section = match section {
            SpeedCoachSection::Preamble if first == "Session Information:" => {
                SpeedCoachSection::SessionInfo
            }
            SpeedCoachSection::SessionInfo if first == "Start Time:" => {
                let raw = record.get(1).map(str::trim).unwrap_or("");
                let naive = NaiveDateTime::parse_from_str(raw, "%m/%d/%Y %H:%M:%S")
                    .map_err(|e| PieceError::CsvParse(format!("start time '{raw}': {e}")))?;
                SpeedCoachSection::Summary {
                    start: Utc.from_utc_datetime(&naive),
                }
            }
            SpeedCoachSection::Summary { start } if first == "Per-Stroke Data:" => {
                SpeedCoachSection::StrokeHeader { start }
            }
            SpeedCoachSection::StrokeHeader { start } if first == "(Interval)" => {
                SpeedCoachSection::Strokes { start }
            }
            SpeedCoachSection::Strokes { start } => {
                match speedcoach_fix(&record, start) {
                    Some(fix) => out.push(fix),
                    None => debug!(row, "skipping SpeedCoach row without time or position"),
                }
                section
            }
            other => other,
        };
    }

    if section == SpeedCoachSection::Preamble {
        return Err(PieceError::CsvParse(
            "no 'Session Information:' block; not a SpeedCoach export".into(),
        ));
    }
    debug!(fixes = out.len(), "decoded SpeedCoach strokes");
    Ok(out)
}

fn speedcoach_fix(record: &csv::StringRecord, start: DateTime<Utc>) -> Option<Fix> {
    let elapsed = NaiveTime::parse_from_str(record.get(SC_ELAPSED_COL)?.trim(), "%H:%M:%S%.f").ok()?;
    let latitude: f64 = record.get(SC_LAT_COL)?.trim().parse().ok()?;
    let longitude: f64 = record.get(SC_LON_COL)?.trim().parse().ok()?;
    let millis =
        elapsed.num_seconds_from_midnight() as i64 * 1000 + (elapsed.nanosecond() / 1_000_000) as i64;
    Some(Fix::new(
        start + chrono::Duration::milliseconds(millis),
        latitude,
        longitude,
    ))
}
