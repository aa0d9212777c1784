//! Loaders for the portal's delimited tables.
//!
//! The portal publishes EUC-KR text whose header names drift between releases,
//! so every table is read by column position. Width and numeric coercion are
//! checked row by row and the first bad value aborts the load.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use csv::StringRecord;
use encoding_rs::EUC_KR;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A per-lane reading from the measurement table.
///
/// The table's own date column is not read: a file holds one supply date and
/// readings are stamped with the date being processed.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Collection time as the portal encodes it, HHMMSS without separators.
    pub collected_hms: u32,
    pub vds_id: String,
    pub occupancy: f64,
    pub speed: f64,
    /// `-1` marks a reading with no data.
    pub volume: i64,
    pub lane_no: i64,
}

/// A road segment ("conzone").
#[derive(Debug, Clone, PartialEq)]
pub struct ConZone {
    pub zone_id: String,
    pub length_m: f64,
    pub direction_code: String,
    pub name: String,
}

/// Placement of one sensor on its route.
#[derive(Debug, Clone, PartialEq)]
pub struct VdsZone {
    pub vds_id: String,
    pub start_milepost: f64,
    pub end_milepost: f64,
    pub route_no: i64,
    pub zone_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableKind {
    VdsData,
    ConZone,
    VdsZone,
    VdsPoint,
}

impl TableKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::VdsData => "vds_data",
            Self::ConZone => "con_zone",
            Self::VdsZone => "vds_zone",
            Self::VdsPoint => "vds_point",
        }
    }

    /// Minimum record width, one past the highest position read.
    fn min_columns(self) -> usize {
        match self {
            Self::VdsData => 9,
            Self::ConZone => 10,
            Self::VdsZone => 11,
            Self::VdsPoint => 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("{table} record at {path}:{line} has {found} columns, expected at least {expected}")]
    InvalidRecordColumns {
        table: &'static str,
        path: PathBuf,
        line: u64,
        found: usize,
        expected: usize,
    },
    #[error("failed to parse {table} field {field} at {path}:{line}, value '{value}'")]
    ParseField {
        table: &'static str,
        path: PathBuf,
        line: u64,
        field: &'static str,
        value: String,
    },
}

/// Decodes bytes written in the portal's legacy Korean code page.
///
/// `encoding_rs` maps the EUC-KR label to windows-949, a superset, so
/// extended Hangul in road names survives.
pub(crate) fn decode_legacy(bytes: &[u8]) -> String {
    let (text, _, had_errors) = EUC_KR.decode(bytes);
    if had_errors {
        warn!(
            component = "tables",
            event = "tables.decode.replacement",
            "input contained bytes outside EUC-KR; replaced with U+FFFD"
        );
    }
    text.into_owned()
}

/// `|` when the header line contains one, `,` otherwise.
pub fn detect_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    if header.contains('|') {
        b'|'
    } else {
        b','
    }
}

pub(crate) fn delimited_reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(text))
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes())
}

pub(crate) fn read_legacy_text(path: &Path) -> Result<String, TableError> {
    let bytes = fs::read(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(decode_legacy(&bytes))
}

/// Hand-maintained files are usually UTF-8; portal exports never are.
pub(crate) fn read_utf8_or_legacy_text(path: &Path) -> Result<String, TableError> {
    let bytes = fs::read(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(text)),
        Err(err) => Ok(decode_legacy(err.as_bytes())),
    }
}

/// Position-checked access to one record.
struct Row<'a> {
    table: TableKind,
    path: &'a Path,
    line: u64,
    record: &'a StringRecord,
}

impl<'a> Row<'a> {
    fn text(&self, idx: usize) -> String {
        self.record.get(idx).unwrap_or_default().trim().to_string()
    }

    fn parse<T: std::str::FromStr>(&self, idx: usize, field: &'static str) -> Result<T, TableError> {
        let raw = self.record.get(idx).unwrap_or_default().trim();
        raw.parse::<T>().map_err(|_| self.parse_error(field, raw))
    }

    fn parse_error(&self, field: &'static str, raw: &str) -> TableError {
        TableError::ParseField {
            table: self.table.as_str(),
            path: self.path.to_path_buf(),
            line: self.line,
            field,
            value: raw.to_string(),
        }
    }
}

fn for_each_row(
    path: &Path,
    table: TableKind,
    mut f: impl FnMut(&Row<'_>) -> Result<(), TableError>,
) -> Result<usize, TableError> {
    let text = read_legacy_text(path)?;
    let mut reader = delimited_reader(&text);
    let mut rows = 0usize;

    for record in reader.records() {
        let record = record.map_err(|source| TableError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        if record.len() < table.min_columns() {
            return Err(TableError::InvalidRecordColumns {
                table: table.as_str(),
                path: path.to_path_buf(),
                line,
                found: record.len(),
                expected: table.min_columns(),
            });
        }

        f(&Row {
            table,
            path,
            line,
            record: &record,
        })?;
        rows += 1;
    }

    debug!(
        component = "tables",
        event = "tables.load.finish",
        table = table.as_str(),
        path = %path.display(),
        rows
    );
    Ok(rows)
}

pub fn load_readings(path: &Path) -> Result<Vec<Reading>, TableError> {
    let mut readings = Vec::new();
    for_each_row(path, TableKind::VdsData, |row| {
        let collected_hms: u32 = row.parse(1, "collected_hms")?;
        if hms_to_time(collected_hms).is_none() {
            return Err(row.parse_error("collected_hms", &row.text(1)));
        }

        readings.push(Reading {
            collected_hms,
            vds_id: row.text(2),
            occupancy: row.parse(5, "occupancy")?,
            speed: row.parse(6, "speed")?,
            volume: row.parse(7, "volume")?,
            lane_no: row.parse(8, "lane_no")?,
        });
        Ok(())
    })?;

    info!(
        component = "tables",
        event = "tables.readings.loaded",
        path = %path.display(),
        readings = readings.len()
    );
    Ok(readings)
}

/// Segments keyed by zone id. The first row wins for a repeated id.
pub fn load_con_zones(path: &Path) -> Result<HashMap<String, ConZone>, TableError> {
    let mut zones = HashMap::new();
    let mut duplicates = 0usize;
    for_each_row(path, TableKind::ConZone, |row| {
        let zone = ConZone {
            zone_id: row.text(0),
            length_m: row.parse(1, "length_m")?,
            direction_code: row.text(2),
            name: row.text(9),
        };
        if zones.contains_key(&zone.zone_id) {
            duplicates += 1;
        } else {
            zones.insert(zone.zone_id.clone(), zone);
        }
        Ok(())
    })?;

    log_duplicates(TableKind::ConZone, path, duplicates);
    Ok(zones)
}

/// Sensor placements keyed by sensor id. The first row wins for a repeated id.
pub fn load_vds_zones(path: &Path) -> Result<HashMap<String, VdsZone>, TableError> {
    let mut zones = HashMap::new();
    let mut duplicates = 0usize;
    for_each_row(path, TableKind::VdsZone, |row| {
        let zone = VdsZone {
            vds_id: row.text(0),
            start_milepost: row.parse(2, "start_milepost")?,
            end_milepost: row.parse(3, "end_milepost")?,
            route_no: row.parse(4, "route_no")?,
            zone_id: row.text(10),
        };
        if zones.contains_key(&zone.vds_id) {
            duplicates += 1;
        } else {
            zones.insert(zone.vds_id.clone(), zone);
        }
        Ok(())
    })?;

    log_duplicates(TableKind::VdsZone, path, duplicates);
    Ok(zones)
}

/// Route number to road name, taken from the point-sensor table.
///
/// Point sensors repeat the route on every row; the last name seen wins.
pub fn load_road_names(path: &Path) -> Result<HashMap<i64, String>, TableError> {
    let mut names = HashMap::new();
    for_each_row(path, TableKind::VdsPoint, |row| {
        names.insert(row.parse(8, "route_no")?, row.text(9));
        Ok(())
    })?;
    Ok(names)
}

fn log_duplicates(table: TableKind, path: &Path, duplicates: usize) {
    if duplicates > 0 {
        warn!(
            component = "tables",
            event = "tables.duplicate_keys",
            table = table.as_str(),
            path = %path.display(),
            duplicates
        );
    }
}

pub(crate) fn hms_to_time(hms: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hms / 10_000, (hms / 100) % 100, hms % 100)
}
