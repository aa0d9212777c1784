//! The per-date 5-minute output table.
//!
//! The consuming system expects the portal's own column names, EUC-KR text and
//! a trailing empty column on every row.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use csv::StringRecord;
use encoding_rs::EUC_KR;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::aggregate::{AggregatedBucket, BucketKey, BucketMeasures};
use crate::join::SegmentMeta;
use crate::lane::LaneType;
use crate::portal::write_atomic;
use crate::tables::{read_legacy_text, TableError};

pub const OUTPUT_HEADERS: [&str; 14] = [
    "도로번호",
    "도로명",
    "콘존ID",
    "구간명",
    "구간길이(m)",
    "기점종점방향구분코드",
    "집계일자",
    "집계시분",
    "VDS_ID",
    "차로유형구분코드",
    "교통량",
    "점유율",
    "평균속도",
    "",
];

/// `<output_dir>/vds_data_5min_<YYYYMMDD>.csv`
pub fn output_file_name(date: chrono::NaiveDate) -> String {
    format!("vds_data_5min_{}.csv", date.format("%Y%m%d"))
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Read(#[from] TableError),
    #[error("output for {path} contains characters EUC-KR cannot encode")]
    Unencodable { path: PathBuf },
    #[error("output record at {path}:{line} has {found} columns, expected {expected}")]
    InvalidRecordColumns {
        path: PathBuf,
        line: u64,
        found: usize,
        expected: usize,
    },
    #[error("failed to parse output field {field} at {path}:{line}, value '{value}'")]
    ParseField {
        path: PathBuf,
        line: u64,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    route_no: Option<i64>,
    road_name: Option<&'a str>,
    zone_id: Option<&'a str>,
    zone_name: Option<&'a str>,
    zone_length_m: Option<f64>,
    direction_code: Option<&'a str>,
    date: String,
    time: String,
    vds_id: &'a str,
    lane_type: u8,
    volume: i64,
    occupancy: f64,
    speed: f64,
    trailer: &'static str,
}

impl<'a> From<&'a AggregatedBucket> for OutputRow<'a> {
    fn from(bucket: &'a AggregatedBucket) -> Self {
        Self {
            route_no: bucket.meta.route_no,
            road_name: bucket.meta.road_name.as_deref(),
            zone_id: bucket.meta.zone_id.as_deref(),
            zone_name: bucket.meta.zone_name.as_deref(),
            zone_length_m: bucket.meta.zone_length_m,
            direction_code: bucket.meta.direction_code.as_deref(),
            date: bucket.date_label(),
            time: bucket.time_label(),
            vds_id: &bucket.key.vds_id,
            lane_type: bucket.key.lane_type.code(),
            volume: bucket.measures.volume,
            occupancy: bucket.measures.occupancy,
            speed: bucket.measures.speed,
            trailer: "",
        }
    }
}

/// Serializes buckets in the given order and replaces `path` in one step.
pub fn write_buckets(buckets: &[AggregatedBucket], path: &Path) -> Result<(), OutputError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(OUTPUT_HEADERS)?;
    for bucket in buckets {
        writer.serialize(OutputRow::from(bucket))?;
    }
    let utf8 = writer
        .into_inner()
        .map_err(|err| OutputError::Io {
            path: path.to_path_buf(),
            source: err.into_error(),
        })?;
    let text = String::from_utf8_lossy(&utf8);

    let (encoded, _, unmappable) = EUC_KR.encode(&text);
    if unmappable {
        return Err(OutputError::Unencodable {
            path: path.to_path_buf(),
        });
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| OutputError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    write_atomic(path, &encoded).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!(
        component = "output",
        event = "output.write.finish",
        path = %path.display(),
        rows = buckets.len(),
        bytes = encoded.len()
    );
    Ok(())
}

/// Parses an output file back into buckets. Empty metadata fields come back
/// as `None`.
pub fn read_buckets(path: &Path) -> Result<Vec<AggregatedBucket>, OutputError> {
    let text = read_legacy_text(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());

    let mut buckets = Vec::new();
    for record in reader.records() {
        let record = record?;
        buckets.push(parse_output_record(path, &record)?);
    }
    Ok(buckets)
}

fn parse_output_record(path: &Path, record: &StringRecord) -> Result<AggregatedBucket, OutputError> {
    let line = record.position().map(|pos| pos.line()).unwrap_or_default();
    if record.len() != OUTPUT_HEADERS.len() {
        return Err(OutputError::InvalidRecordColumns {
            path: path.to_path_buf(),
            line,
            found: record.len(),
            expected: OUTPUT_HEADERS.len(),
        });
    }

    let field_error = |field: &'static str, value: &str| OutputError::ParseField {
        path: path.to_path_buf(),
        line,
        field,
        value: value.to_string(),
    };
    let text = |idx: usize| {
        let raw = record.get(idx).unwrap_or_default();
        (!raw.is_empty()).then(|| raw.to_string())
    };
    let optional_number = |idx: usize, field: &'static str| -> Result<Option<f64>, OutputError> {
        match record.get(idx).unwrap_or_default() {
            "" => Ok(None),
            raw => raw.parse().map(Some).map_err(|_| field_error(field, raw)),
        }
    };
    let number = |idx: usize, field: &'static str| -> Result<f64, OutputError> {
        let raw = record.get(idx).unwrap_or_default();
        raw.parse().map_err(|_| field_error(field, raw))
    };

    let route_no = match record.get(0).unwrap_or_default() {
        "" => None,
        raw => Some(raw.parse::<i64>().map_err(|_| field_error("route_no", raw))?),
    };

    let stamp = format!(
        "{}{}",
        record.get(6).unwrap_or_default(),
        record.get(7).unwrap_or_default()
    );
    let bucket_start = NaiveDateTime::parse_from_str(&stamp, "%Y%m%d%H%M")
        .map_err(|_| field_error("bucket_start", &stamp))?;

    let raw_lane = record.get(9).unwrap_or_default();
    let lane_type = raw_lane
        .parse::<u8>()
        .ok()
        .and_then(LaneType::from_code)
        .ok_or_else(|| field_error("lane_type", raw_lane))?;

    let raw_volume = record.get(10).unwrap_or_default();
    let volume = raw_volume
        .parse::<i64>()
        .map_err(|_| field_error("volume", raw_volume))?;

    Ok(AggregatedBucket {
        key: BucketKey {
            vds_id: record.get(8).unwrap_or_default().to_string(),
            lane_type,
            bucket_start,
        },
        meta: SegmentMeta {
            route_no,
            road_name: text(1),
            zone_id: text(2),
            zone_name: text(3),
            zone_length_m: optional_number(4, "zone_length_m")?,
            direction_code: text(5),
        },
        measures: BucketMeasures {
            volume,
            occupancy: number(11, "occupancy")?,
            speed: number(12, "speed")?,
        },
    })
}
