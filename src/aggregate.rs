//! 5-minute bucket aggregation of joined readings.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Timelike};
use tracing::info;

use crate::join::{JoinedReading, SegmentMeta};
use crate::lane::LaneType;

pub const BUCKET_MINUTES: u32 = 5;
/// Marks a missing measure, both in raw readings and in empty buckets.
pub const NO_DATA: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub vds_id: String,
    pub lane_type: LaneType,
    pub bucket_start: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketMeasures {
    pub volume: i64,
    pub occupancy: f64,
    pub speed: f64,
}

impl BucketMeasures {
    pub const NO_DATA: Self = Self {
        volume: NO_DATA,
        occupancy: NO_DATA as f64,
        speed: NO_DATA as f64,
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedBucket {
    pub key: BucketKey,
    pub meta: SegmentMeta,
    pub measures: BucketMeasures,
}

impl AggregatedBucket {
    /// `YYYYMMDD` of the bucket start.
    pub fn date_label(&self) -> String {
        self.key.bucket_start.format("%Y%m%d").to_string()
    }

    /// `HHMM` of the bucket start.
    pub fn time_label(&self) -> String {
        self.key.bucket_start.format("%H%M").to_string()
    }
}

/// Floors a wall-clock timestamp to its 5-minute bucket.
pub fn bucket_start(at: NaiveDateTime) -> NaiveDateTime {
    at.with_minute(at.minute() - at.minute() % BUCKET_MINUTES)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

/// Groups readings by (sensor, lane type, 5-minute bucket) and reduces each
/// group. Output is ordered by that key.
pub fn aggregate(readings: &[JoinedReading]) -> Vec<AggregatedBucket> {
    let mut groups: BTreeMap<BucketKey, Vec<&JoinedReading>> = BTreeMap::new();
    for reading in readings {
        let key = BucketKey {
            vds_id: reading.vds_id.clone(),
            lane_type: reading.lane_type,
            bucket_start: bucket_start(reading.collected_at),
        };
        groups.entry(key).or_default().push(reading);
    }

    let buckets: Vec<AggregatedBucket> = groups
        .into_iter()
        .map(|(key, rows)| AggregatedBucket {
            // Groups are never empty; the first row carries the metadata.
            meta: rows[0].meta.clone(),
            measures: reduce(&rows),
            key,
        })
        .collect();

    let empty_buckets = buckets
        .iter()
        .filter(|bucket| bucket.measures.volume == NO_DATA)
        .count();
    info!(
        component = "aggregate",
        event = "aggregate.finish",
        readings = readings.len(),
        buckets = buckets.len(),
        empty_buckets
    );
    buckets
}

/// Reduces one bucket's readings:
/// - readings with volume `-1` are dropped; none left gives all `-1`
/// - zero total volume gives speed and occupancy `0`
/// - otherwise speed is volume-weighted and occupancy averages non-zero values
pub fn reduce(rows: &[&JoinedReading]) -> BucketMeasures {
    let valid: Vec<&JoinedReading> = rows
        .iter()
        .copied()
        .filter(|row| row.volume != NO_DATA)
        .collect();
    if valid.is_empty() {
        return BucketMeasures::NO_DATA;
    }

    let volume: i64 = valid.iter().map(|row| row.volume).sum();
    if volume == 0 {
        return BucketMeasures {
            volume,
            occupancy: 0.0,
            speed: 0.0,
        };
    }

    let weighted_speed: f64 = valid.iter().map(|row| row.speed * row.volume as f64).sum();
    let occupied: Vec<f64> = valid
        .iter()
        .map(|row| row.occupancy)
        .filter(|occupancy| *occupancy != 0.0)
        .collect();
    let occupancy = if occupied.is_empty() {
        0.0
    } else {
        occupied.iter().sum::<f64>() / occupied.len() as f64
    };

    BucketMeasures {
        volume,
        occupancy,
        speed: weighted_speed / volume as f64,
    }
}
