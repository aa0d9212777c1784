//! Left join of readings onto sensor, segment and road-name references.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::info;

use crate::holiday::HolidayCode;
use crate::lane::{classify, LaneType, SensorSpan};
use crate::tables::{hms_to_time, ConZone, Reading, VdsZone};

/// Road and segment attributes attached to a reading. Every field is optional
/// because the join is a left join.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentMeta {
    pub route_no: Option<i64>,
    pub road_name: Option<String>,
    pub zone_id: Option<String>,
    pub zone_name: Option<String>,
    pub zone_length_m: Option<f64>,
    pub direction_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinedReading {
    pub vds_id: String,
    pub collected_at: NaiveDateTime,
    pub lane_type: LaneType,
    pub occupancy: f64,
    pub speed: f64,
    pub volume: i64,
    pub meta: SegmentMeta,
}

/// Readings are stamped with `date`, the supply date of the table they came from.
pub fn join_and_classify(
    date: NaiveDate,
    readings: &[Reading],
    vds_zones: &HashMap<String, VdsZone>,
    con_zones: &HashMap<String, ConZone>,
    road_names: &HashMap<i64, String>,
    holiday: HolidayCode,
) -> Vec<JoinedReading> {
    let mut unmatched_sensors = 0usize;
    let mut bus_lane = 0usize;

    let joined: Vec<JoinedReading> = readings
        .iter()
        .map(|reading| {
            let sensor = vds_zones.get(&reading.vds_id);
            if sensor.is_none() {
                unmatched_sensors += 1;
            }
            let segment = sensor.and_then(|s| con_zones.get(&s.zone_id));
            let span = sensor.map(|s| SensorSpan {
                route_no: s.route_no,
                start_milepost: s.start_milepost,
                end_milepost: s.end_milepost,
            });

            let lane_type = classify(
                reading.lane_no,
                span.as_ref(),
                reading.collected_hms,
                holiday,
            );
            if lane_type == LaneType::BusOnly {
                bus_lane += 1;
            }

            // Loader rejects impossible times, midnight only guards hand-built readings.
            let time = hms_to_time(reading.collected_hms).unwrap_or(NaiveTime::MIN);

            JoinedReading {
                vds_id: reading.vds_id.clone(),
                collected_at: date.and_time(time),
                lane_type,
                occupancy: reading.occupancy,
                speed: reading.speed,
                volume: reading.volume,
                meta: SegmentMeta {
                    route_no: sensor.map(|s| s.route_no),
                    road_name: sensor.and_then(|s| road_names.get(&s.route_no).cloned()),
                    zone_id: sensor.map(|s| s.zone_id.clone()),
                    zone_name: segment.map(|z| z.name.clone()),
                    zone_length_m: segment.map(|z| z.length_m),
                    direction_code: segment.map(|z| z.direction_code.clone()),
                },
            }
        })
        .collect();

    info!(
        component = "join",
        event = "join.finish",
        readings = joined.len(),
        unmatched_sensors,
        bus_lane,
        holiday_code = holiday.code()
    );
    joined
}
