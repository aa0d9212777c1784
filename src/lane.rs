//! Bus-only lane classification.
//!
//! The expressway runs a median bus-only lane on part of the Gyeongbu line
//! (route 10), extended on holidays and joined by a stretch of route 500.
//! Whether a lane-1 reading belongs to that corridor depends on the sensor's
//! milepost span, the time of day and the day's holiday code. Open and closed
//! ends of every window below are significant.


use crate::holiday::HolidayCode;

const BUS_LANE_NO: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LaneType {
    General,
    BusOnly,
}

impl LaneType {
    pub fn code(self) -> u8 {
        match self {
            Self::General => 1,
            Self::BusOnly => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::General),
            2 => Some(Self::BusOnly),
            _ => None,
        }
    }
}

/// Route placement of the sensor that produced a reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSpan {
    pub route_no: i64,
    pub start_milepost: f64,
    pub end_milepost: f64,
}

/// Inclusive milepost window on one route. A sensor matches when its span
/// overlaps the window.
struct Corridor {
    route_no: i64,
    from_milepost: f64,
    to_milepost: f64,
}

impl Corridor {
    fn contains(&self, span: &SensorSpan) -> bool {
        span.route_no == self.route_no
            && span.end_milepost >= self.from_milepost
            && span.start_milepost <= self.to_milepost
    }
}

const WEEKDAY_CORRIDORS: &[Corridor] = &[Corridor {
    route_no: 10,
    from_milepost: 376.4,
    to_milepost: 423.0,
}];

const HOLIDAY_CORRIDORS: &[Corridor] = &[
    Corridor {
        route_no: 10,
        from_milepost: 282.0,
        to_milepost: 423.0,
    },
    Corridor {
        route_no: 500,
        from_milepost: 43.6,
        to_milepost: 70.5,
    },
];

fn corridors(holiday: HolidayCode) -> &'static [Corridor] {
    match holiday {
        HolidayCode::Weekday => WEEKDAY_CORRIDORS,
        _ => HOLIDAY_CORRIDORS,
    }
}

fn in_operating_hours(holiday: HolidayCode, hms: u32) -> bool {
    let daytime = (70_000..=210_000).contains(&hms);
    let until_midnight = (70_000..240_000).contains(&hms);
    let after_midnight = hms > 0 && hms <= 10_000;

    match holiday {
        HolidayCode::Weekday | HolidayCode::Holiday => daytime,
        HolidayCode::EveOfLongHoliday => until_midnight,
        HolidayCode::LongHoliday => after_midnight || until_midnight,
        HolidayCode::DayAfterLongHoliday => after_midnight,
    }
}

/// Classifies one reading. Readings whose sensor has no route placement are
/// always general-lane.
pub fn classify(
    lane_no: i64,
    span: Option<&SensorSpan>,
    collected_hms: u32,
    holiday: HolidayCode,
) -> LaneType {
    let Some(span) = span else {
        return LaneType::General;
    };

    let bus_lane = lane_no == BUS_LANE_NO
        && corridors(holiday).iter().any(|corridor| corridor.contains(span))
        && in_operating_hours(holiday, collected_hms);

    if bus_lane {
        LaneType::BusOnly
    } else {
        LaneType::General
    }
}
