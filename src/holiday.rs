//! Holiday codes and the per-date lookup that drives bus-lane windows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

use crate::tables::{delimited_reader, read_utf8_or_legacy_text, TableError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HolidayCode {
    #[default]
    Weekday,
    Holiday,
    /// The day before a multi-day (Seollal/Chuseok) holiday.
    EveOfLongHoliday,
    LongHoliday,
    /// The first day after a multi-day holiday.
    DayAfterLongHoliday,
}

impl HolidayCode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Weekday),
            1 => Some(Self::Holiday),
            2 => Some(Self::EveOfLongHoliday),
            3 => Some(Self::LongHoliday),
            4 => Some(Self::DayAfterLongHoliday),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Weekday => 0,
            Self::Holiday => 1,
            Self::EveOfLongHoliday => 2,
            Self::LongHoliday => 3,
            Self::DayAfterLongHoliday => 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum HolidayError {
    #[error(transparent)]
    Read(#[from] TableError),
    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("holiday file {path}:{line} has invalid date '{value}'")]
    InvalidDate {
        path: PathBuf,
        line: u64,
        value: String,
    },
    #[error("holiday file {path}:{line} has unknown holiday code '{value}'")]
    UnknownCode {
        path: PathBuf,
        line: u64,
        value: String,
    },
}

/// Date to holiday code. Dates not listed are weekdays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolidayCalendar {
    codes: HashMap<NaiveDate, HolidayCode>,
}

impl HolidayCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a delimited file with a header row, `YYYYMMDD` dates in the first
    /// column and codes 0-4 in the second.
    pub fn load(path: &Path) -> Result<Self, HolidayError> {
        let text = read_utf8_or_legacy_text(path)?;
        let mut reader = delimited_reader(&text);
        let mut calendar = Self::new();

        for record in reader.records() {
            let record = record.map_err(|source| HolidayError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
            let line = record.position().map(|pos| pos.line()).unwrap_or_default();
            let raw_date = record.get(0).unwrap_or_default().trim();
            let raw_code = record.get(1).unwrap_or_default().trim();
            if raw_date.is_empty() && raw_code.is_empty() {
                continue;
            }

            let date = NaiveDate::parse_from_str(raw_date, "%Y%m%d").map_err(|_| {
                HolidayError::InvalidDate {
                    path: path.to_path_buf(),
                    line,
                    value: raw_date.to_string(),
                }
            })?;
            let code = raw_code
                .parse::<u8>()
                .ok()
                .and_then(HolidayCode::from_code)
                .ok_or_else(|| HolidayError::UnknownCode {
                    path: path.to_path_buf(),
                    line,
                    value: raw_code.to_string(),
                })?;
            calendar.insert(date, code);
        }

        info!(
            component = "holiday",
            event = "holiday.calendar.loaded",
            path = %path.display(),
            entries = calendar.len()
        );
        Ok(calendar)
    }

    pub fn insert(&mut self, date: NaiveDate, code: HolidayCode) {
        self.codes.insert(date, code);
    }

    pub fn code_for(&self, date: NaiveDate) -> HolidayCode {
        self.codes.get(&date).copied().unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.codes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn codes_round_trip_through_numbers() {
        for code in 0..=4u8 {
            assert_eq!(HolidayCode::from_code(code).unwrap().code(), code);
        }
        assert_eq!(HolidayCode::from_code(5), None);
    }

    #[test]
    fn loads_calendar_and_defaults_missing_dates_to_weekday() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("holidays_2019.csv");
        fs::write(&path, "날짜,분류코드\n20190204,2\n20190205,3\n20190207,4\n20190301,1\n").unwrap();

        let calendar = HolidayCalendar::load(&path).unwrap();
        assert_eq!(calendar.len(), 4);
        assert_eq!(calendar.code_for(ymd(2019, 2, 4)), HolidayCode::EveOfLongHoliday);
        assert_eq!(calendar.code_for(ymd(2019, 2, 5)), HolidayCode::LongHoliday);
        assert_eq!(calendar.code_for(ymd(2019, 2, 7)), HolidayCode::DayAfterLongHoliday);
        assert_eq!(calendar.code_for(ymd(2019, 3, 1)), HolidayCode::Holiday);
        assert_eq!(calendar.code_for(ymd(2019, 3, 4)), HolidayCode::Weekday);
    }

    #[test]
    fn unknown_code_fails_the_load() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("holidays.csv");
        fs::write(&path, "date|code\n20190204|9\n").unwrap();

        let err = HolidayCalendar::load(&path).unwrap_err();
        assert!(matches!(err, HolidayError::UnknownCode { line: 2, .. }));
    }

    #[test]
    fn malformed_date_fails_the_load() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("holidays.csv");
        fs::write(&path, "date,code\n2019-02-04,1\n").unwrap();

        assert!(matches!(
            HolidayCalendar::load(&path).unwrap_err(),
            HolidayError::InvalidDate { .. }
        ));
    }

    #[test]
    fn legacy_encoded_holiday_file_still_loads() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("holidays_euc_kr.csv");
        let (bytes, _, _) = encoding_rs::EUC_KR.encode("날짜|분류코드\n20190301|1\n");
        assert!(std::str::from_utf8(&bytes).is_err());
        fs::write(&path, bytes).unwrap();

        let calendar = HolidayCalendar::load(&path).unwrap();
        assert_eq!(calendar.code_for(ymd(2019, 3, 1)), HolidayCode::Holiday);
    }
}
