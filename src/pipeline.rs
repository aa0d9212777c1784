//! Per-date processing and the date-range drivers.
//!
//! Dates are independent: every worker owns its tables and its output file,
//! and only read-only configuration is shared between threads.

use std::path::PathBuf;
use std::thread;

use chrono::NaiveDate;
use crossbeam::channel;
use thiserror::Error;
use tracing::{error, info};

use crate::aggregate::aggregate;
use crate::holiday::{HolidayCalendar, HolidayCode};
use crate::join::join_and_classify;
use crate::output::{output_file_name, write_buckets, OutputError};
use crate::portal::{prepare_source_files, FetchError, HttpTransport, PortalConfig, SourcePaths};
use crate::tables::{load_con_zones, load_readings, load_road_names, load_vds_zones, TableError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Where raw portal tables are cached, one set of four files per date.
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub portal: PortalConfig,
    /// Upper bound on dates processed concurrently.
    pub max_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("temp"),
            output_dir: PathBuf::from("output"),
            portal: PortalConfig::default(),
            max_workers: default_workers(),
        }
    }
}

pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateReport {
    pub date: NaiveDate,
    pub holiday: HolidayCode,
    pub readings: usize,
    pub buckets: usize,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub workers: usize,
    /// One entry per date, in date order.
    pub dates: Vec<DateReport>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("processing {date} failed: {source}")]
    DateFailed {
        date: NaiveDate,
        source: Box<PipelineError>,
    },
    #[error("a worker thread panicked")]
    WorkerPanicked,
}

/// Parses the `YYYYMMDD` dates used on the command line and in file names.
pub fn parse_compact_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y%m%d")
        .map_err(|err| format!("expected a YYYYMMDD date, got '{raw}': {err}"))
}

/// Every calendar date from `start` to `end`, both included.
pub fn dates_inclusive(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, PipelineError> {
    if start > end {
        return Err(PipelineError::InvalidRange { start, end });
    }
    Ok(start.iter_days().take_while(|date| *date <= end).collect())
}

/// Fetch, load, join, aggregate and write one date.
pub fn process_date(
    date: NaiveDate,
    holiday: HolidayCode,
    config: &PipelineConfig,
    transport: &dyn HttpTransport,
) -> Result<DateReport, PipelineError> {
    info!(
        component = "pipeline",
        event = "pipeline.date.start",
        date = %date,
        holiday_code = holiday.code()
    );

    let paths = prepare_source_files(date, &config.data_dir, &config.portal, transport)?;
    let readings = load_readings(&paths.vds_data)?;
    let con_zones = load_con_zones(&paths.con_zone)?;
    let vds_zones = load_vds_zones(&paths.vds_zone)?;
    let road_names = load_road_names(&paths.vds_point)?;

    let joined = join_and_classify(
        date,
        &readings,
        &vds_zones,
        &con_zones,
        &road_names,
        holiday,
    );
    let buckets = aggregate(&joined);

    let output_path = config.output_dir.join(output_file_name(date));
    write_buckets(&buckets, &output_path)?;

    info!(
        component = "pipeline",
        event = "pipeline.date.finish",
        date = %date,
        readings = readings.len(),
        buckets = buckets.len(),
        path = %output_path.display()
    );

    Ok(DateReport {
        date,
        holiday,
        readings: readings.len(),
        buckets: buckets.len(),
        output_path,
    })
}

/// Processes every date in the range on at most `config.max_workers` threads.
///
/// All dates are attempted; when any fail, the earliest failing date's error
/// is returned.
pub fn run_range(
    start: NaiveDate,
    end: NaiveDate,
    calendar: &HolidayCalendar,
    config: &PipelineConfig,
    transport: &dyn HttpTransport,
) -> Result<RunReport, PipelineError> {
    let dates = dates_inclusive(start, end)?;
    let workers = config.max_workers.clamp(1, dates.len());
    info!(
        component = "pipeline",
        event = "pipeline.range.start",
        start = %start,
        end = %end,
        dates = dates.len(),
        workers
    );

    let (job_tx, job_rx) = channel::unbounded::<NaiveDate>();
    for date in &dates {
        // Receiver is alive in this scope.
        let _ = job_tx.send(*date);
    }
    drop(job_tx);

    let (result_tx, result_rx) = channel::unbounded();
    crossbeam::thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move |_| {
                for date in job_rx.iter() {
                    let outcome = process_date(date, calendar.code_for(date), config, transport);
                    if let Err(err) = &outcome {
                        error!(
                            component = "pipeline",
                            event = "pipeline.date.failed",
                            date = %date,
                            error = %err
                        );
                    }
                    if result_tx.send((date, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
    })
    .map_err(|_| PipelineError::WorkerPanicked)?;
    drop(result_tx);

    let mut results: Vec<(NaiveDate, Result<DateReport, PipelineError>)> =
        result_rx.iter().collect();
    results.sort_by_key(|(date, _)| *date);

    let mut reports = Vec::with_capacity(results.len());
    let mut first_failure = None;
    for (date, outcome) in results {
        match outcome {
            Ok(report) => reports.push(report),
            Err(source) => {
                if first_failure.is_none() {
                    first_failure = Some(PipelineError::DateFailed {
                        date,
                        source: Box::new(source),
                    });
                }
            }
        }
    }

    info!(
        component = "pipeline",
        event = "pipeline.range.finish",
        start = %start,
        end = %end,
        succeeded = reports.len(),
        failed = dates.len() - reports.len()
    );

    match first_failure {
        Some(err) => Err(err),
        None => Ok(RunReport {
            start,
            end,
            workers,
            dates: reports,
        }),
    }
}

/// Downloads the four raw tables for every date in the range, one date at a
/// time. Files already present are left alone.
pub fn download_range(
    start: NaiveDate,
    end: NaiveDate,
    data_dir: &std::path::Path,
    portal: &PortalConfig,
    transport: &dyn HttpTransport,
) -> Result<Vec<SourcePaths>, PipelineError> {
    let dates = dates_inclusive(start, end)?;
    info!(
        component = "pipeline",
        event = "download.range.start",
        start = %start,
        end = %end,
        dates = dates.len(),
        data_dir = %data_dir.display()
    );

    let mut prepared = Vec::with_capacity(dates.len());
    for date in dates {
        let paths = prepare_source_files(date, data_dir, portal, transport).map_err(|source| {
            PipelineError::DateFailed {
                date,
                source: Box::new(source.into()),
            }
        })?;
        prepared.push(paths);
    }

    info!(
        component = "pipeline",
        event = "download.range.finish",
        start = %start,
        end = %end,
        dates = prepared.len()
    );
    Ok(prepared)
}
