use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;
use vds_rollup::{
    default_workers, init_logging, log_app_start, log_range_selected, parse_compact_date,
    portal_config_from_env, run_range, HolidayCalendar, LogOptions, PipelineConfig,
    ReqwestPortalTransport,
};

/// Aggregate VDS readings into 5-minute buckets for every date in a range.
#[derive(Debug, Parser)]
#[command(name = "vds-process")]
struct Cli {
    /// First date to process, YYYYMMDD
    #[arg(value_parser = parse_compact_date)]
    start_date: NaiveDate,

    /// Last date to process (inclusive), YYYYMMDD
    #[arg(value_parser = parse_compact_date)]
    end_date: NaiveDate,

    /// Holiday file mapping YYYYMMDD dates to codes 0-4
    holiday_csv_path: PathBuf,

    /// Directory holding (or receiving) the raw portal tables
    data_path: PathBuf,

    /// Directory the 5-minute output files are written to
    output_path: PathBuf,

    /// Maximum number of dates processed at once
    #[arg(long, env = "VDS_MAX_WORKERS", default_value_t = default_workers())]
    workers: usize,

    #[command(flatten)]
    logging: LogOptions,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_logging(&cli.logging)?;
    log_app_start("vds_process", &cli.logging);
    log_range_selected("vds_process", cli.start_date, cli.end_date, &cli.data_path);

    let calendar = HolidayCalendar::load(&cli.holiday_csv_path)?;
    let config = PipelineConfig {
        data_dir: cli.data_path,
        output_dir: cli.output_path,
        portal: portal_config_from_env(),
        max_workers: cli.workers.max(1),
    };
    let transport = ReqwestPortalTransport::new(&config.portal)?;

    let report = run_range(
        cli.start_date,
        cli.end_date,
        &calendar,
        &config,
        &transport,
    )?;

    let buckets: usize = report.dates.iter().map(|date| date.buckets).sum();
    println!(
        "Processed {} date(s) from {} to {} on {} worker(s): {} buckets written to {}",
        report.dates.len(),
        report.start.format("%Y%m%d"),
        report.end.format("%Y%m%d"),
        report.workers,
        buckets,
        config.output_dir.display()
    );
    Ok(())
}
