use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;
use vds_rollup::{
    download_range, init_logging, log_app_start, log_range_selected, parse_compact_date,
    portal_config_from_env, LogOptions, ReqwestPortalTransport,
};

/// Download raw VDS and road reference tables from the expressway data portal.
#[derive(Debug, Parser)]
#[command(name = "vds-download")]
struct Cli {
    /// First supply date, YYYYMMDD
    #[arg(value_parser = parse_compact_date)]
    start_date: NaiveDate,

    /// Last supply date (inclusive), YYYYMMDD
    #[arg(value_parser = parse_compact_date)]
    end_date: NaiveDate,

    /// Directory the decompressed tables are written to
    parent_path: PathBuf,

    #[command(flatten)]
    logging: LogOptions,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_logging(&cli.logging)?;
    log_app_start("vds_download", &cli.logging);
    log_range_selected("vds_download", cli.start_date, cli.end_date, &cli.parent_path);

    let portal = portal_config_from_env();
    let transport = ReqwestPortalTransport::new(&portal)?;
    let prepared = download_range(
        cli.start_date,
        cli.end_date,
        &cli.parent_path,
        &portal,
        &transport,
    )?;

    println!(
        "Downloaded tables for {} date(s) from {} to {} into {}",
        prepared.len(),
        cli.start_date.format("%Y%m%d"),
        cli.end_date.format("%Y%m%d"),
        cli.parent_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn positional_arguments_parse() {
        let cli = Cli::try_parse_from(["vds-download", "20190301", "20190304", "temp"]).unwrap();
        assert_eq!(cli.start_date, NaiveDate::from_ymd_opt(2019, 3, 1).unwrap());
        assert_eq!(cli.end_date, NaiveDate::from_ymd_opt(2019, 3, 4).unwrap());
        assert_eq!(cli.parent_path, PathBuf::from("temp"));
    }

    #[test]
    fn missing_parent_path_is_a_usage_error() {
        let err = Cli::try_parse_from(["vds-download", "20190301", "20190304"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn extra_argument_is_a_usage_error() {
        let err = Cli::try_parse_from(["vds-download", "20190301", "20190304", "temp", "more"])
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn malformed_date_is_a_usage_error() {
        let err = Cli::try_parse_from(["vds-download", "2019-03-01", "20190304", "temp"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert_eq!(err.exit_code(), 2);
    }
}
