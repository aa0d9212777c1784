//! VDS 5-minute traffic aggregation.
//!
//! Downloads per-lane sensor logs and road reference tables from the
//! expressway traffic-data portal, then rolls readings up into 5-minute
//! volume/occupancy/speed buckets per sensor and lane type:
//! - `portal`: multipart export requests and the local file cache
//! - `tables`: positional EUC-KR table loaders
//! - `join` / `lane`: reference joins and bus-lane classification
//! - `aggregate` / `output`: bucketing and the output table
//! - `pipeline`: per-date processing and date-range drivers

mod aggregate;
mod holiday;
mod join;
mod lane;
mod observability;
mod output;
mod pipeline;
mod portal;
mod tables;

pub use aggregate::{
    aggregate, bucket_start, reduce, AggregatedBucket, BucketKey, BucketMeasures, BUCKET_MINUTES,
    NO_DATA,
};
pub use holiday::{HolidayCalendar, HolidayCode, HolidayError};
pub use join::{join_and_classify, JoinedReading, SegmentMeta};
pub use lane::{classify, LaneType, SensorSpan};
pub use observability::{
    init_logging, log_app_start, log_range_selected, LogFormat, LogOptions, LoggingInitError,
};
pub use output::{output_file_name, read_buckets, write_buckets, OutputError, OUTPUT_HEADERS};
pub use pipeline::{
    dates_inclusive, default_workers, download_range, parse_compact_date, process_date, run_range,
    DateReport, PipelineConfig, PipelineError, RunReport,
};
pub use portal::{
    fetch_dataset, portal_config_from_env, prepare_source_files, Dataset, ExportRequest,
    FetchError, FetchOutcome, HttpTransport, PortalConfig, ReqwestPortalTransport, SourcePaths,
    PORTAL_EXPORT_URL,
};
pub use tables::{
    detect_delimiter, load_con_zones, load_readings, load_road_names, load_vds_zones, ConZone,
    Reading, TableError, VdsZone,
};
