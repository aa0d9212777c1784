//! Export downloads from the expressway traffic-data portal.
//!
//! Every dataset is requested with one multipart POST describing a server-side
//! export job. The portal answers with the whole table gzip-compressed.

use std::env;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const PORTAL_EXPORT_URL: &str = "http://data.ex.co.kr/portal/fdwn/log";
const COLLECT_CYCLE: &str = "04";
const SUPPLY_CYCLE: &str = "01";

/// The four portal exports one processing date needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    /// Per-lane sensor readings.
    VdsData,
    /// Road segments (conzones).
    ConZone,
    /// Sensor to segment mapping with route mileposts.
    VdsZone,
    /// Point sensors, used only for route names.
    VdsPoint,
}

impl Dataset {
    pub const ALL: [Dataset; 4] = [
        Dataset::VdsData,
        Dataset::ConZone,
        Dataset::VdsZone,
        Dataset::VdsPoint,
    ];

    pub fn file_prefix(self) -> &'static str {
        match self {
            Self::VdsData => "vds_data",
            Self::ConZone => "con_zone",
            Self::VdsZone => "vds_zone",
            Self::VdsPoint => "vds_point",
        }
    }

    pub fn collect_type(self) -> &'static str {
        match self {
            Self::VdsData | Self::VdsPoint => "VDS",
            Self::ConZone | Self::VdsZone => "ETC",
        }
    }

    pub fn data_type(self) -> &'static str {
        match self {
            Self::VdsData => "16",
            Self::ConZone => "78",
            Self::VdsZone => "79",
            Self::VdsPoint => "84",
        }
    }

    /// Local file name of the decompressed table, `<prefix>_<YYYYMMDD>.csv`.
    pub fn local_file_name(self, date: NaiveDate) -> String {
        format!("{}_{}.csv", self.file_prefix(), date.format("%Y%m%d"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportRequest {
    pub dataset: Dataset,
    pub supply_date: NaiveDate,
}

impl ExportRequest {
    pub fn new(dataset: Dataset, supply_date: NaiveDate) -> Self {
        Self {
            dataset,
            supply_date,
        }
    }

    /// Multipart form fields in the order the portal's own download page sends them.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let date = self.supply_date.format("%Y%m%d").to_string();
        vec![
            ("dataSupplyDate", date.clone()),
            ("collectType", self.dataset.collect_type().to_string()),
            ("dataType", self.dataset.data_type().to_string()),
            ("collectCycle", COLLECT_CYCLE.to_string()),
            ("supplyCycle", SUPPLY_CYCLE.to_string()),
            (
                "outFileName",
                format!("{}_{date}.gz", self.dataset.file_prefix()),
            ),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    pub endpoint: String,
    pub http_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            endpoint: PORTAL_EXPORT_URL.to_string(),
            http_timeout_ms: 60_000,
            max_retries: 0,
            retry_backoff_ms: 500,
        }
    }
}

pub fn portal_config_from_env() -> PortalConfig {
    let mut config = PortalConfig::default();

    if let Ok(url) = env::var("VDS_PORTAL_URL") {
        let trimmed = url.trim();
        if !trimmed.is_empty() {
            config.endpoint = trimmed.to_string();
        }
    }
    if let Some(timeout) = parse_env_number("VDS_HTTP_TIMEOUT_MS") {
        config.http_timeout_ms = timeout;
    }
    if let Some(retries) = parse_env_number("VDS_HTTP_MAX_RETRIES") {
        config.max_retries = retries;
    }
    if let Some(backoff) = parse_env_number("VDS_HTTP_RETRY_BACKOFF_MS") {
        config.retry_backoff_ms = backoff;
    }

    config
}

fn parse_env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(
                component = "portal",
                event = "portal.config.invalid_env",
                key,
                value = %raw
            );
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Cached,
    Downloaded { bytes: usize },
}

/// Local paths of the four decompressed tables for one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePaths {
    pub vds_data: PathBuf,
    pub con_zone: PathBuf,
    pub vds_zone: PathBuf,
    pub vds_point: PathBuf,
}

impl SourcePaths {
    pub fn for_date(data_dir: &Path, date: NaiveDate) -> Self {
        Self {
            vds_data: data_dir.join(Dataset::VdsData.local_file_name(date)),
            con_zone: data_dir.join(Dataset::ConZone.local_file_name(date)),
            vds_zone: data_dir.join(Dataset::VdsZone.local_file_name(date)),
            vds_point: data_dir.join(Dataset::VdsPoint.local_file_name(date)),
        }
    }

    pub fn path_for(&self, dataset: Dataset) -> &Path {
        match dataset {
            Dataset::VdsData => &self.vds_data,
            Dataset::ConZone => &self.con_zone,
            Dataset::VdsZone => &self.vds_zone,
            Dataset::VdsPoint => &self.vds_point,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("failed to decompress {dataset:?} export for {date}: {source}")]
    Decompress {
        dataset: Dataset,
        date: NaiveDate,
        source: std::io::Error,
    },
}

/// HTTP collaborator used by the fetcher. The production implementation is
/// [`ReqwestPortalTransport`]; tests substitute canned responses.
pub trait HttpTransport: Send + Sync {
    fn post_form(&self, url: &str, fields: &[(&'static str, String)])
        -> Result<Vec<u8>, FetchError>;
}

pub struct ReqwestPortalTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestPortalTransport {
    pub fn new(config: &PortalConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()
            .map_err(|err| FetchError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestPortalTransport {
    fn post_form(
        &self,
        url: &str,
        fields: &[(&'static str, String)],
    ) -> Result<Vec<u8>, FetchError> {
        let form = fields
            .iter()
            .fold(reqwest::blocking::multipart::Form::new(), |form, (name, value)| {
                form.text(*name, value.clone())
            });

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .map_err(|err| FetchError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpRequest {
                url: url.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| FetchError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

/// Downloads one export into `path` unless a file is already there.
///
/// Presence alone counts as a cache hit; contents are never inspected.
pub fn fetch_dataset(
    path: &Path,
    request: &ExportRequest,
    config: &PortalConfig,
    transport: &dyn HttpTransport,
) -> Result<FetchOutcome, FetchError> {
    let dataset = request.dataset.file_prefix();
    if path.exists() {
        info!(
            component = "portal",
            event = "portal.fetch.cached",
            dataset,
            path = %path.display()
        );
        return Ok(FetchOutcome::Cached);
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let fields = request.form_fields();
    debug!(
        component = "portal",
        event = "portal.fetch.request",
        dataset,
        url = %config.endpoint,
        fields = ?fields
    );
    let compressed = retry(config, || transport.post_form(&config.endpoint, &fields))?;
    let payload = gunzip(&compressed).map_err(|source| FetchError::Decompress {
        dataset: request.dataset,
        date: request.supply_date,
        source,
    })?;
    write_atomic(path, &payload)?;

    info!(
        component = "portal",
        event = "portal.fetch.downloaded",
        dataset,
        path = %path.display(),
        compressed_bytes = compressed.len(),
        bytes = payload.len()
    );

    Ok(FetchOutcome::Downloaded {
        bytes: payload.len(),
    })
}

/// Makes sure all four tables for `date` exist under `data_dir`.
pub fn prepare_source_files(
    date: NaiveDate,
    data_dir: &Path,
    config: &PortalConfig,
    transport: &dyn HttpTransport,
) -> Result<SourcePaths, FetchError> {
    fs::create_dir_all(data_dir)?;
    let paths = SourcePaths::for_date(data_dir, date);

    for dataset in Dataset::ALL {
        let request = ExportRequest::new(dataset, date);
        fetch_dataset(paths.path_for(dataset), &request, config, transport)?;
    }

    Ok(paths)
}

fn gunzip(compressed: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Writes through a sibling `.tmp` file so readers never see a partial table.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid output path: {}", path.display()),
            )
        })?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}

fn retry<T>(
    config: &PortalConfig,
    mut f: impl FnMut() -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    let mut attempt: u32 = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= config.max_retries => return Err(err),
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let shift = attempt.saturating_sub(1).min(10);
                let sleep_ms = config.retry_backoff_ms.saturating_mul(1u64 << shift);
                warn!(
                    component = "portal",
                    event = "portal.fetch.retry",
                    attempt,
                    sleep_ms,
                    error = %err
                );
                std::thread::sleep(Duration::from_millis(sleep_ms));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn gzip(body: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body).unwrap();
        encoder.finish().unwrap()
    }

    #[derive(Default)]
    struct RecordingTransport {
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<(&'static str, String)>>>,
        body: Vec<u8>,
        failures_before_success: usize,
    }

    impl HttpTransport for RecordingTransport {
        fn post_form(
            &self,
            url: &str,
            fields: &[(&'static str, String)],
        ) -> Result<Vec<u8>, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(fields.to_vec());
            if call < self.failures_before_success {
                return Err(FetchError::HttpRequest {
                    url: url.to_string(),
                    message: "simulated outage".to_string(),
                });
            }
            Ok(self.body.clone())
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 3, 4).unwrap()
    }

    #[test]
    fn form_fields_follow_portal_contract() {
        let fields = ExportRequest::new(Dataset::VdsZone, date()).form_fields();
        assert_eq!(
            fields,
            vec![
                ("dataSupplyDate", "20190304".to_string()),
                ("collectType", "ETC".to_string()),
                ("dataType", "79".to_string()),
                ("collectCycle", "04".to_string()),
                ("supplyCycle", "01".to_string()),
                ("outFileName", "vds_zone_20190304.gz".to_string()),
            ]
        );

        let data = ExportRequest::new(Dataset::VdsData, date()).form_fields();
        assert_eq!(data[1].1, "VDS");
        assert_eq!(data[2].1, "16");
    }

    #[test]
    fn download_decompresses_into_destination() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("vds_data_20190304.csv");
        let transport = RecordingTransport {
            body: gzip("a|b\n1|2\n".as_bytes()),
            ..RecordingTransport::default()
        };

        let outcome = fetch_dataset(
            &path,
            &ExportRequest::new(Dataset::VdsData, date()),
            &PortalConfig::default(),
            &transport,
        )
        .unwrap();

        assert_eq!(outcome, FetchOutcome::Downloaded { bytes: 8 });
        assert_eq!(fs::read(&path).unwrap(), b"a|b\n1|2\n");
        assert!(!path.with_file_name("vds_data_20190304.csv.tmp").exists());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn existing_file_skips_network_and_keeps_bytes() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("con_zone_20190304.csv");
        fs::write(&path, b"already here").unwrap();
        let transport = RecordingTransport::default();

        let outcome = fetch_dataset(
            &path,
            &ExportRequest::new(Dataset::ConZone, date()),
            &PortalConfig::default(),
            &transport,
        )
        .unwrap();

        assert_eq!(outcome, FetchOutcome::Cached);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fs::read(&path).unwrap(), b"already here");
    }

    #[test]
    fn malformed_gzip_is_fatal_and_leaves_no_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("vds_point_20190304.csv");
        let transport = RecordingTransport {
            body: b"<html>not gzip</html>".to_vec(),
            ..RecordingTransport::default()
        };

        let err = fetch_dataset(
            &path,
            &ExportRequest::new(Dataset::VdsPoint, date()),
            &PortalConfig::default(),
            &transport,
        )
        .unwrap_err();

        assert!(matches!(err, FetchError::Decompress { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn transport_failure_is_not_retried_by_default() {
        let temp = tempdir().unwrap();
        let transport = RecordingTransport {
            body: gzip(b"x"),
            failures_before_success: 1,
            ..RecordingTransport::default()
        };

        let err = fetch_dataset(
            &temp.path().join("vds_data_20190304.csv"),
            &ExportRequest::new(Dataset::VdsData, date()),
            &PortalConfig::default(),
            &transport,
        )
        .unwrap_err();

        assert!(matches!(err, FetchError::HttpRequest { .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn configured_retries_recover_from_transient_failures() {
        let temp = tempdir().unwrap();
        let transport = RecordingTransport {
            body: gzip(b"x"),
            failures_before_success: 2,
            ..RecordingTransport::default()
        };
        let cfg = PortalConfig {
            max_retries: 2,
            retry_backoff_ms: 1,
            ..PortalConfig::default()
        };

        let outcome = fetch_dataset(
            &temp.path().join("vds_data_20190304.csv"),
            &ExportRequest::new(Dataset::VdsData, date()),
            &cfg,
            &transport,
        )
        .unwrap();

        assert_eq!(outcome, FetchOutcome::Downloaded { bytes: 1 });
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn prepare_source_files_requests_each_dataset_once() {
        let temp = tempdir().unwrap();
        let transport = RecordingTransport {
            body: gzip(b"h\n"),
            ..RecordingTransport::default()
        };

        let paths =
            prepare_source_files(date(), temp.path(), &PortalConfig::default(), &transport)
                .unwrap();
        assert!(paths.vds_data.ends_with("vds_data_20190304.csv"));
        assert!(paths.vds_point.exists());

        let data_types: Vec<String> = transport
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|fields| fields[2].1.clone())
            .collect();
        assert_eq!(data_types, vec!["16", "78", "79", "84"]);

        prepare_source_files(date(), temp.path(), &PortalConfig::default(), &transport).unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    }

    /// Sets variables for the life of the guard. Only this module's env test
    /// touches the `VDS_PORTAL_*` and `VDS_HTTP_*` names.
    struct ScopedEnv(Vec<&'static str>);

    impl ScopedEnv {
        fn set(vars: &[(&'static str, &str)]) -> Self {
            for (key, value) in vars {
                env::set_var(key, value);
            }
            Self(vars.iter().map(|(key, _)| *key).collect())
        }
    }

    impl Drop for ScopedEnv {
        fn drop(&mut self) {
            for key in &self.0 {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn portal_config_reads_env_overrides() {
        let cfg = {
            let _env = ScopedEnv::set(&[
                ("VDS_PORTAL_URL", " http://localhost:9000/log "),
                ("VDS_HTTP_TIMEOUT_MS", "1500"),
                ("VDS_HTTP_MAX_RETRIES", "3"),
                ("VDS_HTTP_RETRY_BACKOFF_MS", "not-a-number"),
            ]);
            portal_config_from_env()
        };

        assert_eq!(cfg.endpoint, "http://localhost:9000/log");
        assert_eq!(cfg.http_timeout_ms, 1_500);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.retry_backoff_ms, PortalConfig::default().retry_backoff_ms);
        assert_eq!(portal_config_from_env(), PortalConfig::default());
    }
}
