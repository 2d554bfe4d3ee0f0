//! # http_access_log_combined module
//!
//! Statistics over the trailing window of one or more Combined Log Format access
//! logs: status code buckets, methods, protocol versions and the distribution of
//! response sizes.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use regex::Regex;
use tracing::debug;
use tracing::warn;

use crate::clf;
use crate::clf::AccessRecord;
use crate::clf::HttpMethod;
use crate::clf::HttpVersion;
use crate::config::ExtendConfigError;
use crate::config::HttpAccessLogConfig;
use crate::envelope::ExtendError;
use crate::logtail;
use crate::logtail::ReverseLines;
use crate::stats::Distribution;

pub const VERSION: u32 = 1;

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LogStats {
    pub hits: u64,
    pub bytes: u64,
    pub bytes_min: u64,
    pub bytes_max: u64,
    pub bytes_range: u64,
    pub bytes_mean: f64,
    pub bytes_median: f64,
    pub bytes_mode: u64,
    #[serde(rename = "1xx")]
    pub status_1xx: u64,
    #[serde(rename = "2xx")]
    pub status_2xx: u64,
    #[serde(rename = "3xx")]
    pub status_3xx: u64,
    #[serde(rename = "4xx")]
    pub status_4xx: u64,
    #[serde(rename = "5xx")]
    pub status_5xx: u64,
    #[serde(rename = "GET")]
    pub get: u64,
    #[serde(rename = "HEAD")]
    pub head: u64,
    #[serde(rename = "POST")]
    pub post: u64,
    #[serde(rename = "PUT")]
    pub put: u64,
    #[serde(rename = "DELETE")]
    pub delete: u64,
    #[serde(rename = "CONNECT")]
    pub connect: u64,
    #[serde(rename = "OPTIONS")]
    pub options: u64,
    #[serde(rename = "TRACE")]
    pub trace: u64,
    #[serde(rename = "PATCH")]
    pub patch: u64,
    pub other_method: u64,
    pub http1_0: u64,
    pub http1_1: u64,
    pub http2: u64,
    pub http3: u64,
    pub other_version: u64,
    pub refer: u64,
    pub no_refer: u64,
    pub user: u64,
    pub no_user: u64,
    pub size: u64,
    pub error_size: u64,
    /// Exact status code counts, flattened in as `"200": n`
    #[serde(flatten)]
    pub codes: BTreeMap<String, u64>,
}

impl LogStats {
    fn record(&mut self, record: &AccessRecord) {
        self.hits += 1;
        self.bytes = self.bytes.saturating_add(record.bytes);
        match record.status_class() {
            1 => self.status_1xx += 1,
            2 => self.status_2xx += 1,
            3 => self.status_3xx += 1,
            4 => self.status_4xx += 1,
            5 => self.status_5xx += 1,
            _ => (),
        }
        *self.codes.entry(record.status.to_string()).or_default() += 1;

        match record.method {
            Some(HttpMethod::GET) => self.get += 1,
            Some(HttpMethod::HEAD) => self.head += 1,
            Some(HttpMethod::POST) => self.post += 1,
            Some(HttpMethod::PUT) => self.put += 1,
            Some(HttpMethod::DELETE) => self.delete += 1,
            Some(HttpMethod::CONNECT) => self.connect += 1,
            Some(HttpMethod::OPTIONS) => self.options += 1,
            Some(HttpMethod::TRACE) => self.trace += 1,
            Some(HttpMethod::PATCH) => self.patch += 1,
            Some(HttpMethod::Other) | None => self.other_method += 1,
        }
        match record.version {
            Some(HttpVersion::Http10) => self.http1_0 += 1,
            Some(HttpVersion::Http11) => self.http1_1 += 1,
            Some(HttpVersion::Http2) => self.http2 += 1,
            Some(HttpVersion::Http3) => self.http3 += 1,
            Some(HttpVersion::Other) | None => self.other_version += 1,
        }
        match record.referer {
            Some(_) => self.refer += 1,
            None => self.no_refer += 1,
        }
        match record.user {
            Some(_) => self.user += 1,
            None => self.no_user += 1,
        }
    }

    fn set_distribution(&mut self, samples: &[u64]) {
        let dist = Distribution::from_samples(samples);
        self.bytes_min = dist.min;
        self.bytes_max = dist.max;
        self.bytes_range = dist.range;
        self.bytes_mean = dist.mean;
        self.bytes_median = dist.median;
        self.bytes_mode = dist.mode;
    }

    /// Sum the counters of another log into this one. Distribution fields are left alone
    fn add_counters(&mut self, other: &LogStats) {
        self.hits += other.hits;
        self.bytes = self.bytes.saturating_add(other.bytes);
        self.status_1xx += other.status_1xx;
        self.status_2xx += other.status_2xx;
        self.status_3xx += other.status_3xx;
        self.status_4xx += other.status_4xx;
        self.status_5xx += other.status_5xx;
        self.get += other.get;
        self.head += other.head;
        self.post += other.post;
        self.put += other.put;
        self.delete += other.delete;
        self.connect += other.connect;
        self.options += other.options;
        self.trace += other.trace;
        self.patch += other.patch;
        self.other_method += other.other_method;
        self.http1_0 += other.http1_0;
        self.http1_1 += other.http1_1;
        self.http2 += other.http2;
        self.http3 += other.http3;
        self.other_version += other.other_version;
        self.refer += other.refer;
        self.no_refer += other.no_refer;
        self.user += other.user;
        self.no_user += other.no_user;
        self.size = self.size.saturating_add(other.size);
        self.error_size = self.error_size.saturating_add(other.error_size);
        for (code, count) in &other.codes {
            *self.codes.entry(code.clone()).or_default() += count;
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct HttpAccessLogStats {
    pub logs: BTreeMap<String, LogStats>,
    pub totals: LogStats,
    pub warnings: Vec<String>,
}

/// An access log to scan with its optional paired error log
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogSet {
    pub access: PathBuf,
    pub error: Option<PathBuf>,
}

/// Find access logs matching `auto_glob`, naming them by the file name minus `auto_end_regex`
pub fn discover_logs(config: &HttpAccessLogConfig) -> Result<BTreeMap<String, LogSet>, ExtendError> {
    let end_regex = Regex::new(&config.auto_end_regex).map_err(|err| {
        ExtendConfigError::InvalidValue {
            section: "http_access_log_combined".into(),
            key: "auto_end_regex".into(),
            reason: err.to_string(),
        }
    })?;
    let paths = glob::glob(&config.auto_glob).map_err(|err| ExtendConfigError::InvalidValue {
        section: "http_access_log_combined".into(),
        key: "auto_glob".into(),
        reason: err.to_string(),
    })?;

    let mut found = BTreeMap::new();
    for path in paths.flatten() {
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
            continue;
        };
        let name = end_regex.replace(file_name, "").to_string();
        let name = match name.is_empty() {
            true => file_name.to_string(),
            false => name,
        };
        let error = Some(path.with_file_name(file_name.replace("access", "error")))
            .filter(|error_path| error_path != &path && error_path.is_file());
        debug!("Discovered access log {} -> {:?}", name, path);
        found.insert(
            name,
            LogSet {
                access: path.clone(),
                error,
            },
        );
    }
    Ok(found)
}

/// Merge explicit config entries over discovered ones
pub fn log_sets(config: &HttpAccessLogConfig) -> Result<BTreeMap<String, LogSet>, ExtendError> {
    let mut sets = match config.auto {
        true => discover_logs(config)?,
        false => BTreeMap::new(),
    };
    for (name, access) in &config.access_files {
        sets.insert(
            name.clone(),
            LogSet {
                access: access.clone(),
                error: config.error_files.get(name).cloned(),
            },
        );
    }
    if sets.is_empty() {
        return Err(ExtendConfigError::MissingKey {
            section: "http_access_log_combined".into(),
            key: "access_files".into(),
        }
        .into());
    }
    Ok(sets)
}

/// Scan one access log backwards until a record is older than `cutoff`
/// Returns the stats and the response size samples
pub fn parse_access_log(
    path: &Path,
    cutoff: DateTime<Utc>,
) -> Result<(LogStats, Vec<u64>), ExtendError> {
    let mut stats = LogStats::default();
    let mut samples = Vec::new();
    let lines = ReverseLines::open(path).map_err(|err| ExtendError::io(path, err))?;
    for line in lines {
        let line = line.map_err(|err| ExtendError::io(path, err))?;
        let Some(record) = clf::parse_line(&line) else {
            debug!("Skipping unparsable line in {:?}", path);
            continue;
        };
        if record.time < cutoff {
            break;
        }
        stats.record(&record);
        samples.push(record.bytes);
    }
    stats.set_distribution(&samples);
    Ok((stats, samples))
}

/// Blocking collection over every configured log
pub fn collect_at(
    config: &HttpAccessLogConfig,
    now: DateTime<Utc>,
) -> Result<HttpAccessLogStats, ExtendError> {
    let cutoff = logtail::cutoff(now, config.window_secs);
    let mut all_stats = HttpAccessLogStats::default();
    let mut all_samples = Vec::new();

    for (name, set) in log_sets(config)? {
        let (mut stats, samples) = match parse_access_log(&set.access, cutoff) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Skipping {}: {}", name, err);
                all_stats.warnings.push(format!("{}: {}", name, err));
                continue;
            }
        };
        stats.size = logtail::file_size(&set.access);
        stats.error_size = set.error.as_deref().map(logtail::file_size).unwrap_or(0);
        all_stats.totals.add_counters(&stats);
        all_samples.extend(samples);
        all_stats.logs.insert(name, stats);
    }
    all_stats.totals.set_distribution(&all_samples);
    Ok(all_stats)
}

pub async fn collect(config: HttpAccessLogConfig) -> Result<HttpAccessLogStats, ExtendError> {
    tokio::task::spawn_blocking(move || collect_at(&config, Utc::now())).await?
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use tempfile::tempdir;

    use super::*;

    // Oldest first as it'd be on disk. The first line is outside a 300s window of NOW
    const MOCK_ACCESS_LOG: &str = r###"10.0.0.1 - - [01/Mar/2024:11:50:00 +0000] "GET /old HTTP/1.1" 200 99999 "-" "curl/8.0"
10.0.0.2 - - [01/Mar/2024:12:01:00 +0000] "GET / HTTP/1.1" 200 100 "-" "curl/8.0"
garbage that is not a log line
10.0.0.3 - bob [01/Mar/2024:12:02:00 +0000] "POST /login HTTP/2.0" 302 0 "https://example.com/" "Firefox"
10.0.0.4 - - [01/Mar/2024:14:03:00 +0200] "HEAD /x HTTP/1.0" 404 100 "-" "-"
10.0.0.5 - - [01/Mar/2024:12:04:00 +0000] "-" 408 -
10.0.0.6 - - [01/Mar/2024:12:04:30 +0000] "GET /big HTTP/1.1" 503 500 "-" "curl/8.0"
"###;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:05:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn write_log(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut log = File::create(&path).expect("Unable to create log");
        log.write_all(contents.as_bytes()).expect("Unable to write log");
        path
    }

    #[test]
    fn test_parse_access_log_window() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let path = write_log(temp_dir.path(), "access.log", MOCK_ACCESS_LOG);
        let (stats, samples) = parse_access_log(&path, logtail::cutoff(now(), 300))?;

        assert_eq!(vec![500, 0, 100, 0, 100], samples);
        assert_eq!(5, stats.hits);
        assert_eq!(700, stats.bytes);
        assert_eq!(1, stats.status_2xx);
        assert_eq!(1, stats.status_3xx);
        assert_eq!(2, stats.status_4xx);
        assert_eq!(1, stats.status_5xx);
        assert_eq!(Some(&1), stats.codes.get("408"));
        assert_eq!(2, stats.get);
        assert_eq!(1, stats.post);
        assert_eq!(1, stats.head);
        assert_eq!(1, stats.other_method);
        assert_eq!(2, stats.http1_1);
        assert_eq!(1, stats.http1_0);
        assert_eq!(1, stats.http2);
        assert_eq!(1, stats.other_version);
        assert_eq!(1, stats.refer);
        assert_eq!(4, stats.no_refer);
        assert_eq!(1, stats.user);
        assert_eq!(0, stats.bytes_min);
        assert_eq!(500, stats.bytes_max);
        assert_eq!(140.0, stats.bytes_mean);
        assert_eq!(100.0, stats.bytes_median);
        assert_eq!(0, stats.bytes_mode);
        Ok(())
    }

    #[test]
    fn test_log_stats_json_keys() {
        let mut stats = LogStats::default();
        stats.codes.insert("200".into(), 3);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(3, json["200"]);
        assert_eq!(0, json["2xx"]);
        assert_eq!(0, json["GET"]);
        assert!(json.get("codes").is_none());
    }

    #[test]
    fn test_collect_totals_and_missing_log() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let www = write_log(temp_dir.path(), "www-access.log", MOCK_ACCESS_LOG);
        let api = write_log(
            temp_dir.path(),
            "api-access.log",
            "10.0.0.9 - - [01/Mar/2024:12:04:59 +0000] \"PUT /v1 HTTP/1.1\" 201 1000 \"-\" \"-\"\n",
        );
        let api_error = write_log(temp_dir.path(), "api-error.log", "[error] boom\n");
        let config = HttpAccessLogConfig {
            access_files: BTreeMap::from([
                ("www".to_string(), www.clone()),
                ("api".to_string(), api),
                ("gone".to_string(), temp_dir.path().join("nope.log")),
            ]),
            error_files: BTreeMap::from([("api".to_string(), api_error)]),
            ..Default::default()
        };

        let stats = collect_at(&config, now())?;
        assert_eq!(2, stats.logs.len());
        assert_eq!(1, stats.warnings.len());
        assert!(stats.warnings[0].starts_with("gone: "));
        assert_eq!(6, stats.totals.hits);
        assert_eq!(1700, stats.totals.bytes);
        assert_eq!(1000, stats.totals.bytes_max);
        assert_eq!(1, stats.totals.put);
        assert_eq!(Some(&1), stats.totals.codes.get("201"));
        assert_eq!(13, stats.logs["api"].error_size);
        assert_eq!(MOCK_ACCESS_LOG.len() as u64, stats.logs["www"].size);
        assert_eq!(0, stats.logs["www"].error_size);
        Ok(())
    }

    #[test]
    fn test_huge_byte_counts_saturate() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let huge = "10.0.0.7 - - [01/Mar/2024:12:04:10 +0000] \"GET /iso HTTP/1.1\" 200 18446744073709551615 \"-\" \"-\"\n";
        let first = write_log(temp_dir.path(), "a-access.log", &huge.repeat(2));
        let second = write_log(temp_dir.path(), "b-access.log", huge);
        let config = HttpAccessLogConfig {
            access_files: BTreeMap::from([("a".to_string(), first), ("b".to_string(), second)]),
            ..Default::default()
        };

        let stats = collect_at(&config, now())?;
        assert_eq!(u64::MAX, stats.logs["a"].bytes);
        assert_eq!(u64::MAX, stats.logs["b"].bytes);
        assert_eq!(3, stats.totals.hits);
        assert_eq!(u64::MAX, stats.totals.bytes);
        assert_eq!(u64::MAX, stats.totals.bytes_max);
        assert_eq!(u64::MAX as f64, stats.totals.bytes_mean);
        Ok(())
    }

    #[test]
    fn test_discover_logs() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        write_log(temp_dir.path(), "shop-access.log", "");
        write_log(temp_dir.path(), "shop-error.log", "");
        write_log(temp_dir.path(), "blog.access.log", "");
        let config = HttpAccessLogConfig {
            auto: true,
            auto_glob: format!("{}/*access.log", temp_dir.path().display()),
            ..Default::default()
        };
        let sets = log_sets(&config)?;
        assert_eq!(vec!["blog", "shop"], sets.keys().collect::<Vec<_>>());
        assert_eq!(
            Some(temp_dir.path().join("shop-error.log")),
            sets["shop"].error
        );
        assert_eq!(None, sets["blog"].error);
        Ok(())
    }

    #[test]
    fn test_no_logs_is_config_error() {
        let config = HttpAccessLogConfig {
            auto: true,
            auto_glob: "/nonexistent/lnms/*access.log".into(),
            ..Default::default()
        };
        let err = log_sets(&config).unwrap_err();
        assert_eq!(crate::envelope::ErrorCode::config, err.code());
    }
}
