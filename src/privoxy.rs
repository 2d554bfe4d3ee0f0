//! # privoxy module
//!
//! Scrapes the trailing window of privoxy's logfile. Needs `debug 1` (requests),
//! `debug 1024` (crunches) and optionally `debug 512` (CLF request lines) and
//! `debug 2` (connections) enabled in privoxy's config to populate every counter.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::DateTime;
use chrono::Local;
use chrono::NaiveDateTime;
use chrono::TimeZone;
use chrono::Utc;
use regex::Regex;
use tracing::debug;

use crate::clf;
use crate::clf::HttpMethod;
use crate::clf::HttpVersion;
use crate::envelope::ExtendError;
use crate::logtail;
use crate::logtail::ReverseLines;
use crate::stats::percent;

pub const VERSION: u32 = 1;
pub const DEFAULT_LOG: &str = "/var/log/privoxy/logfile";

static PRIVOXY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})(?:\.\d+)? [0-9a-fA-Fx]+ ([A-Za-z][A-Za-z ]*?): (.*)$",
    )
    .expect("privoxy line regex is valid")
});

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PrivoxyStats {
    pub client_requests: u64,
    pub client_cons: u64,
    pub server_cons: u64,
    pub reused_server_cons: u64,
    pub crunches: u64,
    pub blocks: u64,
    pub fast_redirs: u64,
    pub errors: u64,
    pub con_failed: u64,
    pub con_timeout: u64,
    pub bytes_to_client: u64,
    pub req_get: u64,
    pub req_head: u64,
    pub req_post: u64,
    pub req_put: u64,
    pub req_delete: u64,
    pub req_connect: u64,
    pub req_options: u64,
    pub req_trace: u64,
    pub req_patch: u64,
    pub req_other: u64,
    pub resp_1xx: u64,
    pub resp_2xx: u64,
    pub resp_3xx: u64,
    pub resp_4xx: u64,
    pub resp_5xx: u64,
    pub ver_1_0: u64,
    pub ver_1_1: u64,
    pub ver_2: u64,
    pub ver_3: u64,
    pub ver_other: u64,
    pub unique_domains: u64,
    pub unique_domains_np: u64,
    pub unique_bdomains: u64,
    pub unique_bdomains_np: u64,
    pub ubd_per: f64,
    pub ubd_np_per: f64,
    pub block_per: f64,
}

/// Running state of a scan. Domain sets only exist until the stats are finalised
#[derive(Debug, Default)]
struct PrivoxyScan {
    stats: PrivoxyStats,
    domains: HashSet<String>,
    domains_np: HashSet<String>,
    bdomains: HashSet<String>,
    bdomains_np: HashSet<String>,
}

impl PrivoxyScan {
    fn track_domain(&mut self, host: &str, blocked: bool) {
        let host = host.to_ascii_lowercase();
        let np = clf::strip_port(&host).to_string();
        if blocked {
            self.bdomains.insert(host);
            self.bdomains_np.insert(np);
        } else {
            self.domains.insert(host);
            self.domains_np.insert(np);
        }
    }

    fn request(&mut self, message: &str) {
        self.stats.client_requests += 1;
        let Some(record) = clf::parse_line(message) else {
            // debug 1 style: `host[:port]/path`
            if let Some(host) = clf::target_host(message.trim()) {
                self.track_domain(host, false);
            }
            return;
        };

        self.stats.bytes_to_client = self.stats.bytes_to_client.saturating_add(record.bytes);
        match record.status_class() {
            1 => self.stats.resp_1xx += 1,
            2 => self.stats.resp_2xx += 1,
            3 => self.stats.resp_3xx += 1,
            4 => self.stats.resp_4xx += 1,
            5 => self.stats.resp_5xx += 1,
            _ => (),
        }
        match record.method {
            Some(HttpMethod::GET) => self.stats.req_get += 1,
            Some(HttpMethod::HEAD) => self.stats.req_head += 1,
            Some(HttpMethod::POST) => self.stats.req_post += 1,
            Some(HttpMethod::PUT) => self.stats.req_put += 1,
            Some(HttpMethod::DELETE) => self.stats.req_delete += 1,
            Some(HttpMethod::CONNECT) => self.stats.req_connect += 1,
            Some(HttpMethod::OPTIONS) => self.stats.req_options += 1,
            Some(HttpMethod::TRACE) => self.stats.req_trace += 1,
            Some(HttpMethod::PATCH) => self.stats.req_patch += 1,
            Some(HttpMethod::Other) | None => self.stats.req_other += 1,
        }
        match record.version {
            Some(HttpVersion::Http10) => self.stats.ver_1_0 += 1,
            Some(HttpVersion::Http11) => self.stats.ver_1_1 += 1,
            Some(HttpVersion::Http2) => self.stats.ver_2 += 1,
            Some(HttpVersion::Http3) => self.stats.ver_3 += 1,
            Some(HttpVersion::Other) | None => self.stats.ver_other += 1,
        }
        if let Some(host) = record.target.as_deref().and_then(clf::target_host) {
            self.track_domain(host, false);
        }
    }

    fn crunch(&mut self, message: &str) {
        self.stats.crunches += 1;
        if let Some(url) = message.strip_prefix("Blocked:") {
            self.stats.blocks += 1;
            if let Some(host) = clf::target_host(url.trim()) {
                self.track_domain(host, true);
            }
        } else if message.starts_with("Redirected:") {
            self.stats.fast_redirs += 1;
        }
    }

    fn connect(&mut self, message: &str) {
        if message.starts_with("Accepted connection from") {
            self.stats.client_cons += 1;
        } else if message.starts_with("Reusing server socket") {
            self.stats.reused_server_cons += 1;
        } else if message.starts_with("Created new connection to") {
            self.stats.server_cons += 1;
        }
    }

    fn error(&mut self, message: &str) {
        self.stats.errors += 1;
        let message = message.to_ascii_lowercase();
        if message.contains("connect")
            && (message.contains("fail") || message.contains("could not"))
        {
            self.stats.con_failed += 1;
        }
        if ["time out", "timeout", "timed out"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            self.stats.con_timeout += 1;
        }
    }

    fn line(&mut self, kind: &str, message: &str) {
        match kind {
            "Request" => self.request(message),
            "Crunch" => self.crunch(message),
            "Connect" => self.connect(message),
            "Error" => self.error(message),
            _ => (),
        }
    }

    fn finish(mut self) -> PrivoxyStats {
        self.stats.unique_domains = self.domains.len() as u64;
        self.stats.unique_domains_np = self.domains_np.len() as u64;
        self.stats.unique_bdomains = self.bdomains.len() as u64;
        self.stats.unique_bdomains_np = self.bdomains_np.len() as u64;
        self.stats.ubd_per = percent(
            self.stats.unique_bdomains as f64,
            self.stats.unique_domains as f64,
        );
        self.stats.ubd_np_per = percent(
            self.stats.unique_bdomains_np as f64,
            self.stats.unique_domains_np as f64,
        );
        self.stats.block_per = percent(self.stats.blocks as f64, self.stats.client_requests as f64);
        self.stats
    }
}

/// Privoxy writes local wall clock time
fn parse_local_time(timestamp: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

/// Scan lines (newest first) until one is older than `cutoff`
pub fn parse_lines<I>(lines: I, cutoff: DateTime<Utc>) -> Result<PrivoxyStats, std::io::Error>
where
    I: IntoIterator<Item = std::io::Result<String>>,
{
    let mut scan = PrivoxyScan::default();
    for line in lines {
        let line = line?;
        let Some(caps) = PRIVOXY_LINE.captures(&line) else {
            // Continuation lines of multi-line messages
            continue;
        };
        let Some(time) = parse_local_time(&caps[1]) else {
            continue;
        };
        if time < cutoff {
            break;
        }
        scan.line(&caps[2], &caps[3]);
    }
    Ok(scan.finish())
}

pub fn collect_at(
    log: &Path,
    window_secs: u64,
    now: DateTime<Utc>,
) -> Result<PrivoxyStats, ExtendError> {
    debug!("Reading privoxy log {:?} for the last {}s", log, window_secs);
    let lines = ReverseLines::open(log).map_err(|err| ExtendError::io(log, err))?;
    parse_lines(lines, logtail::cutoff(now, window_secs)).map_err(|err| ExtendError::io(log, err))
}

pub async fn collect(log: PathBuf, window_secs: u64) -> Result<PrivoxyStats, ExtendError> {
    tokio::task::spawn_blocking(move || collect_at(&log, window_secs, Utc::now())).await?
}
