//! # clf module
//!
//! Common / Combined Log Format parsing shared by the web server access log and
//! privoxy collectors.
//!
//! `host ident user [dd/Mon/yyyy:HH:MM:SS +zzzz] "METHOD target PROTO" status bytes "referer" "agent"`

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::DateTime;
use chrono::FixedOffset;
use regex::Regex;
use strum_macros::EnumIter;
use strum_macros::EnumString;

pub const CLF_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

static CLF_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(\S+) (\S+) (\S+) \[([^\]]+)\] "((?:[^"\\]|\\.)*)" (\d{3}) (\d+|-)(?: "((?:[^"\\]|\\.)*)" "((?:[^"\\]|\\.)*)")?"#,
    )
    .expect("CLF regex is valid")
});

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, EnumIter, EnumString, strum_macros::Display,
)]
#[strum(ascii_case_insensitive)]
pub enum HttpMethod {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
    CONNECT,
    OPTIONS,
    TRACE,
    PATCH,
    #[strum(serialize = "OTHER")]
    Other,
}

impl HttpMethod {
    pub fn parse(method: &str) -> Self {
        HttpMethod::from_str(method).unwrap_or(HttpMethod::Other)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, EnumString, strum_macros::Display)]
pub enum HttpVersion {
    #[strum(serialize = "HTTP/1.0")]
    Http10,
    #[strum(serialize = "HTTP/1.1")]
    Http11,
    #[strum(serialize = "HTTP/2", serialize = "HTTP/2.0")]
    Http2,
    #[strum(serialize = "HTTP/3", serialize = "HTTP/3.0")]
    Http3,
    #[strum(serialize = "other")]
    Other,
}

impl HttpVersion {
    pub fn parse(protocol: &str) -> Self {
        HttpVersion::from_str(protocol).unwrap_or(HttpVersion::Other)
    }
}

/// One parsed access log record
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessRecord {
    pub host: String,
    pub user: Option<String>,
    pub time: DateTime<FixedOffset>,
    // None when the request line isn't `METHOD target PROTO`, e.g. "-" on a 408
    pub method: Option<HttpMethod>,
    pub target: Option<String>,
    pub version: Option<HttpVersion>,
    pub status: u16,
    pub bytes: u64,
    pub referer: Option<String>,
    pub agent: Option<String>,
}

impl AccessRecord {
    /// Leading digit of the status, e.g. 4 for 404
    pub fn status_class(&self) -> u16 {
        self.status / 100
    }
}

fn dash_is_none(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty() && *v != "-").map(String::from)
}

/// Parse a Common or Combined Log Format line. None if it doesn't look like one
pub fn parse_line(line: &str) -> Option<AccessRecord> {
    let caps = CLF_LINE.captures(line)?;
    let time = DateTime::parse_from_str(&caps[4], CLF_TIME_FORMAT).ok()?;
    let status = caps[6].parse::<u16>().ok()?;
    let bytes = match &caps[7] {
        "-" => 0,
        b => b.parse::<u64>().ok()?,
    };

    let request: Vec<&str> = caps[5].split_whitespace().collect();
    let (method, target, version) = match request.as_slice() {
        [method, target, protocol] => (
            Some(HttpMethod::parse(method)),
            Some(target.to_string()),
            Some(HttpVersion::parse(protocol)),
        ),
        // HTTP/0.9 style request line without a protocol
        [method, target] => (Some(HttpMethod::parse(method)), Some(target.to_string()), None),
        _ => (None, None, None),
    };

    Some(AccessRecord {
        host: caps[1].to_string(),
        user: dash_is_none(caps.get(3).map(|m| m.as_str())),
        time,
        method,
        target,
        version,
        status,
        bytes,
        referer: dash_is_none(caps.get(8).map(|m| m.as_str())),
        agent: dash_is_none(caps.get(9).map(|m| m.as_str())),
    })
}

/// Host part of a request target, for both absolute URLs and `host/path` forms
pub fn target_host(target: &str) -> Option<&str> {
    let without_scheme = match target.split_once("://") {
        Some((_, rest)) => rest,
        None => target,
    };
    let host = without_scheme
        .split(['/', '?'])
        .next()
        .unwrap_or_default();
    // Strip userinfo
    let host = host.rsplit('@').next().unwrap_or(host);
    match host.is_empty() {
        true => None,
        false => Some(host),
    }
}

/// Host without any `:port` suffix. Bracketed IPv6 literals are kept whole
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}
