//! # pihole module
//!
//! Pi-hole's admin API summary plus the query type breakdown.

use std::collections::HashMap;

use chrono::Utc;
use int_enum::IntEnum;
use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;
use strum_macros::EnumString;
use tracing::warn;

use crate::config::PiholeConfig;
use crate::envelope::ExtendError;
use crate::http;

pub const VERSION: u32 = 1;

#[allow(non_camel_case_types)]
#[derive(
    Serialize_repr,
    Deserialize_repr,
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    PartialEq,
    EnumString,
    IntEnum,
    strum_macros::Display,
)]
#[repr(u8)]
pub enum PiholeStatus {
    disabled = 0,
    enabled = 1,
    #[default]
    unknown = 2,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct GravityLastUpdated {
    #[serde(default)]
    pub file_exists: bool,
    #[serde(default)]
    pub absolute: i64,
}

/// `api.php?summaryRaw` response
#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SummaryRaw {
    pub domains_being_blocked: u64,
    pub dns_queries_today: u64,
    pub ads_blocked_today: u64,
    pub ads_percentage_today: f64,
    pub unique_domains: u64,
    pub queries_forwarded: u64,
    pub queries_cached: u64,
    pub clients_ever_seen: u64,
    pub unique_clients: u64,
    pub dns_queries_all_types: u64,
    #[serde(rename = "reply_NODATA")]
    pub reply_nodata: u64,
    #[serde(rename = "reply_NXDOMAIN")]
    pub reply_nxdomain: u64,
    #[serde(rename = "reply_CNAME")]
    pub reply_cname: u64,
    #[serde(rename = "reply_IP")]
    pub reply_ip: u64,
    pub privacy_level: u64,
    pub status: String,
    pub gravity_last_updated: GravityLastUpdated,
}

/// `api.php?getQueryTypes` response, percentages keyed like `"A (IPv4)"`
#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct QueryTypes {
    #[serde(default)]
    pub querytypes: HashMap<String, f64>,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PiholeStats {
    pub domains_being_blocked: u64,
    pub dns_queries_today: u64,
    pub ads_blocked_today: u64,
    pub ads_percentage_today: f64,
    pub unique_domains: u64,
    pub queries_forwarded: u64,
    pub queries_cached: u64,
    pub clients_ever_seen: u64,
    pub unique_clients: u64,
    pub dns_queries_all_types: u64,
    #[serde(rename = "reply_NODATA")]
    pub reply_nodata: u64,
    #[serde(rename = "reply_NXDOMAIN")]
    pub reply_nxdomain: u64,
    #[serde(rename = "reply_CNAME")]
    pub reply_cname: u64,
    #[serde(rename = "reply_IP")]
    pub reply_ip: u64,
    pub privacy_level: u64,
    pub status: PiholeStatus,
    pub gravity_age_secs: u64,
    pub query_a: f64,
    pub query_aaaa: f64,
    pub query_any: f64,
    pub query_srv: f64,
    pub query_soa: f64,
    pub query_ptr: f64,
    pub query_txt: f64,
    pub query_naptr: f64,
    pub query_mx: f64,
    pub query_ds: f64,
    pub query_rrsig: f64,
    pub query_dnskey: f64,
    pub query_ns: f64,
    pub query_other: f64,
    pub query_svcb: f64,
    pub query_https: f64,
    pub warnings: Vec<String>,
}

impl PiholeStats {
    pub fn from_summary(summary: &SummaryRaw, now: i64) -> Self {
        let gravity_age_secs = match summary.gravity_last_updated.file_exists {
            true => now.saturating_sub(summary.gravity_last_updated.absolute).max(0) as u64,
            false => 0,
        };
        PiholeStats {
            domains_being_blocked: summary.domains_being_blocked,
            dns_queries_today: summary.dns_queries_today,
            ads_blocked_today: summary.ads_blocked_today,
            ads_percentage_today: summary.ads_percentage_today,
            unique_domains: summary.unique_domains,
            queries_forwarded: summary.queries_forwarded,
            queries_cached: summary.queries_cached,
            clients_ever_seen: summary.clients_ever_seen,
            unique_clients: summary.unique_clients,
            dns_queries_all_types: summary.dns_queries_all_types,
            reply_nodata: summary.reply_nodata,
            reply_nxdomain: summary.reply_nxdomain,
            reply_cname: summary.reply_cname,
            reply_ip: summary.reply_ip,
            privacy_level: summary.privacy_level,
            status: summary.status.parse().unwrap_or_default(),
            gravity_age_secs,
            ..Default::default()
        }
    }

    pub fn apply_query_types(&mut self, query_types: &QueryTypes) {
        for (name, percent) in &query_types.querytypes {
            // Keys are "A (IPv4)", "AAAA (IPv6)", "SRV", ...
            let kind = name.split_whitespace().next().unwrap_or_default();
            let slot = match kind.to_ascii_uppercase().as_str() {
                "A" => &mut self.query_a,
                "AAAA" => &mut self.query_aaaa,
                "ANY" => &mut self.query_any,
                "SRV" => &mut self.query_srv,
                "SOA" => &mut self.query_soa,
                "PTR" => &mut self.query_ptr,
                "TXT" => &mut self.query_txt,
                "NAPTR" => &mut self.query_naptr,
                "MX" => &mut self.query_mx,
                "DS" => &mut self.query_ds,
                "RRSIG" => &mut self.query_rrsig,
                "DNSKEY" => &mut self.query_dnskey,
                "NS" => &mut self.query_ns,
                "SVCB" => &mut self.query_svcb,
                "HTTPS" => &mut self.query_https,
                _ => &mut self.query_other,
            };
            *slot += percent;
        }
    }

    /// Query types are optional, a failed request leaves them at 0 with a warning
    pub fn apply_query_types_result(&mut self, result: Result<QueryTypes, ExtendError>) {
        match result {
            Ok(query_types) => self.apply_query_types(&query_types),
            Err(err) => {
                warn!("Query types unavailable, leaving them at 0: {}", err);
                self.warnings.push(format!("getQueryTypes: {}", err));
            }
        }
    }
}

fn api_url(config: &PiholeConfig, query: &str) -> String {
    let mut url = format!("{}?{}", config.url, query);
    if let Some(auth) = &config.api_auth {
        url.push_str("&auth=");
        url.push_str(auth);
    }
    url
}

pub async fn collect(config: &PiholeConfig) -> Result<PiholeStats, ExtendError> {
    let client = http::client(std::time::Duration::from_secs(config.timeout_secs), false)?;
    let summary: SummaryRaw = http::get_json(&client, &api_url(config, "summaryRaw"), None).await?;
    let mut stats = PiholeStats::from_summary(&summary, Utc::now().timestamp());

    stats.apply_query_types_result(
        http::get_json::<QueryTypes>(&client, &api_url(config, "getQueryTypes"), None).await,
    );
    Ok(stats)
}
