//! # nextcloud module
//!
//! Instance and per user storage statistics pulled from Nextcloud's `occ` CLI.
//! `occ` has to run as the web server user, see `run_as` in the config.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::DateTime;
use chrono::Utc;
use tracing::debug;
use tracing::warn;

use crate::command;
use crate::config::NextcloudConfig;
use crate::envelope::ExtendError;

pub const VERSION: u32 = 1;

/// `occ user:list` returns at most `--limit` users per call
const USER_PAGE_SIZE: usize = 500;

/// `occ status --output=json`
#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct OccStatus {
    pub installed: bool,
    pub version: String,
    pub maintenance: bool,
    #[serde(rename = "needsDbUpgrade")]
    pub needs_db_upgrade: bool,
}

/// `occ app:list --output=json`
#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct OccAppList {
    pub enabled: BTreeMap<String, serde_json::Value>,
    pub disabled: BTreeMap<String, serde_json::Value>,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct OccStorage {
    pub free: i64,
    pub used: i64,
    pub total: i64,
    pub relative: f64,
    pub quota: i64,
}

/// `occ user:info <uid> --output=json`
#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct OccUserInfo {
    pub user_id: String,
    pub enabled: bool,
    pub storage: Option<OccStorage>,
    pub last_seen: String,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct UserStats {
    pub enabled: bool,
    pub used: u64,
    pub free: u64,
    pub total: u64,
    pub relative: f64,
    /// Quota in bytes, negative for unlimited or unknown
    pub quota: i64,
    /// Seconds since the user was last seen, -1 if never
    pub last_seen: i64,
}

impl UserStats {
    pub fn from_info(info: &OccUserInfo, now: DateTime<Utc>) -> Self {
        let storage = info.storage.clone().unwrap_or_default();
        UserStats {
            enabled: info.enabled,
            used: storage.used.max(0) as u64,
            free: storage.free.max(0) as u64,
            total: storage.total.max(0) as u64,
            relative: storage.relative,
            quota: match info.storage {
                Some(_) => storage.quota,
                None => -1,
            },
            last_seen: seconds_since(&info.last_seen, now),
        }
    }
}

/// occ prints the epoch for users that never logged in
fn seconds_since(last_seen: &str, now: DateTime<Utc>) -> i64 {
    match DateTime::parse_from_rfc3339(last_seen) {
        Ok(seen) if seen.timestamp() > 0 => (now - seen.with_timezone(&Utc)).num_seconds().max(0),
        _ => -1,
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct NextcloudStats {
    pub installed: bool,
    pub version: String,
    pub maintenance: bool,
    pub needs_db_upgrade: bool,
    pub enabled_apps: u64,
    pub disabled_apps: u64,
    pub user_count: u64,
    pub disabled_users: u64,
    pub used: u64,
    pub free: u64,
    pub total: u64,
    pub quota_users: u64,
    pub seen_5m: u64,
    pub seen_1h: u64,
    pub seen_1d: u64,
    pub seen_7d: u64,
    pub never_seen: u64,
    pub users: BTreeMap<String, UserStats>,
    pub warnings: Vec<String>,
}

impl NextcloudStats {
    pub fn new(status: &OccStatus, apps: &OccAppList) -> Self {
        NextcloudStats {
            installed: status.installed,
            version: status.version.clone(),
            maintenance: status.maintenance,
            needs_db_upgrade: status.needs_db_upgrade,
            enabled_apps: apps.enabled.len() as u64,
            disabled_apps: apps.disabled.len() as u64,
            ..Default::default()
        }
    }

    pub fn add_user(&mut self, uid: String, user: UserStats) {
        self.user_count += 1;
        if !user.enabled {
            self.disabled_users += 1;
        }
        self.used += user.used;
        self.free += user.free;
        self.total += user.total;
        if user.quota > 0 {
            self.quota_users += 1;
        }
        match user.last_seen {
            -1 => self.never_seen += 1,
            secs => {
                self.seen_5m += u64::from(secs <= 300);
                self.seen_1h += u64::from(secs <= 3600);
                self.seen_1d += u64::from(secs <= 86400);
                self.seen_7d += u64::from(secs <= 604800);
            }
        }
        self.users.insert(uid, user);
    }
}

async fn occ<T: serde::de::DeserializeOwned>(
    config: &NextcloudConfig,
    args: &[&str],
) -> Result<T, ExtendError> {
    let (program, mut argv) = config.occ_command();
    argv.extend(args.iter().map(|a| a.to_string()));
    argv.push("--output=json".to_string());
    let stdout = command::run(
        &program,
        &argv,
        &BTreeMap::new(),
        std::time::Duration::from_secs(config.timeout_secs),
    )
    .await?;
    serde_json::from_str(&stdout).map_err(|err| ExtendError::parse(format!("occ {}", args.join(" ")), err))
}

pub async fn collect(config: &NextcloudConfig) -> Result<NextcloudStats, ExtendError> {
    let status: OccStatus = occ(config, &["status"]).await?;
    if !status.installed {
        return Err(ExtendError::Unsupported("Nextcloud is not installed".into()));
    }
    let apps: OccAppList = occ(config, &["app:list"]).await?;
    let mut stats = NextcloudStats::new(&status, &apps);
    if status.maintenance {
        // occ refuses user commands in maintenance mode
        warn!("Nextcloud is in maintenance mode, skipping user stats");
        return Ok(stats);
    }

    add_users(config, &mut stats, USER_PAGE_SIZE).await?;
    Ok(stats)
}

/// Page through `occ user:list` until a short page comes back
async fn list_users(
    config: &NextcloudConfig,
    page_size: usize,
) -> Result<BTreeSet<String>, ExtendError> {
    let mut uids = BTreeSet::new();
    let mut offset = 0;
    loop {
        let limit = format!("--limit={}", page_size);
        let offset_arg = format!("--offset={}", offset);
        let page: BTreeMap<String, String> =
            occ(config, &["user:list", limit.as_str(), offset_arg.as_str()]).await?;
        let page_len = page.len();
        let known = uids.len();
        uids.extend(page.into_keys());
        // An occ without --offset support hands back the same page forever
        if page_len < page_size || uids.len() == known {
            break;
        }
        offset += page_len;
    }
    Ok(uids)
}

/// A user that can't be looked up, e.g. deleted mid run, becomes a warning
async fn add_users(
    config: &NextcloudConfig,
    stats: &mut NextcloudStats,
    page_size: usize,
) -> Result<(), ExtendError> {
    let now = Utc::now();
    for uid in list_users(config, page_size).await? {
        debug!("Collecting nextcloud user {}", uid);
        match occ::<OccUserInfo>(config, &["user:info", uid.as_str()]).await {
            Ok(info) => stats.add_user(uid, UserStats::from_info(&info, now)),
            Err(err) => {
                warn!("Skipping nextcloud user {}: {}", uid, err);
                stats.warnings.push(format!("{}: {}", uid, err));
            }
        }
    }
    Ok(())
}
