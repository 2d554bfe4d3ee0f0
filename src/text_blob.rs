//! # text_blob module
//!
//! Runs arbitrary shell commands and ships their stdout verbatim, for things
//! LibreNMS should just display (e.g. `zpool status`, `mdadm --detail`).

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;
use tracing::warn;

use crate::command;
use crate::config::TextBlobConfig;
use crate::envelope::ExtendError;

pub const VERSION: u32 = 1;

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct TextBlobStats {
    pub blobs: BTreeMap<String, String>,
    pub blob_exit_val: BTreeMap<String, i32>,
    pub blob_exit_signal: BTreeMap<String, i32>,
    pub blob_has_coredump: BTreeMap<String, bool>,
    pub warns: Vec<String>,
}

/// Global envs overlaid with the blob's own
fn blob_envs(config: &TextBlobConfig, name: &str) -> BTreeMap<String, String> {
    let mut envs = config.global_envs.clone();
    if let Some(overrides) = config.blob_envs.get(name) {
        envs.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    envs
}

/// A blob that fails to run becomes a warning; the rest still run
pub async fn collect(config: &TextBlobConfig) -> Result<TextBlobStats, ExtendError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let mut stats = TextBlobStats::default();
    for (name, cmdline) in &config.blobs {
        debug!("Running blob {}", name);
        let outcome = match command::run_shell(cmdline, &blob_envs(config, name), timeout).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("Blob {} failed: {}", name, err);
                stats.warns.push(format!("{}: {}", name, err));
                continue;
            }
        };
        stats.blobs.insert(name.clone(), outcome.stdout);
        stats.blob_exit_val.insert(name.clone(), outcome.exit_code);
        stats.blob_exit_signal.insert(name.clone(), outcome.signal);
        stats
            .blob_has_coredump
            .insert(name.clone(), outcome.core_dumped);
    }
    Ok(stats)
}
