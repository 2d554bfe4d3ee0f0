//! # softnet module
//!
//! Per CPU packet processing counters from `/proc/net/softnet_stat`, summed
//! across CPUs, plus the NAPI budget sysctls.

use std::path::Path;
use std::path::PathBuf;

use tracing::debug;

use crate::envelope::ExtendError;

pub const VERSION: u32 = 1;
pub const DEFAULT_SOFTNET_STAT: &str = "/proc/net/softnet_stat";
pub const DEFAULT_SYSCTL_DIR: &str = "/proc/sys/net/core";

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct SoftnetStats {
    pub packets: u64,
    pub packet_dropped: u64,
    pub time_squeeze: u64,
    pub cpu_collision: u64,
    pub received_rps: u64,
    pub flow_limit: u64,
    pub backlog_length: u64,
    pub cpus: u64,
    pub budget: u64,
    pub budget_usecs: u64,
}

fn hex_column(columns: &[&str], index: usize, line: &str) -> Result<u64, ExtendError> {
    let Some(column) = columns.get(index) else {
        return Err(ExtendError::parse(
            "softnet_stat",
            format!("missing column {}: {}", index, line),
        ));
    };
    u64::from_str_radix(column, 16)
        .map_err(|err| ExtendError::parse("softnet_stat", format!("'{}': {}", column, err)))
}

/// Sum the hex columns of every CPU row. Kernels before 5.10 lack the backlog column
pub fn parse_softnet_stat(contents: &str) -> Result<SoftnetStats, ExtendError> {
    let mut stats = SoftnetStats::default();
    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        let columns: Vec<&str> = line.split_whitespace().collect();
        stats.packets += hex_column(&columns, 0, line)?;
        stats.packet_dropped += hex_column(&columns, 1, line)?;
        stats.time_squeeze += hex_column(&columns, 2, line)?;
        stats.cpu_collision += hex_column(&columns, 8, line)?;
        stats.received_rps += hex_column(&columns, 9, line)?;
        stats.flow_limit += hex_column(&columns, 10, line)?;
        if columns.len() > 11 {
            stats.backlog_length += hex_column(&columns, 11, line)?;
        }
        stats.cpus += 1;
    }
    Ok(stats)
}

/// A sysctl that can't be read is reported as 0
fn read_sysctl(path: &Path) -> u64 {
    match std::fs::read_to_string(path) {
        Ok(value) => value.trim().parse().unwrap_or_default(),
        Err(err) => {
            debug!("Unable to read {:?}: {}", path, err);
            0
        }
    }
}

pub fn collect_from(softnet_stat: &Path, sysctl_dir: &Path) -> Result<SoftnetStats, ExtendError> {
    let contents =
        std::fs::read_to_string(softnet_stat).map_err(|err| ExtendError::io(softnet_stat, err))?;
    let mut stats = parse_softnet_stat(&contents)?;
    stats.budget = read_sysctl(&sysctl_dir.join("netdev_budget"));
    stats.budget_usecs = read_sysctl(&sysctl_dir.join("netdev_budget_usecs"));
    Ok(stats)
}

pub async fn collect(softnet_stat: PathBuf, sysctl_dir: PathBuf) -> Result<SoftnetStats, ExtendError> {
    tokio::task::spawn_blocking(move || collect_from(&softnet_stat, &sysctl_dir)).await?
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    const MOCK_SOFTNET_STAT: &str = r###"0001a2b3 00000002 0000000a 00000000 00000000 00000000 00000000 00000000 00000001 00000010 00000003 00000004 00000000
000000ff 00000000 00000001 00000000 00000000 00000000 00000000 00000000 00000000 00000020 00000000 00000001 00000001
"###;

    #[test]
    fn test_parse_softnet_stat() -> anyhow::Result<()> {
        let stats = parse_softnet_stat(MOCK_SOFTNET_STAT)?;
        assert_eq!(
            SoftnetStats {
                packets: 0x1a2b3 + 0xff,
                packet_dropped: 2,
                time_squeeze: 11,
                cpu_collision: 1,
                received_rps: 0x30,
                flow_limit: 3,
                backlog_length: 5,
                cpus: 2,
                budget: 0,
                budget_usecs: 0,
            },
            stats
        );
        Ok(())
    }

    #[test]
    fn test_old_kernel_without_backlog() -> anyhow::Result<()> {
        let stats = parse_softnet_stat(
            "00000010 00000000 00000000 00000000 00000000 00000000 00000000 00000000 00000000 00000000 00000000\n",
        )?;
        assert_eq!(16, stats.packets);
        assert_eq!(0, stats.backlog_length);
        assert!(parse_softnet_stat("00000010 00000000\n").is_err());
        assert!(parse_softnet_stat("zz 0 0 0 0 0 0 0 0 0 0\n").is_err());
        Ok(())
    }

    #[test]
    fn test_collect_from() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let softnet_stat = dir.path().join("softnet_stat");
        fs::write(&softnet_stat, MOCK_SOFTNET_STAT)?;
        fs::write(dir.path().join("netdev_budget"), "300\n")?;

        let stats = collect_from(&softnet_stat, dir.path())?;
        assert_eq!(300, stats.budget);
        // netdev_budget_usecs missing
        assert_eq!(0, stats.budget_usecs);
        assert_eq!(2, stats.cpus);
        Ok(())
    }
}
