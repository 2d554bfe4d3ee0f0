//! # mdadm module
//!
//! Linux software RAID state read straight from sysfs, one entry per `md*` array.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;

use crate::envelope::ExtendError;
use crate::stats::percent;

pub const VERSION: u32 = 1;
pub const DEFAULT_SYSFS: &str = "/sys/block";

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MdArray {
    pub name: String,
    pub level: String,
    /// Bytes
    pub size: u64,
    pub disc_count: u64,
    pub hotspare_count: u64,
    pub device_list: Vec<String>,
    pub missing_devices_list: Vec<u64>,
    pub state: String,
    pub action: String,
    pub degraded: u64,
    /// KiB/s, 0 when idle
    pub sync_speed: u64,
    pub sync_completed: f64,
    pub mismatch_cnt: u64,
}

fn read_attr(path: &Path) -> Result<String, ExtendError> {
    fs::read_to_string(path)
        .map(|value| value.trim().to_string())
        .map_err(|err| ExtendError::io(path, err))
}

/// Counters that md reports as `none` while idle read as 0
fn read_number(path: &Path) -> Result<u64, ExtendError> {
    match read_attr(path)?.as_str() {
        "none" | "" => Ok(0),
        value => value
            .parse()
            .map_err(|err| ExtendError::parse(path.display().to_string(), err)),
    }
}

/// `sync_completed` is `done / total` in sectors, or `none` when nothing runs
pub fn parse_sync_completed(value: &str) -> f64 {
    let Some((done, total)) = value.split_once('/') else {
        return 100.0;
    };
    match (done.trim().parse::<u64>(), total.trim().parse::<u64>()) {
        (Ok(done), Ok(total)) => percent(done as f64, total as f64),
        _ => 100.0,
    }
}

pub fn read_array(block_dir: &Path) -> Result<MdArray, ExtendError> {
    let md = block_dir.join("md");
    let name = block_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut array = MdArray {
        name,
        level: read_attr(&md.join("level"))?,
        size: read_number(&block_dir.join("size"))? * 512,
        disc_count: read_number(&md.join("raid_disks"))?,
        state: read_attr(&md.join("array_state"))?,
        ..Default::default()
    };

    // raid0 and linear arrays have no sync or degraded attributes
    if md.join("sync_action").exists() {
        array.action = read_attr(&md.join("sync_action"))?;
        array.degraded = read_number(&md.join("degraded"))?;
        array.sync_speed = read_number(&md.join("sync_speed"))?;
        array.sync_completed = parse_sync_completed(&read_attr(&md.join("sync_completed"))?);
        array.mismatch_cnt = read_number(&md.join("mismatch_cnt"))?;
    } else {
        array.sync_completed = 100.0;
    }

    let entries = fs::read_dir(&md).map_err(|err| ExtendError::io(&md, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| ExtendError::io(&md, err))?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some(device) = file_name.strip_prefix("dev-") else {
            continue;
        };
        let state = read_attr(&entry.path().join("state")).unwrap_or_default();
        if state.split(',').any(|s| s == "spare") {
            array.hotspare_count += 1;
        }
        array.device_list.push(device.to_string());
    }
    array.device_list.sort();

    array.missing_devices_list = (0..array.disc_count)
        .filter(|slot| !md.join(format!("rd{}", slot)).exists())
        .collect();
    Ok(array)
}

/// Every `md*` block device with an `md/` directory under `sysfs`, sorted by name
pub fn collect_from(sysfs: &Path) -> Result<Vec<MdArray>, ExtendError> {
    let entries = fs::read_dir(sysfs).map_err(|err| ExtendError::io(sysfs, err))?;
    let mut arrays = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ExtendError::io(sysfs, err))?;
        let path = entry.path();
        if !entry.file_name().to_string_lossy().starts_with("md") || !path.join("md").is_dir() {
            continue;
        }
        debug!("Reading md array {:?}", path);
        arrays.push(read_array(&path)?);
    }
    arrays.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(arrays)
}

pub async fn collect(sysfs: PathBuf) -> Result<Vec<MdArray>, ExtendError> {
    tokio::task::spawn_blocking(move || collect_from(&sysfs)).await?
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use tempfile::tempdir;

    use super::*;

    fn write_attrs(dir: &Path, attrs: &[(&str, &str)]) -> anyhow::Result<()> {
        for (name, value) in attrs {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, format!("{}\n", value))?;
        }
        Ok(())
    }

    /// md0: degraded raid1 with a spare resyncing, md1: healthy raid0
    fn mock_sysfs(root: &Path) -> anyhow::Result<()> {
        let md0 = root.join("md0");
        write_attrs(
            &md0,
            &[
                ("size", "1953260928"),
                ("md/level", "raid1"),
                ("md/raid_disks", "2"),
                ("md/array_state", "clean"),
                ("md/sync_action", "recover"),
                ("md/degraded", "1"),
                ("md/sync_speed", "153600"),
                ("md/sync_completed", "488315232 / 1953260928"),
                ("md/mismatch_cnt", "0"),
                ("md/dev-sda1/state", "in_sync"),
                ("md/dev-sdc1/state", "spare"),
            ],
        )?;
        symlink("dev-sda1", md0.join("md/rd0"))?;

        let md1 = root.join("md1");
        write_attrs(
            &md1,
            &[
                ("size", "2048"),
                ("md/level", "raid0"),
                ("md/raid_disks", "2"),
                ("md/array_state", "clean"),
                ("md/dev-sdb2/state", "in_sync"),
                ("md/dev-sdd2/state", "in_sync"),
            ],
        )?;
        symlink("dev-sdb2", md1.join("md/rd0"))?;
        symlink("dev-sdd2", md1.join("md/rd1"))?;

        // Not arrays
        fs::create_dir_all(root.join("sda"))?;
        fs::create_dir_all(root.join("md127"))?;
        Ok(())
    }

    #[test]
    fn test_collect_from_sysfs() -> anyhow::Result<()> {
        let dir = tempdir()?;
        mock_sysfs(dir.path())?;
        let arrays = collect_from(dir.path())?;
        assert_eq!(2, arrays.len());

        assert_eq!(
            MdArray {
                name: "md0".into(),
                level: "raid1".into(),
                size: 1953260928 * 512,
                disc_count: 2,
                hotspare_count: 1,
                device_list: vec!["sda1".into(), "sdc1".into()],
                missing_devices_list: vec![1],
                state: "clean".into(),
                action: "recover".into(),
                degraded: 1,
                sync_speed: 153600,
                sync_completed: 25.0,
                mismatch_cnt: 0,
            },
            arrays[0]
        );

        assert_eq!("md1", arrays[1].name);
        assert_eq!("", arrays[1].action);
        assert_eq!(100.0, arrays[1].sync_completed);
        assert!(arrays[1].missing_devices_list.is_empty());
        assert_eq!(0, arrays[1].hotspare_count);
        Ok(())
    }

    #[test]
    fn test_parse_sync_completed() {
        assert_eq!(100.0, parse_sync_completed("none"));
        assert_eq!(50.0, parse_sync_completed("5 / 10"));
        assert_eq!(100.0, parse_sync_completed("delayed"));
    }

    #[test]
    fn test_missing_sysfs() {
        let err = collect_from(Path::new("/nonexistent/sys/block")).unwrap_err();
        assert_eq!(crate::envelope::ErrorCode::io, err.code());
    }
}
