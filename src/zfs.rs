//! # zfs module
//!
//! ARC statistics from the SPL kstat file and a pool summary from `zpool list`.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;

use crate::command;
use crate::envelope::ExtendError;
use crate::stats::percent;

pub const VERSION: u32 = 1;
pub const DEFAULT_ARCSTATS: &str = "/proc/spl/kstat/zfs/arcstats";
pub const DEFAULT_ZPOOL: &str = "zpool";

const ZPOOL_FIELDS: &str = "name,size,alloc,free,ckpoint,expandsz,frag,cap,dedup,health,altroot";

/// Parse the kstat `name type data` table, skipping the two header lines
pub fn parse_arcstats(contents: &str) -> Result<HashMap<String, u64>, ExtendError> {
    let mut arcstats = HashMap::new();
    for line in contents.lines().skip(2) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [name, _kind, data] = fields.as_slice() else {
            continue;
        };
        let value = data
            .parse::<u64>()
            .map_err(|err| ExtendError::parse(format!("arcstats {}", name), err))?;
        arcstats.insert(name.to_string(), value);
    }
    if arcstats.is_empty() {
        return Err(ExtendError::parse("arcstats", "no statistics found"));
    }
    Ok(arcstats)
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ArcStats {
    pub arc_size: u64,
    pub target_size: u64,
    pub target_size_max: u64,
    pub target_size_min: u64,
    pub target_size_per: f64,
    pub arc_size_per: f64,
    pub target_size_arat: f64,
    pub min_size_per: f64,
    pub mfu_size: u64,
    pub mru_size: u64,
    pub arc_hits: u64,
    pub arc_misses: u64,
    pub arc_accesses_total: u64,
    pub cache_hits_per: f64,
    pub cache_miss_per: f64,
    pub actual_hit: u64,
    pub actual_hit_per: f64,
    pub demand_data_hits: u64,
    pub demand_data_misses: u64,
    pub demand_data_total: u64,
    pub demand_data_hits_per: f64,
    pub demand_data_misses_per: f64,
    pub demand_meta_hits: u64,
    pub demand_meta_misses: u64,
    pub demand_meta_total: u64,
    pub demand_meta_hits_per: f64,
    pub demand_meta_misses_per: f64,
    pub pre_data_hits: u64,
    pub pre_data_misses: u64,
    pub pre_data_total: u64,
    pub pre_data_hits_per: f64,
    pub pre_data_misses_per: f64,
    pub pre_meta_hits: u64,
    pub pre_meta_misses: u64,
    pub pre_meta_total: u64,
    pub pre_meta_hits_per: f64,
    pub pre_meta_misses_per: f64,
    pub mfu_hits: u64,
    pub mru_hits: u64,
    pub mfu_ghost_hits: u64,
    pub mru_ghost_hits: u64,
    pub deleted: u64,
    pub evict_skip: u64,
    pub mutex_miss: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l2_size: u64,
    pub l2_asize: u64,
    pub l2_access_total: u64,
    pub l2_hit_per: f64,
}

/// Hits, misses, total and the two percentages for one ARC access class
fn access_class(hits: u64, misses: u64) -> (u64, u64, u64, f64, f64) {
    let total = hits + misses;
    (
        hits,
        misses,
        total,
        percent(hits as f64, total as f64),
        percent(misses as f64, total as f64),
    )
}

impl ArcStats {
    pub fn from_arcstats(arcstats: &HashMap<String, u64>) -> Self {
        let get = |name: &str| arcstats.get(name).copied().unwrap_or_default();

        let arc_size = get("size");
        let target_size = get("c");
        let target_size_max = get("c_max");
        let target_size_min = get("c_min");

        // OpenZFS 2.2 dropped `p` and exports the list sizes directly
        let (mfu_size, mru_size) = match (arcstats.get("mfu_size"), arcstats.get("mru_size")) {
            (Some(mfu), Some(mru)) => (*mfu, *mru),
            _ => {
                let p = get("p");
                match arc_size >= target_size {
                    true => (target_size.saturating_sub(p), p),
                    false => (arc_size.saturating_sub(p), p),
                }
            }
        };

        let arc_hits = get("hits");
        let arc_misses = get("misses");
        let arc_accesses_total = arc_hits + arc_misses;
        let mfu_hits = get("mfu_hits");
        let mru_hits = get("mru_hits");
        let actual_hit = mfu_hits + mru_hits;

        let demand_data = access_class(get("demand_data_hits"), get("demand_data_misses"));
        let demand_meta = access_class(get("demand_metadata_hits"), get("demand_metadata_misses"));
        let pre_data = access_class(get("prefetch_data_hits"), get("prefetch_data_misses"));
        let pre_meta = access_class(
            get("prefetch_metadata_hits"),
            get("prefetch_metadata_misses"),
        );

        let l2_hits = get("l2_hits");
        let l2_misses = get("l2_misses");
        let l2_access_total = l2_hits + l2_misses;

        ArcStats {
            arc_size,
            target_size,
            target_size_max,
            target_size_min,
            target_size_per: percent(target_size as f64, target_size_max as f64),
            arc_size_per: percent(arc_size as f64, target_size_max as f64),
            target_size_arat: match target_size_min {
                0 => 0.0,
                min => target_size_max as f64 / min as f64,
            },
            min_size_per: percent(target_size_min as f64, target_size_max as f64),
            mfu_size,
            mru_size,
            arc_hits,
            arc_misses,
            arc_accesses_total,
            cache_hits_per: percent(arc_hits as f64, arc_accesses_total as f64),
            cache_miss_per: percent(arc_misses as f64, arc_accesses_total as f64),
            actual_hit,
            actual_hit_per: percent(actual_hit as f64, arc_accesses_total as f64),
            demand_data_hits: demand_data.0,
            demand_data_misses: demand_data.1,
            demand_data_total: demand_data.2,
            demand_data_hits_per: demand_data.3,
            demand_data_misses_per: demand_data.4,
            demand_meta_hits: demand_meta.0,
            demand_meta_misses: demand_meta.1,
            demand_meta_total: demand_meta.2,
            demand_meta_hits_per: demand_meta.3,
            demand_meta_misses_per: demand_meta.4,
            pre_data_hits: pre_data.0,
            pre_data_misses: pre_data.1,
            pre_data_total: pre_data.2,
            pre_data_hits_per: pre_data.3,
            pre_data_misses_per: pre_data.4,
            pre_meta_hits: pre_meta.0,
            pre_meta_misses: pre_meta.1,
            pre_meta_total: pre_meta.2,
            pre_meta_hits_per: pre_meta.3,
            pre_meta_misses_per: pre_meta.4,
            mfu_hits,
            mru_hits,
            mfu_ghost_hits: get("mfu_ghost_hits"),
            mru_ghost_hits: get("mru_ghost_hits"),
            deleted: get("deleted"),
            evict_skip: get("evict_skip"),
            mutex_miss: get("mutex_miss"),
            l2_hits,
            l2_misses,
            l2_size: get("l2_size"),
            l2_asize: get("l2_asize"),
            l2_access_total,
            l2_hit_per: percent(l2_hits as f64, l2_access_total as f64),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Pool {
    pub name: String,
    pub size: u64,
    pub alloc: u64,
    pub free: u64,
    pub ckpoint: u64,
    pub expandsz: u64,
    pub frag: u64,
    pub cap: u64,
    pub dedup: f64,
    pub health: String,
    pub altroot: String,
}

/// `zpool list -p` prints `-` for unset numeric properties
fn pool_number<T: std::str::FromStr + Default>(field: &str, what: &str) -> Result<T, ExtendError>
where
    T::Err: std::fmt::Display,
{
    match field.trim_end_matches(['%', 'x']) {
        "-" | "" => Ok(T::default()),
        value => value
            .parse::<T>()
            .map_err(|err| ExtendError::parse(format!("zpool {}", what), format!("'{}': {}", field, err))),
    }
}

pub fn parse_zpool_list(output: &str) -> Result<Vec<Pool>, ExtendError> {
    let mut pools = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        let [name, size, alloc, free, ckpoint, expandsz, frag, cap, dedup, health, altroot] =
            fields.as_slice()
        else {
            return Err(ExtendError::parse(
                "zpool list",
                format!("expected 11 columns, got {}: {}", fields.len(), line),
            ));
        };
        pools.push(Pool {
            name: name.to_string(),
            size: pool_number(size, "size")?,
            alloc: pool_number(alloc, "alloc")?,
            free: pool_number(free, "free")?,
            ckpoint: pool_number(ckpoint, "ckpoint")?,
            expandsz: pool_number(expandsz, "expandsz")?,
            frag: pool_number(frag, "frag")?,
            cap: pool_number(cap, "cap")?,
            dedup: pool_number(dedup, "dedup")?,
            health: health.to_string(),
            altroot: match *altroot {
                "-" => String::new(),
                other => other.to_string(),
            },
        });
    }
    Ok(pools)
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ZfsStats {
    #[serde(flatten)]
    pub arc: ArcStats,
    pub pools: Vec<Pool>,
    pub online: u64,
    pub degraded: u64,
    pub offline: u64,
    pub faulted: u64,
    pub removed: u64,
    pub unavail: u64,
    /// 1 when every pool is ONLINE
    pub health: u64,
}

impl ZfsStats {
    pub fn new(arc: ArcStats, pools: Vec<Pool>) -> Self {
        let mut stats = ZfsStats {
            arc,
            ..Default::default()
        };
        for pool in &pools {
            match pool.health.as_str() {
                "ONLINE" => stats.online += 1,
                "DEGRADED" => stats.degraded += 1,
                "OFFLINE" => stats.offline += 1,
                "FAULTED" => stats.faulted += 1,
                "REMOVED" => stats.removed += 1,
                "UNAVAIL" => stats.unavail += 1,
                other => debug!("Pool {} has unhandled health {}", pool.name, other),
            }
        }
        stats.health = u64::from(stats.online as usize == pools.len());
        stats.pools = pools;
        stats
    }
}

pub async fn collect(arcstats: PathBuf, zpool: String) -> Result<ZfsStats, ExtendError> {
    let contents = read_arcstats(&arcstats).await?;
    let arc = ArcStats::from_arcstats(&parse_arcstats(&contents)?);

    let args: Vec<String> = ["list", "-pH", "-o", ZPOOL_FIELDS]
        .iter()
        .map(|a| a.to_string())
        .collect();
    let output = command::run(
        &zpool,
        &args,
        &Default::default(),
        command::DEFAULT_TIMEOUT,
    )
    .await?;
    Ok(ZfsStats::new(arc, parse_zpool_list(&output)?))
}

async fn read_arcstats(path: &Path) -> Result<String, ExtendError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ExtendError::Unsupported(
            format!("{} not found, is the zfs module loaded?", path.display()),
        )),
        Err(err) => Err(ExtendError::io(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOCK_ARCSTATS: &str = r###"13 1 0x01 123 33456 5678901234 987654321098
name                            type data
hits                            4    9000
misses                          4    1000
demand_data_hits                4    4000
demand_data_misses              4    500
demand_metadata_hits            4    3000
demand_metadata_misses          4    100
prefetch_data_hits              4    200
prefetch_data_misses            4    300
prefetch_metadata_hits          4    1800
prefetch_metadata_misses        4    100
mru_hits                        4    2500
mru_ghost_hits                  4    20
mfu_hits                        4    6000
mfu_ghost_hits                  4    10
deleted                         4    77
mutex_miss                      4    3
evict_skip                      4    5
l2_hits                         4    30
l2_misses                       4    70
l2_size                         4    1048576
l2_asize                        4    524288
p                               4    1073741824
c                               4    4294967296
c_min                           4    1073741824
c_max                           4    8589934592
size                            4    4294967296
"###;

    const MOCK_ZPOOL_LIST: &str = "tank\t3985729650688\t1297080823808\t2688648826880\t-\t-\t7\t32\t1.00\tONLINE\t-
backup\t999653638144\t400000000000\t599653638144\t-\t-\t12\t40\t1.05\tDEGRADED\t/mnt
";

    #[test]
    fn test_arc_stats() -> anyhow::Result<()> {
        let arc = ArcStats::from_arcstats(&parse_arcstats(MOCK_ARCSTATS)?);
        assert_eq!(4294967296, arc.arc_size);
        assert_eq!(50.0, arc.target_size_per);
        assert_eq!(50.0, arc.arc_size_per);
        assert_eq!(12.5, arc.min_size_per);
        assert_eq!(8.0, arc.target_size_arat);
        assert_eq!(4294967296 - 1073741824, arc.mfu_size);
        assert_eq!(1073741824, arc.mru_size);
        assert_eq!(10000, arc.arc_accesses_total);
        assert_eq!(90.0, arc.cache_hits_per);
        assert_eq!(10.0, arc.cache_miss_per);
        assert_eq!(8500, arc.actual_hit);
        assert_eq!(85.0, arc.actual_hit_per);
        assert_eq!(4500, arc.demand_data_total);
        assert_eq!(40.0, arc.pre_data_hits_per);
        assert_eq!(100, arc.l2_access_total);
        assert_eq!(30.0, arc.l2_hit_per);
        Ok(())
    }

    #[test]
    fn test_arc_stats_without_p() -> anyhow::Result<()> {
        let contents = "header\nname type data\nsize 4 100\nmfu_size 4 60\nmru_size 4 30\n";
        let arc = ArcStats::from_arcstats(&parse_arcstats(contents)?);
        assert_eq!(60, arc.mfu_size);
        assert_eq!(30, arc.mru_size);
        // No c_max means no percentages, not a division by zero
        assert_eq!(0.0, arc.arc_size_per);
        assert_eq!(0.0, arc.target_size_arat);
        Ok(())
    }

    #[test]
    fn test_parse_arcstats_errors() {
        assert!(parse_arcstats("header\nname type data\n").is_err());
        assert!(parse_arcstats("header\nname type data\nhits 4 lots\n").is_err());
    }

    #[test]
    fn test_zpool_list() -> anyhow::Result<()> {
        let pools = parse_zpool_list(MOCK_ZPOOL_LIST)?;
        assert_eq!(
            Pool {
                name: "tank".into(),
                size: 3985729650688,
                alloc: 1297080823808,
                free: 2688648826880,
                ckpoint: 0,
                expandsz: 0,
                frag: 7,
                cap: 32,
                dedup: 1.0,
                health: "ONLINE".into(),
                altroot: "".into(),
            },
            pools[0]
        );
        assert_eq!("/mnt", pools[1].altroot);

        let stats = ZfsStats::new(ArcStats::default(), pools);
        assert_eq!(1, stats.online);
        assert_eq!(1, stats.degraded);
        assert_eq!(0, stats.health);

        let json = serde_json::to_value(&stats)?;
        assert_eq!(0, json["arc_size"]);
        assert_eq!("backup", json["pools"][1]["name"]);
        Ok(())
    }

    #[test]
    fn test_all_online_is_healthy() -> anyhow::Result<()> {
        let pools = parse_zpool_list(MOCK_ZPOOL_LIST.lines().next().unwrap_or_default())?;
        assert_eq!(1, ZfsStats::new(ArcStats::default(), pools).health);
        assert_eq!(1, ZfsStats::new(ArcStats::default(), vec![]).health);
        assert!(parse_zpool_list("tank\t1\n").is_err());
        Ok(())
    }
}
