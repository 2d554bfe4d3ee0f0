//! # postgres module
//!
//! Database activity counters from `pg_stat_database` plus per database table and
//! index scan counters, gathered through `psql` so no client library or
//! credentials handling beyond libpq's own is needed.

use std::collections::BTreeMap;

use tracing::debug;
use tracing::warn;

use crate::command;
use crate::config::PostgresConfig;
use crate::envelope::ExtendError;

pub const VERSION: u32 = 1;

const DATABASE_QUERY: &str = "SELECT datname, numbackends, xact_commit, xact_rollback, \
blks_read, blks_hit, tup_returned, tup_fetched, tup_inserted, tup_updated, tup_deleted \
FROM pg_stat_database WHERE datname IS NOT NULL ORDER BY datname";

const SCAN_QUERY: &str = "SELECT \
(SELECT coalesce(sum(seq_scan), 0) FROM pg_stat_user_tables), \
(SELECT coalesce(sum(seq_tup_read), 0) FROM pg_stat_user_tables), \
(SELECT coalesce(sum(idx_scan), 0) FROM pg_stat_user_tables), \
(SELECT coalesce(sum(idx_tup_fetch), 0) FROM pg_stat_user_tables), \
(SELECT coalesce(sum(idx_tup_read), 0) FROM pg_stat_user_indexes), \
(SELECT coalesce(sum(idx_blks_read), 0) FROM pg_statio_user_indexes), \
(SELECT coalesce(sum(idx_blks_hit), 0) FROM pg_statio_user_indexes)";

const VERSION_QUERY: &str = "SHOW server_version_num";

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct PgStats {
    pub backends: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub read: u64,
    pub hit: u64,
    pub ret: u64,
    pub fetch: u64,
    pub ins: u64,
    pub upd: u64,
    pub del: u64,
    pub seqscan: u64,
    pub seqtupread: u64,
    pub idxscan: u64,
    pub idxtupfetch: u64,
    pub idxtupread: u64,
    pub idxblksread: u64,
    pub idxblkshit: u64,
}

impl PgStats {
    fn add(&mut self, other: &PgStats) {
        self.backends += other.backends;
        self.commits += other.commits;
        self.rollbacks += other.rollbacks;
        self.read += other.read;
        self.hit += other.hit;
        self.ret += other.ret;
        self.fetch += other.fetch;
        self.ins += other.ins;
        self.upd += other.upd;
        self.del += other.del;
        self.seqscan += other.seqscan;
        self.seqtupread += other.seqtupread;
        self.idxscan += other.idxscan;
        self.idxtupfetch += other.idxtupfetch;
        self.idxtupread += other.idxtupread;
        self.idxblksread += other.idxblksread;
        self.idxblkshit += other.idxblkshit;
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct PostgresStats {
    pub totals: PgStats,
    pub databases: BTreeMap<String, PgStats>,
    pub server_version: u64,
    pub warnings: Vec<String>,
}

fn parse_u64(field: &str, what: &str) -> Result<u64, ExtendError> {
    match field.trim() {
        "" => Ok(0),
        // sum() over numeric can come back as a decimal
        value => value
            .split('.')
            .next()
            .unwrap_or_default()
            .parse::<u64>()
            .map_err(|err| ExtendError::parse(what, format!("'{}': {}", value, err))),
    }
}

/// Parse unaligned, tuples only, tab separated `pg_stat_database` output
pub fn parse_database_rows(output: &str) -> Result<BTreeMap<String, PgStats>, ExtendError> {
    let mut databases = BTreeMap::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        let [datname, rest @ ..] = fields.as_slice() else {
            continue;
        };
        if rest.len() != 10 {
            return Err(ExtendError::parse(
                "pg_stat_database row",
                format!("expected 11 columns, got {}: {}", fields.len(), line),
            ));
        }
        let values = rest
            .iter()
            .map(|f| parse_u64(f, "pg_stat_database"))
            .collect::<Result<Vec<u64>, _>>()?;
        databases.insert(
            datname.to_string(),
            PgStats {
                backends: values[0],
                commits: values[1],
                rollbacks: values[2],
                read: values[3],
                hit: values[4],
                ret: values[5],
                fetch: values[6],
                ins: values[7],
                upd: values[8],
                del: values[9],
                ..Default::default()
            },
        );
    }
    Ok(databases)
}

/// Fold the single row scan query output into `stats`
pub fn apply_scan_row(output: &str, stats: &mut PgStats) -> Result<(), ExtendError> {
    let row = output.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    let values = row
        .split('\t')
        .map(|f| parse_u64(f, "scan counters"))
        .collect::<Result<Vec<u64>, _>>()?;
    let [seqscan, seqtupread, idxscan, idxtupfetch, idxtupread, idxblksread, idxblkshit] =
        values.as_slice()
    else {
        return Err(ExtendError::parse(
            "scan counters",
            format!("expected 7 columns: {}", row),
        ));
    };
    stats.seqscan = *seqscan;
    stats.seqtupread = *seqtupread;
    stats.idxscan = *idxscan;
    stats.idxtupfetch = *idxtupfetch;
    stats.idxtupread = *idxtupread;
    stats.idxblksread = *idxblksread;
    stats.idxblkshit = *idxblkshit;
    Ok(())
}

fn psql_args(config: &PostgresConfig, dbname: &str, query: &str) -> Vec<String> {
    let mut args = vec![
        "-X".to_string(),
        "-A".to_string(),
        "-t".to_string(),
        "-q".to_string(),
        "-F".to_string(),
        "\t".to_string(),
        "-U".to_string(),
        config.user.clone(),
        "-d".to_string(),
        dbname.to_string(),
    ];
    if let Some(host) = &config.host {
        args.extend(["-h".to_string(), host.clone()]);
    }
    if let Some(port) = config.port {
        args.extend(["-p".to_string(), port.to_string()]);
    }
    args.extend(["-c".to_string(), query.to_string()]);
    args
}

async fn psql(config: &PostgresConfig, dbname: &str, query: &str) -> Result<String, ExtendError> {
    let mut envs = BTreeMap::new();
    if let Some(password) = &config.password {
        envs.insert("PGPASSWORD".to_string(), password.clone());
    }
    command::run(
        &config.psql,
        &psql_args(config, dbname, query),
        &envs,
        config.timeout(),
    )
    .await
}

pub async fn collect(config: &PostgresConfig) -> Result<PostgresStats, ExtendError> {
    let mut stats = PostgresStats::default();

    let version_output = psql(config, &config.dbname, VERSION_QUERY).await?;
    stats.server_version = parse_u64(&version_output, "server_version_num")?;

    let database_output = psql(config, &config.dbname, DATABASE_QUERY).await?;
    let mut databases = parse_database_rows(&database_output)?;
    databases.retain(|name, _| !config.ignore_dbs.contains(name));

    for (name, db_stats) in databases.iter_mut() {
        debug!("Collecting scan counters for database {}", name);
        let scan_result = match psql(config, name, SCAN_QUERY).await {
            Ok(output) => apply_scan_row(&output, db_stats),
            Err(err) => Err(err),
        };
        // One unreachable database only zeroes its own scan counters
        if let Err(err) = scan_result {
            warn!("Scan counters for {} unavailable: {}", name, err);
            stats.warnings.push(format!("{}: {}", name, err));
        }
        stats.totals.add(db_stats);
    }
    stats.databases = databases;
    Ok(stats)
}
