//! # opensearch module
//!
//! Cluster health and the `_all` totals from `_stats` of an OpenSearch (or
//! Elasticsearch) cluster, re-projected into LibreNMS' short key names.

use std::str::FromStr;

use int_enum::IntEnum;
use serde_repr::Deserialize_repr;
use serde_repr::Serialize_repr;
use strum_macros::EnumString;

use crate::config::OpenSearchConfig;
use crate::envelope::ExtendError;
use crate::http;
use crate::http::BasicAuth;

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
pub enum ClusterStatus {
    green = 0,
    yellow = 1,
    red = 2,
    #[default]
    unknown = 3,
}

/// `_cluster/health`
#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ClusterHealth {
    pub cluster_name: String,
    pub status: String,
    pub timed_out: bool,
    pub number_of_nodes: u64,
    pub number_of_data_nodes: u64,
    pub active_primary_shards: u64,
    pub active_shards: u64,
    pub relocating_shards: u64,
    pub initializing_shards: u64,
    pub unassigned_shards: u64,
    pub delayed_unassigned_shards: u64,
    pub number_of_pending_tasks: u64,
    pub number_of_in_flight_fetch: u64,
    pub task_max_waiting_in_queue_millis: u64,
    pub active_shards_percent_as_number: f64,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DocsStats {
    pub count: u64,
    pub deleted: u64,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct StoreStats {
    pub size_in_bytes: u64,
    pub reserved_in_bytes: u64,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct IndexingStats {
    pub index_total: u64,
    pub index_time_in_millis: u64,
    pub index_current: u64,
    pub index_failed: u64,
    pub delete_total: u64,
    pub delete_time_in_millis: u64,
    pub noop_update_total: u64,
    pub is_throttled: bool,
    pub throttle_time_in_millis: u64,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct GetStats {
    pub total: u64,
    pub time_in_millis: u64,
    pub exists_total: u64,
    pub exists_time_in_millis: u64,
    pub missing_total: u64,
    pub missing_time_in_millis: u64,
    pub current: u64,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SearchStats {
    pub open_contexts: u64,
    pub query_total: u64,
    pub query_time_in_millis: u64,
    pub query_current: u64,
    pub fetch_total: u64,
    pub fetch_time_in_millis: u64,
    pub fetch_current: u64,
    pub scroll_total: u64,
    pub scroll_time_in_millis: u64,
    pub scroll_current: u64,
    pub suggest_total: u64,
    pub suggest_time_in_millis: u64,
    pub suggest_current: u64,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct MergeStats {
    pub current: u64,
    pub current_docs: u64,
    pub current_size_in_bytes: u64,
    pub total: u64,
    pub total_time_in_millis: u64,
    pub total_docs: u64,
    pub total_size_in_bytes: u64,
}

/// refresh, flush and warmer all share `total` + `total_time_in_millis`
#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct TimedTotal {
    pub total: u64,
    pub total_time_in_millis: u64,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct CacheStats {
    pub memory_size_in_bytes: u64,
    pub total_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub cache_size: u64,
    pub cache_count: u64,
    pub evictions: u64,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SegmentsStats {
    pub count: u64,
    pub memory_in_bytes: u64,
    pub terms_memory_in_bytes: u64,
    pub stored_fields_memory_in_bytes: u64,
    pub term_vectors_memory_in_bytes: u64,
    pub norms_memory_in_bytes: u64,
    pub points_memory_in_bytes: u64,
    pub doc_values_memory_in_bytes: u64,
    pub index_writer_memory_in_bytes: u64,
    pub version_map_memory_in_bytes: u64,
    pub fixed_bit_set_memory_in_bytes: u64,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct TranslogStats {
    pub operations: u64,
    pub size_in_bytes: u64,
    pub uncommitted_operations: u64,
    pub uncommitted_size_in_bytes: u64,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct TotalStats {
    pub docs: DocsStats,
    pub store: StoreStats,
    pub indexing: IndexingStats,
    pub get: GetStats,
    pub search: SearchStats,
    pub merges: MergeStats,
    pub refresh: TimedTotal,
    pub flush: TimedTotal,
    pub warmer: TimedTotal,
    pub query_cache: CacheStats,
    pub fielddata: CacheStats,
    pub request_cache: CacheStats,
    pub segments: SegmentsStats,
    pub translog: TranslogStats,
}

#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AllStats {
    pub total: TotalStats,
}

/// `_stats`, only `_all` is used
#[derive(serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct IndicesStats {
    #[serde(rename = "_all")]
    pub all: AllStats,
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OpenSearchStats {
    pub c_name: String,
    pub c_status: ClusterStatus,
    pub c_timed_out: bool,
    pub c_nodes: u64,
    pub c_data_nodes: u64,
    pub c_act_pri_shards: u64,
    pub c_act_shards: u64,
    pub c_rel_shards: u64,
    pub c_init_shards: u64,
    pub c_unass_shards: u64,
    pub c_delayed_unass_shards: u64,
    pub c_pending_tasks: u64,
    pub c_in_fl_fetch: u64,
    pub c_task_max_in_time: u64,
    pub c_act_shards_perc: f64,
    pub ttl_ops: u64,
    pub ttl_size: u64,
    pub tdocs_count: u64,
    pub tdocs_deleted: u64,
    pub tst_size: u64,
    pub tst_res_size: u64,
    pub ti_total: u64,
    pub ti_time: u64,
    pub ti_current: u64,
    pub ti_failed: u64,
    pub ti_del_total: u64,
    pub ti_del_time: u64,
    pub ti_noop_up_total: u64,
    pub ti_throttled: bool,
    pub ti_throttled_time: u64,
    pub tg_total: u64,
    pub tg_time: u64,
    pub tg_exists_total: u64,
    pub tg_exists_time: u64,
    pub tg_missing_total: u64,
    pub tg_missing_time: u64,
    pub tg_current: u64,
    pub ts_open_contexts: u64,
    pub ts_q_total: u64,
    pub ts_q_time: u64,
    pub ts_q_current: u64,
    pub ts_f_total: u64,
    pub ts_f_time: u64,
    pub ts_f_current: u64,
    pub ts_sc_total: u64,
    pub ts_sc_time: u64,
    pub ts_sc_current: u64,
    pub ts_su_total: u64,
    pub ts_su_time: u64,
    pub ts_su_current: u64,
    pub tm_current: u64,
    pub tm_current_docs: u64,
    pub tm_current_size: u64,
    pub tm_total: u64,
    pub tm_time: u64,
    pub tm_docs: u64,
    pub tm_size: u64,
    pub tr_total: u64,
    pub tr_time: u64,
    pub tf_total: u64,
    pub tf_time: u64,
    pub tw_total: u64,
    pub tw_time: u64,
    pub tqc_size: u64,
    pub tqc_total: u64,
    pub tqc_hit_count: u64,
    pub tqc_miss_count: u64,
    pub tqc_cache_size: u64,
    pub tqc_cache_count: u64,
    pub tqc_evictions: u64,
    pub tfd_size: u64,
    pub tfd_evictions: u64,
    pub trc_size: u64,
    pub trc_evictions: u64,
    pub trc_hit_count: u64,
    pub trc_miss_count: u64,
    pub tseg_count: u64,
    pub tseg_size: u64,
    pub tseg_terms_size: u64,
    pub tseg_fields_size: u64,
    pub tseg_tvector_size: u64,
    pub tseg_norms_size: u64,
    pub tseg_points_size: u64,
    pub tseg_docval_size: u64,
    pub tseg_indwrt_size: u64,
    pub tseg_vermap_size: u64,
    pub tseg_fbs_size: u64,
    pub tt_ops: u64,
    pub tt_size: u64,
    pub tt_uncom_ops: u64,
    pub tt_uncom_size: u64,
}

impl OpenSearchStats {
    pub fn new(health: &ClusterHealth, indices: &IndicesStats) -> Self {
        let t = &indices.all.total;
        OpenSearchStats {
            c_name: health.cluster_name.clone(),
            c_status: ClusterStatus::from_str(&health.status).unwrap_or_default(),
            c_timed_out: health.timed_out,
            c_nodes: health.number_of_nodes,
            c_data_nodes: health.number_of_data_nodes,
            c_act_pri_shards: health.active_primary_shards,
            c_act_shards: health.active_shards,
            c_rel_shards: health.relocating_shards,
            c_init_shards: health.initializing_shards,
            c_unass_shards: health.unassigned_shards,
            c_delayed_unass_shards: health.delayed_unassigned_shards,
            c_pending_tasks: health.number_of_pending_tasks,
            c_in_fl_fetch: health.number_of_in_flight_fetch,
            c_task_max_in_time: health.task_max_waiting_in_queue_millis,
            c_act_shards_perc: health.active_shards_percent_as_number,
            ttl_ops: t.indexing.index_total,
            ttl_size: t.store.size_in_bytes,
            tdocs_count: t.docs.count,
            tdocs_deleted: t.docs.deleted,
            tst_size: t.store.size_in_bytes,
            tst_res_size: t.store.reserved_in_bytes,
            ti_total: t.indexing.index_total,
            ti_time: t.indexing.index_time_in_millis,
            ti_current: t.indexing.index_current,
            ti_failed: t.indexing.index_failed,
            ti_del_total: t.indexing.delete_total,
            ti_del_time: t.indexing.delete_time_in_millis,
            ti_noop_up_total: t.indexing.noop_update_total,
            ti_throttled: t.indexing.is_throttled,
            ti_throttled_time: t.indexing.throttle_time_in_millis,
            tg_total: t.get.total,
            tg_time: t.get.time_in_millis,
            tg_exists_total: t.get.exists_total,
            tg_exists_time: t.get.exists_time_in_millis,
            tg_missing_total: t.get.missing_total,
            tg_missing_time: t.get.missing_time_in_millis,
            tg_current: t.get.current,
            ts_open_contexts: t.search.open_contexts,
            ts_q_total: t.search.query_total,
            ts_q_time: t.search.query_time_in_millis,
            ts_q_current: t.search.query_current,
            ts_f_total: t.search.fetch_total,
            ts_f_time: t.search.fetch_time_in_millis,
            ts_f_current: t.search.fetch_current,
            ts_sc_total: t.search.scroll_total,
            ts_sc_time: t.search.scroll_time_in_millis,
            ts_sc_current: t.search.scroll_current,
            ts_su_total: t.search.suggest_total,
            ts_su_time: t.search.suggest_time_in_millis,
            ts_su_current: t.search.suggest_current,
            tm_current: t.merges.current,
            tm_current_docs: t.merges.current_docs,
            tm_current_size: t.merges.current_size_in_bytes,
            tm_total: t.merges.total,
            tm_time: t.merges.total_time_in_millis,
            tm_docs: t.merges.total_docs,
            tm_size: t.merges.total_size_in_bytes,
            tr_total: t.refresh.total,
            tr_time: t.refresh.total_time_in_millis,
            tf_total: t.flush.total,
            tf_time: t.flush.total_time_in_millis,
            tw_total: t.warmer.total,
            tw_time: t.warmer.total_time_in_millis,
            tqc_size: t.query_cache.memory_size_in_bytes,
            tqc_total: t.query_cache.total_count,
            tqc_hit_count: t.query_cache.hit_count,
            tqc_miss_count: t.query_cache.miss_count,
            tqc_cache_size: t.query_cache.cache_size,
            tqc_cache_count: t.query_cache.cache_count,
            tqc_evictions: t.query_cache.evictions,
            tfd_size: t.fielddata.memory_size_in_bytes,
            tfd_evictions: t.fielddata.evictions,
            trc_size: t.request_cache.memory_size_in_bytes,
            trc_evictions: t.request_cache.evictions,
            trc_hit_count: t.request_cache.hit_count,
            trc_miss_count: t.request_cache.miss_count,
            tseg_count: t.segments.count,
            tseg_size: t.segments.memory_in_bytes,
            tseg_terms_size: t.segments.terms_memory_in_bytes,
            tseg_fields_size: t.segments.stored_fields_memory_in_bytes,
            tseg_tvector_size: t.segments.term_vectors_memory_in_bytes,
            tseg_norms_size: t.segments.norms_memory_in_bytes,
            tseg_points_size: t.segments.points_memory_in_bytes,
            tseg_docval_size: t.segments.doc_values_memory_in_bytes,
            tseg_indwrt_size: t.segments.index_writer_memory_in_bytes,
            tseg_vermap_size: t.segments.version_map_memory_in_bytes,
            tseg_fbs_size: t.segments.fixed_bit_set_memory_in_bytes,
            tt_ops: t.translog.operations,
            tt_size: t.translog.size_in_bytes,
            tt_uncom_ops: t.translog.uncommitted_operations,
            tt_uncom_size: t.translog.uncommitted_size_in_bytes,
        }
    }
}

pub async fn collect(config: &OpenSearchConfig) -> Result<OpenSearchStats, ExtendError> {
    let client = http::client(
        std::time::Duration::from_secs(config.timeout_secs),
        config.insecure,
    )?;
    let auth = config.user.as_ref().map(|user| BasicAuth {
        user: user.clone(),
        password: config.password.clone(),
    });
    let base = config.url.trim_end_matches('/');
    let health: ClusterHealth =
        http::get_json(&client, &format!("{}/_cluster/health", base), auth.as_ref()).await?;
    let indices: IndicesStats =
        http::get_json(&client, &format!("{}/_stats", base), auth.as_ref()).await?;
    Ok(OpenSearchStats::new(&health, &indices))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOCK_HEALTH: &str = r###"{"cluster_name":"logs","status":"yellow","timed_out":false,"number_of_nodes":3,"number_of_data_nodes":2,"discovered_master":true,"active_primary_shards":40,"active_shards":78,"relocating_shards":1,"initializing_shards":0,"unassigned_shards":2,"delayed_unassigned_shards":0,"number_of_pending_tasks":0,"number_of_in_flight_fetch":0,"task_max_waiting_in_queue_millis":0,"active_shards_percent_as_number":97.5}"###;

    const MOCK_STATS: &str = r###"{"_shards":{"total":80,"successful":78,"failed":0},"_all":{"primaries":{"docs":{"count":1}},"total":{"docs":{"count":1500000,"deleted":42},"store":{"size_in_bytes":2147483648,"reserved_in_bytes":0},"indexing":{"index_total":987654,"index_time_in_millis":123456,"index_current":2,"index_failed":1,"delete_total":10,"delete_time_in_millis":5,"noop_update_total":0,"is_throttled":false,"throttle_time_in_millis":0},"get":{"total":50,"time_in_millis":12,"exists_total":45,"exists_time_in_millis":10,"missing_total":5,"missing_time_in_millis":2,"current":0},"search":{"open_contexts":0,"query_total":2000,"query_time_in_millis":3000,"query_current":1,"fetch_total":1500,"fetch_time_in_millis":400,"fetch_current":0,"scroll_total":3,"scroll_time_in_millis":90,"scroll_current":0,"suggest_total":0,"suggest_time_in_millis":0,"suggest_current":0},"merges":{"current":0,"current_docs":0,"current_size_in_bytes":0,"total":300,"total_time_in_millis":60000,"total_docs":900000,"total_size_in_bytes":1073741824},"refresh":{"total":8000,"total_time_in_millis":45000,"listeners":0},"flush":{"total":40,"periodic":0,"total_time_in_millis":900},"warmer":{"current":0,"total":7000,"total_time_in_millis":150},"query_cache":{"memory_size_in_bytes":1024,"total_count":100,"hit_count":60,"miss_count":40,"cache_size":5,"cache_count":7,"evictions":2},"fielddata":{"memory_size_in_bytes":2048,"evictions":0},"segments":{"count":210,"memory_in_bytes":4096,"terms_memory_in_bytes":0,"index_writer_memory_in_bytes":512,"version_map_memory_in_bytes":0,"fixed_bit_set_memory_in_bytes":64},"translog":{"operations":33,"size_in_bytes":8192,"uncommitted_operations":3,"uncommitted_size_in_bytes":512},"request_cache":{"memory_size_in_bytes":256,"evictions":0,"hit_count":9,"miss_count":1}}},"indices":{}}"###;

    #[test]
    fn test_opensearch_stats() {
        let health: ClusterHealth = serde_json::from_str(MOCK_HEALTH).unwrap();
        let indices: IndicesStats = serde_json::from_str(MOCK_STATS).unwrap();
        let stats = OpenSearchStats::new(&health, &indices);
        assert_eq!("logs", stats.c_name);
        assert_eq!(ClusterStatus::yellow, stats.c_status);
        assert_eq!(3, stats.c_nodes);
        assert_eq!(1, stats.c_rel_shards);
        assert_eq!(97.5, stats.c_act_shards_perc);
        assert_eq!(987654, stats.ttl_ops);
        assert_eq!(2147483648, stats.ttl_size);
        assert_eq!(1, stats.ti_failed);
        assert_eq!(2000, stats.ts_q_total);
        assert_eq!(60, stats.tqc_hit_count);
        assert_eq!(8000, stats.tr_total);
        assert_eq!(900, stats.tf_time);
        assert_eq!(7000, stats.tw_total);
        assert_eq!(210, stats.tseg_count);
        assert_eq!(33, stats.tt_ops);
        assert_eq!(9, stats.trc_hit_count);
        assert_eq!(1500000, stats.tdocs_count);
    }

    #[test]
    fn test_status_serializes_as_int() {
        let health = ClusterHealth {
            status: "red".into(),
            ..Default::default()
        };
        let stats = OpenSearchStats::new(&health, &IndicesStats::default());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(2, json["c_status"]);

        let unknown = ClusterHealth {
            status: "purple".into(),
            ..Default::default()
        };
        assert_eq!(
            ClusterStatus::unknown,
            OpenSearchStats::new(&unknown, &IndicesStats::default()).c_status
        );
    }
}
