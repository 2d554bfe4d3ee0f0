//! # lnms-extend Crate
//!
//! `lnms-extend` is a library of LibreNMS SNMP "extend" collectors.
//! Every collector gathers from one source (a log, a REST API, a CLI tool or
//! `/proc`/`/sys`) and reports through the same
//! `{data, version, error, errorString}` envelope, optionally gzip+base64
//! compressed for snmpd.

use std::future::Future;
use std::time::Instant;

use tracing::error;
use tracing::info;

pub mod clf;
pub mod command;
pub mod config;
pub mod envelope;
pub mod http;
pub mod http_access_log_combined;
pub mod logging;
pub mod logtail;
pub mod mdadm;
pub mod nextcloud;
pub mod opensearch;
pub mod output;
pub mod pihole;
pub mod postgres;
pub mod privoxy;
pub mod samba;
pub mod softnet;
pub mod stats;
pub mod text_blob;
pub mod zfs;

/// Run one collection and wrap whatever it returns in an envelope
pub async fn collect_envelope<T, F>(name: &str, version: u32, collection: F) -> envelope::Envelope
where
    T: serde::Serialize,
    F: Future<Output = Result<T, envelope::ExtendError>>,
{
    let collect_start_time = Instant::now();
    info!("Starting {} collection", name);
    let result = collection.await;
    if let Err(err) = &result {
        error!("{} collection failed: {}", name, err);
    }
    info!(
        "{} collection took {}ms",
        name,
        collect_start_time.elapsed().as_millis()
    );
    envelope::Envelope::from_result(version, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_envelope() {
        let ok = collect_envelope("ok", 3, async { Ok(vec![1, 2]) }).await;
        assert_eq!(serde_json::json!([1, 2]), ok.data);
        assert_eq!(3, ok.version);
        assert!(!ok.is_error());

        let failed = collect_envelope("failed", 1, async {
            Err::<u64, _>(envelope::ExtendError::Unsupported("no zfs".into()))
        })
        .await;
        assert!(failed.is_error());
        assert_eq!(envelope::ErrorCode::unsupported, failed.error);
        assert_eq!(serde_json::json!({}), failed.data);
    }
}
