use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
use tracing::debug;
use tracing::error;

use lnms_extend::collect_envelope;
use lnms_extend::config;
use lnms_extend::config::load_json_config;
use lnms_extend::envelope::Envelope;
use lnms_extend::envelope::ErrorCode;
use lnms_extend::envelope::ExtendError;
use lnms_extend::http_access_log_combined;
use lnms_extend::logging::setup_logging;
use lnms_extend::logging::LogLevels;
use lnms_extend::mdadm;
use lnms_extend::nextcloud;
use lnms_extend::opensearch;
use lnms_extend::output;
use lnms_extend::output::OutputArgs;
use lnms_extend::pihole;
use lnms_extend::postgres;
use lnms_extend::privoxy;
use lnms_extend::samba;
use lnms_extend::softnet;
use lnms_extend::text_blob;
use lnms_extend::zfs;

const LONG_ABOUT: &str = "lnms-extend: LibreNMS SNMP extend collectors";

/// Clap CLI Args struct with metadata in help output
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = LONG_ABOUT)]
struct Cli {
    /// Adjust the console log-level
    #[arg(long, short, value_enum, ignore_case = true, default_value = "warn", global = true)]
    log_level: LogLevels,
    #[command(subcommand)]
    collector: Collector,
}

#[derive(Debug, Subcommand)]
enum Collector {
    /// Combined Log Format HTTP access logs
    #[command(name = "http_access_log_combined")]
    HttpAccessLogCombined {
        #[clap(flatten)]
        output: OutputArgs,
        #[clap(
            short,
            long,
            value_parser,
            default_value = "/usr/local/etc/http_access_log_combined_extend.json"
        )]
        config: PathBuf,
    },
    /// Privoxy request, block and connection counters from its log
    Privoxy {
        #[clap(flatten)]
        output: OutputArgs,
        #[clap(short = 'f', long, value_parser, default_value = privoxy::DEFAULT_LOG)]
        log: PathBuf,
        /// Seconds of log to read back from its end
        #[clap(long = "window", default_value_t = 300)]
        window_secs: u64,
    },
    /// PostgreSQL activity via psql
    Postgres {
        #[clap(flatten)]
        output: OutputArgs,
        #[clap(short, long, value_parser, default_value = "/usr/local/etc/postgres_extend.json")]
        config: PathBuf,
    },
    /// Pi-hole admin API
    Pihole {
        #[clap(flatten)]
        output: OutputArgs,
        #[clap(short, long, value_parser, default_value = "/usr/local/etc/pihole_extend.json")]
        config: PathBuf,
    },
    /// Nextcloud via occ
    Nextcloud {
        #[clap(flatten)]
        output: OutputArgs,
        #[clap(short, long, value_parser, default_value = "/usr/local/etc/nextcloud_extend.json")]
        config: PathBuf,
    },
    /// OpenSearch / Elasticsearch cluster health and stats
    Opensearch {
        #[clap(flatten)]
        output: OutputArgs,
        #[clap(short, long, value_parser, default_value = "/usr/local/etc/opensearch_extend.json")]
        config: PathBuf,
    },
    /// ZFS ARC and pools
    Zfs {
        #[clap(flatten)]
        output: OutputArgs,
        #[clap(long, value_parser, default_value = zfs::DEFAULT_ARCSTATS)]
        arcstats: PathBuf,
        #[clap(long, default_value = zfs::DEFAULT_ZPOOL)]
        zpool: String,
    },
    /// Samba sessions and shares via smbstatus
    Samba {
        #[clap(flatten)]
        output: OutputArgs,
        #[clap(long, default_value = samba::DEFAULT_SMBSTATUS)]
        smbstatus: String,
    },
    /// Linux md RAID arrays
    Mdadm {
        #[clap(flatten)]
        output: OutputArgs,
        #[clap(long, value_parser, default_value = mdadm::DEFAULT_SYSFS)]
        sysfs: PathBuf,
    },
    /// /proc/net/softnet_stat totals
    #[command(name = "linux_softnet_stat", alias = "softnet")]
    Softnet {
        #[clap(flatten)]
        output: OutputArgs,
        #[clap(long, value_parser, default_value = softnet::DEFAULT_SOFTNET_STAT)]
        softnet_stat: PathBuf,
        #[clap(long, value_parser, default_value = softnet::DEFAULT_SYSCTL_DIR)]
        sysctl_dir: PathBuf,
    },
    /// Output of arbitrary shell commands
    #[command(name = "text_blob")]
    TextBlob {
        #[clap(flatten)]
        output: OutputArgs,
        #[clap(short, long, value_parser, default_value = "/usr/local/etc/text_blob_extend.json")]
        config: PathBuf,
    },
}

async fn run(collector: Collector) -> (Envelope, OutputArgs) {
    match collector {
        Collector::HttpAccessLogCombined { output, config: config_path } => {
            let envelope = collect_envelope(
                "http_access_log_combined",
                http_access_log_combined::VERSION,
                async {
                    let config: config::HttpAccessLogConfig = load_json_config(&config_path, false)?;
                    config.validate()?;
                    http_access_log_combined::collect(config).await
                },
            )
            .await;
            (envelope, output)
        }
        Collector::Privoxy {
            output,
            log,
            window_secs,
        } => (
            collect_envelope(
                "privoxy",
                privoxy::VERSION,
                privoxy::collect(log, window_secs),
            )
            .await,
            output,
        ),
        Collector::Postgres { output, config: config_path } => {
            let envelope = collect_envelope("postgres", postgres::VERSION, async {
                let config: config::PostgresConfig = load_json_config(&config_path, false)?;
                config.validate()?;
                postgres::collect(&config).await
            })
            .await;
            (envelope, output)
        }
        Collector::Pihole { output, config: config_path } => {
            let envelope = collect_envelope("pihole", pihole::VERSION, async {
                let config: config::PiholeConfig = load_json_config(&config_path, false)?;
                config.validate()?;
                pihole::collect(&config).await
            })
            .await;
            (envelope, output)
        }
        Collector::Nextcloud { output, config: config_path } => {
            let envelope = collect_envelope("nextcloud", nextcloud::VERSION, async {
                let config: config::NextcloudConfig = load_json_config(&config_path, false)?;
                config.validate()?;
                nextcloud::collect(&config).await
            })
            .await;
            (envelope, output)
        }
        Collector::Opensearch { output, config: config_path } => {
            let envelope = collect_envelope("opensearch", opensearch::VERSION, async {
                let config: config::OpenSearchConfig = load_json_config(&config_path, false)?;
                config.validate()?;
                opensearch::collect(&config).await
            })
            .await;
            (envelope, output)
        }
        Collector::Zfs {
            output,
            arcstats,
            zpool,
        } => (
            collect_envelope("zfs", zfs::VERSION, zfs::collect(arcstats, zpool)).await,
            output,
        ),
        Collector::Samba { output, smbstatus } => (
            collect_envelope("samba", samba::VERSION, samba::collect(smbstatus)).await,
            output,
        ),
        Collector::Mdadm { output, sysfs } => (
            collect_envelope("mdadm", mdadm::VERSION, mdadm::collect(sysfs)).await,
            output,
        ),
        Collector::Softnet {
            output,
            softnet_stat,
            sysctl_dir,
        } => (
            collect_envelope(
                "linux_softnet_stat",
                softnet::VERSION,
                softnet::collect(softnet_stat, sysctl_dir),
            )
            .await,
            output,
        ),
        Collector::TextBlob { mut output, config: config_path } => {
            let envelope = collect_envelope("text_blob", text_blob::VERSION, async {
                let config: config::TextBlobConfig = load_json_config(&config_path, true)?;
                config.validate()?;
                text_blob::collect(&config).await
            })
            .await;
            // Blob output is free text, always ship it compressed
            output.compress = true;
            (envelope, output)
        }
    }
}

fn output_results(envelope: &Envelope, output_args: &OutputArgs) -> anyhow::Result<()> {
    output::emit(envelope, output_args).with_context(|| match &output_args.write {
        Some(path) => format!("Unable to write results to {:?}", path),
        None => "Unable to print results".to_string(),
    })
}

/// A failed collection keeps its own code, otherwise an output failure decides it
fn exit_code(envelope: &Envelope, output_result: &anyhow::Result<()>) -> ErrorCode {
    match output_result {
        Err(err) if !envelope.is_error() => err
            .downcast_ref::<ExtendError>()
            .map(ExtendError::code)
            .unwrap_or(ErrorCode::io),
        _ => envelope.error,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Cli::parse();
    setup_logging(args.log_level.into());
    debug!("CLI Args: {:?}", args);

    let (envelope, output_args) = run(args.collector).await;
    let output_result = output_results(&envelope, &output_args);
    if let Err(err) = &output_result {
        error!("{:#}", err);
    }
    ExitCode::from(exit_code(&envelope, &output_result) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unwritable() -> OutputArgs {
        OutputArgs {
            write: Some(PathBuf::from("/nonexistent/lnms-extend/zfs.json")),
            quiet: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_output_failure_sets_exit_code() {
        let envelope = Envelope::from_result(1, Ok::<_, ExtendError>(serde_json::json!({"a": 1})));
        let result = output_results(&envelope, &unwritable());
        let err = result.as_ref().unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/lnms-extend/zfs.json"));
        assert_eq!(ErrorCode::io, exit_code(&envelope, &result));
    }

    #[test]
    fn test_collection_error_wins_exit_code() {
        let envelope = Envelope::from_result(
            1,
            Err::<serde_json::Value, _>(ExtendError::Unsupported("no arcstats".into())),
        );
        let result = output_results(&envelope, &unwritable());
        assert!(result.is_err());
        assert_eq!(ErrorCode::unsupported, exit_code(&envelope, &result));
        let ok = Envelope::from_result(1, Ok::<_, ExtendError>(serde_json::json!({})));
        assert_eq!(ErrorCode::ok, exit_code(&ok, &Ok(())));
    }
}
