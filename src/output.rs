//! # output module
//!
//! Rendering of the envelope for SNMP. LibreNMS accepts either plain JSON or the
//! gzip+base64 form, and cron-refreshed installs read a cache file instead of
//! running the collector from snmpd.

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use base64::engine::general_purpose;
use base64::Engine as _;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::envelope::Envelope;
use crate::envelope::ExtendError;

/// Output flags shared by every collector
#[derive(clap::Args, Clone, Debug, Default)]
pub struct OutputArgs {
    /// Pretty print the JSON
    #[clap(short, long)]
    pub pretty: bool,
    /// gzip+base64 compress the output if it makes it smaller
    #[clap(short = 'b', long)]
    pub compress: bool,
    /// Write raw JSON to this path and the compressed form to <PATH>.snmp
    #[clap(short, long, value_parser)]
    pub write: Option<PathBuf>,
    /// Print nothing to stdout
    #[clap(short, long)]
    pub quiet: bool,
}

/// gzip then base64 the string, no line wrapping
pub fn compress(raw: &str) -> Result<String, ExtendError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(raw.as_bytes())
        .map_err(|err| ExtendError::parse("gzip output", err))?;
    let gzipped = encoder
        .finish()
        .map_err(|err| ExtendError::parse("gzip output", err))?;
    Ok(general_purpose::STANDARD.encode(gzipped))
}

pub fn render(envelope: &Envelope, pretty: bool) -> Result<String, ExtendError> {
    Ok(match pretty {
        true => serde_json::to_string_pretty(envelope)?,
        false => serde_json::to_string(envelope)?,
    })
}

/// Pick what goes to stdout: compressed only when asked for and actually smaller
pub fn select_output(raw: String, compressed: Option<String>) -> String {
    match compressed {
        Some(compressed) if compressed.len() < raw.len() => compressed,
        _ => raw,
    }
}

fn snmp_cache_path(path: &Path) -> PathBuf {
    let mut snmp_path = path.as_os_str().to_owned();
    snmp_path.push(".snmp");
    PathBuf::from(snmp_path)
}

/// Write the two cache files. Last writer wins
pub fn write_cache(path: &Path, raw: &str, compressed: &str) -> Result<(), ExtendError> {
    std::fs::write(path, format!("{}\n", raw)).map_err(|err| ExtendError::io(path, err))?;
    let snmp_path = snmp_cache_path(path);
    std::fs::write(&snmp_path, format!("{}\n", compressed))
        .map_err(|err| ExtendError::io(&snmp_path, err))?;
    debug!("Wrote cache files {:?} and {:?}", path, snmp_path);
    Ok(())
}

/// Render, cache and print the envelope as the output flags ask
pub fn emit(envelope: &Envelope, args: &OutputArgs) -> Result<(), ExtendError> {
    let raw = render(envelope, args.pretty)?;
    let compressed = match args.compress || args.write.is_some() {
        true => Some(compress(&raw)?),
        false => None,
    };
    if let (Some(path), Some(compressed)) = (&args.write, &compressed) {
        write_cache(path, &raw, compressed)?;
    }
    if args.quiet {
        return Ok(());
    }
    let to_print = match args.compress {
        true => select_output(raw, compressed),
        false => raw,
    };
    println!("{}", to_print);
    Ok(())
}
