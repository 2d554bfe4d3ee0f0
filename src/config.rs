use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ExtendConfigError {
    #[error("Unable to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unable to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid value for '{key}' in '{section}': {reason}")]
    InvalidValue {
        section: String,
        key: String,
        reason: String,
    },
    #[error("Missing key '{key}' in '{section}'")]
    MissingKey { section: String, key: String },
}

/// Load a JSON config file into `T`
/// When `required` is false a missing file yields `T::default()`
pub fn load_json_config<T: DeserializeOwned + Default>(
    path: &Path,
    required: bool,
) -> Result<T, ExtendConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
            warn!("No config at {:?} ... using defaults", path);
            return Ok(T::default());
        }
        Err(source) => {
            return Err(ExtendConfigError::Read {
                path: path.into(),
                source,
            })
        }
    };
    debug!("Loaded {} bytes of config from {:?}", contents.len(), path);
    serde_json::from_str(&contents).map_err(|source| ExtendConfigError::Parse {
        path: path.into(),
        source,
    })
}

fn default_timeout_secs() -> u64 {
    30
}

fn check_timeout(section: &str, timeout_secs: u64) -> Result<(), ExtendConfigError> {
    if timeout_secs == 0 {
        return Err(ExtendConfigError::InvalidValue {
            section: section.into(),
            key: "timeout_secs".into(),
            reason: "must be greater than 0".into(),
        });
    }
    Ok(())
}

#[derive(serde::Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(default)]
pub struct HttpAccessLogConfig {
    pub access_files: BTreeMap<String, PathBuf>,
    pub error_files: BTreeMap<String, PathBuf>,
    pub auto: bool,
    pub auto_glob: String,
    pub auto_end_regex: String,
    pub window_secs: u64,
}
impl Default for HttpAccessLogConfig {
    fn default() -> Self {
        HttpAccessLogConfig {
            access_files: BTreeMap::new(),
            error_files: BTreeMap::new(),
            auto: false,
            auto_glob: "/var/log/apache/*access.log".to_string(),
            auto_end_regex: r"[._-]?access\.log$".to_string(),
            window_secs: 300,
        }
    }
}
impl HttpAccessLogConfig {
    pub fn validate(&self) -> Result<(), ExtendConfigError> {
        if !self.auto && self.access_files.is_empty() {
            return Err(ExtendConfigError::MissingKey {
                section: "http_access_log_combined".into(),
                key: "access_files".into(),
            });
        }
        if let Err(err) = regex::Regex::new(&self.auto_end_regex) {
            return Err(ExtendConfigError::InvalidValue {
                section: "http_access_log_combined".into(),
                key: "auto_end_regex".into(),
                reason: err.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(serde::Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(default)]
pub struct PostgresConfig {
    pub psql: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
    pub ignore_dbs: Vec<String>,
    pub timeout_secs: u64,
}
impl Default for PostgresConfig {
    fn default() -> Self {
        PostgresConfig {
            psql: "psql".to_string(),
            host: None,
            port: None,
            user: "postgres".to_string(),
            password: None,
            dbname: "postgres".to_string(),
            ignore_dbs: vec!["template0".to_string(), "template1".to_string()],
            timeout_secs: default_timeout_secs(),
        }
    }
}
impl PostgresConfig {
    pub fn validate(&self) -> Result<(), ExtendConfigError> {
        check_timeout("postgres", self.timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(serde::Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(default)]
pub struct PiholeConfig {
    pub url: String,
    pub api_auth: Option<String>,
    pub timeout_secs: u64,
}
impl Default for PiholeConfig {
    fn default() -> Self {
        PiholeConfig {
            url: "http://127.0.0.1/admin/api.php".to_string(),
            api_auth: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}
impl PiholeConfig {
    pub fn validate(&self) -> Result<(), ExtendConfigError> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ExtendConfigError::InvalidValue {
                section: "pihole".into(),
                key: "url".into(),
                reason: format!("'{}' is not an http(s) URL", self.url),
            });
        }
        check_timeout("pihole", self.timeout_secs)
    }
}

#[derive(serde::Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(default)]
pub struct NextcloudConfig {
    pub occ: Vec<String>,
    pub run_as: Option<String>,
    pub timeout_secs: u64,
}
impl Default for NextcloudConfig {
    fn default() -> Self {
        NextcloudConfig {
            occ: vec!["php".to_string(), "/var/www/nextcloud/occ".to_string()],
            run_as: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}
impl NextcloudConfig {
    pub fn validate(&self) -> Result<(), ExtendConfigError> {
        if self.occ.is_empty() {
            return Err(ExtendConfigError::MissingKey {
                section: "nextcloud".into(),
                key: "occ".into(),
            });
        }
        check_timeout("nextcloud", self.timeout_secs)
    }

    /// Program + leading args used to invoke occ, honouring `run_as`
    pub fn occ_command(&self) -> (String, Vec<String>) {
        let mut argv: Vec<String> = Vec::new();
        if let Some(user) = &self.run_as {
            argv.extend(["sudo".to_string(), "-u".to_string(), user.clone()]);
        }
        argv.extend(self.occ.iter().cloned());
        let program = argv.remove(0);
        (program, argv)
    }
}

#[derive(serde::Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(default)]
pub struct OpenSearchConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub insecure: bool,
    pub timeout_secs: u64,
}
impl Default for OpenSearchConfig {
    fn default() -> Self {
        OpenSearchConfig {
            url: "http://127.0.0.1:9200".to_string(),
            user: None,
            password: None,
            insecure: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}
impl OpenSearchConfig {
    pub fn validate(&self) -> Result<(), ExtendConfigError> {
        if self.password.is_some() && self.user.is_none() {
            return Err(ExtendConfigError::MissingKey {
                section: "opensearch".into(),
                key: "user".into(),
            });
        }
        check_timeout("opensearch", self.timeout_secs)
    }
}

#[derive(serde::Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(default)]
pub struct TextBlobConfig {
    pub blobs: BTreeMap<String, String>,
    pub global_envs: BTreeMap<String, String>,
    pub blob_envs: BTreeMap<String, BTreeMap<String, String>>,
    pub timeout_secs: u64,
}
impl Default for TextBlobConfig {
    fn default() -> Self {
        TextBlobConfig {
            blobs: BTreeMap::new(),
            global_envs: BTreeMap::new(),
            blob_envs: BTreeMap::new(),
            timeout_secs: 60,
        }
    }
}
impl TextBlobConfig {
    pub fn validate(&self) -> Result<(), ExtendConfigError> {
        if self.blobs.is_empty() {
            return Err(ExtendConfigError::MissingKey {
                section: "text_blob".into(),
                key: "blobs".into(),
            });
        }
        if let Some(name) = self.blob_envs.keys().find(|n| !self.blobs.contains_key(*n)) {
            return Err(ExtendConfigError::InvalidValue {
                section: "text_blob".into(),
                key: "blob_envs".into(),
                reason: format!("'{}' is not a configured blob", name),
            });
        }
        check_timeout("text_blob", self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    const FULL_HTTP_CONFIG: &str = r###"{
    "access_files": {"www": "/var/log/apache/www-access.log"},
    "error_files": {"www": "/var/log/apache/www-error.log"},
    "auto": true,
    "auto_glob": "/var/log/nginx/*access.log",
    "window_secs": 600
}"###;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut config_file = NamedTempFile::new().expect("Unable to make named tempfile");
        config_file
            .write_all(contents.as_bytes())
            .expect("Unable to write out temp config file");
        config_file
    }

    #[test]
    fn test_full_http_config() {
        let config_file = write_config(FULL_HTTP_CONFIG);
        let config: HttpAccessLogConfig =
            load_json_config(config_file.path(), true).expect("Failed to parse config");
        let expected_config = HttpAccessLogConfig {
            access_files: BTreeMap::from([(
                String::from("www"),
                PathBuf::from("/var/log/apache/www-access.log"),
            )]),
            error_files: BTreeMap::from([(
                String::from("www"),
                PathBuf::from("/var/log/apache/www-error.log"),
            )]),
            auto: true,
            auto_glob: String::from("/var/log/nginx/*access.log"),
            window_secs: 600,
            ..Default::default()
        };
        assert_eq!(expected_config, config);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_optional_config_is_default() {
        let config: PiholeConfig =
            load_json_config(Path::new("/nonexistent/pihole.json"), false).unwrap();
        assert_eq!(PiholeConfig::default(), config);
    }

    #[test]
    fn test_missing_required_config_errors() {
        let result: Result<TextBlobConfig, _> =
            load_json_config(Path::new("/nonexistent/text_blob.json"), true);
        assert!(matches!(result, Err(ExtendConfigError::Read { .. })));
    }

    #[test]
    fn test_invalid_json_returns_error() {
        let config_file = write_config("{\"url\": ");
        let result: Result<PiholeConfig, _> = load_json_config(config_file.path(), true);
        assert!(matches!(result, Err(ExtendConfigError::Parse { .. })));
    }

    #[test]
    fn test_validation_errors() {
        assert!(HttpAccessLogConfig::default().validate().is_err());
        assert!(TextBlobConfig::default().validate().is_err());
        let pihole = PiholeConfig {
            url: "localhost/admin".into(),
            ..Default::default()
        };
        assert!(pihole.validate().is_err());
        let opensearch = OpenSearchConfig {
            password: Some("hunter2".into()),
            ..Default::default()
        };
        assert!(opensearch.validate().is_err());
        let text_blob = TextBlobConfig {
            blobs: BTreeMap::from([("uptime".to_string(), "uptime".to_string())]),
            blob_envs: BTreeMap::from([("dmesg".to_string(), BTreeMap::new())]),
            ..Default::default()
        };
        assert!(text_blob.validate().is_err());
    }

    #[test]
    fn test_occ_command_run_as() {
        let config = NextcloudConfig {
            run_as: Some("www-data".into()),
            ..Default::default()
        };
        let (program, args) = config.occ_command();
        assert_eq!("sudo", program);
        assert_eq!(vec!["-u", "www-data", "php", "/var/www/nextcloud/occ"], args);
        assert_eq!("php", NextcloudConfig::default().occ_command().0);
    }
}
