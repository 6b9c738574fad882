//! Connector configuration.
//!
//! Configuration lives in a TOML file with one table per deployment, so a
//! single file can serve several applications:
//!
//! ```toml
//! [shadowd_rust]
//! profile = 1
//! key = "secret"
//! observe = false
//! ```
//!
//! The file and table can be redirected with the `SHADOWD_CONNECTOR_CONFIG`
//! and `SHADOWD_CONNECTOR_CONFIG_SECTION` environment variables. The
//! configuration is loaded once and only read afterwards.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::secret::Secret;

/// Default config file.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/shadowd/connectors.toml";
/// Default table inside the config file.
pub const DEFAULT_SECTION: &str = "shadowd_rust";
/// Environment variable overriding the config file.
pub const CONFIG_FILE_ENV: &str = "SHADOWD_CONNECTOR_CONFIG";
/// Environment variable overriding the table name.
pub const CONFIG_SECTION_ENV: &str = "SHADOWD_CONNECTOR_CONFIG_SECTION";

/// Default daemon host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default daemon port.
pub const DEFAULT_PORT: u16 = 9115;
/// Default debug log file.
pub const DEFAULT_LOG_FILE: &str = "/var/log/shadowd.log";
/// Default environment key holding the client address.
pub const DEFAULT_CLIENT_IP_KEY: &str = "REMOTE_ADDR";
/// Default environment key naming the executing handler.
pub const DEFAULT_CALLER_KEY: &str = "PATH_INFO";

/// Where to find the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocation {
    /// Config file path
    pub file: PathBuf,
    /// Table name inside the file
    pub section: String,
}

impl ConfigLocation {
    /// Resolves the location from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves the location through an arbitrary variable lookup.
    ///
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());

        Self {
            file: get(CONFIG_FILE_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
            section: get(CONFIG_SECTION_ENV).unwrap_or_else(|| DEFAULT_SECTION.to_string()),
        }
    }
}

impl Default for ConfigLocation {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_CONFIG_FILE),
            section: DEFAULT_SECTION.to_string(),
        }
    }
}

/// Profile identifiers may be written as number or string.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProfileValue {
    Number(i64),
    Text(String),
}

impl fmt::Display for ProfileValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileValue::Number(n) => write!(f, "{}", n),
            ProfileValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSection {
    host: Option<String>,
    port: Option<u16>,
    profile: Option<ProfileValue>,
    key: Option<Secret<String>>,
    ssl: Option<PathBuf>,
    #[serde(default)]
    observe: bool,
    #[serde(default)]
    debug: bool,
    ignore: Option<PathBuf>,
    log: Option<PathBuf>,
    client_ip: Option<String>,
    caller: Option<String>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
}

/// Validated connector configuration.
#[derive(Debug)]
pub struct Config {
    /// Daemon host
    pub host: String,
    /// Daemon port
    pub port: u16,
    /// Profile identifier sent as the first frame line
    pub profile: String,
    /// Shared HMAC key of the profile
    pub key: Secret<String>,
    /// CA bundle; enables TLS when set
    pub ssl: Option<PathBuf>,
    /// Log verdicts but never enforce them
    pub observe: bool,
    /// Append every non-clean outcome to the log file
    pub debug: bool,
    /// JSON ignore-rule file
    pub ignore: Option<PathBuf>,
    /// Debug log file
    pub log: PathBuf,
    /// Environment key holding the client address
    pub client_ip_key: String,
    /// Environment key naming the executing handler
    pub caller_key: String,
    /// Upper bound for establishing the TCP connection
    pub connect_timeout: Option<Duration>,
    /// Upper bound for each socket read and write
    pub read_timeout: Option<Duration>,
}

impl Config {
    /// Creates a configuration with defaults for every optional key.
    pub fn new(profile: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            profile: profile.into(),
            key: Secret::new(key.into()),
            ssl: None,
            observe: false,
            debug: false,
            ignore: None,
            log: PathBuf::from(DEFAULT_LOG_FILE),
            client_ip_key: DEFAULT_CLIENT_IP_KEY.to_string(),
            caller_key: DEFAULT_CALLER_KEY.to_string(),
            connect_timeout: None,
            read_timeout: None,
        }
    }

    /// Loads the configuration named by the process environment.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(&ConfigLocation::from_env())
    }

    /// Loads one section of a config file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, the
    /// section is missing, or `profile`/`key` are absent.
    pub fn load(location: &ConfigLocation) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&location.file).map_err(|source| ConfigError::Read {
            path: location.file.clone(),
            source,
        })?;
        Self::parse(&content, &location.section, &location.file)
    }

    /// Parses one section from TOML text.
    ///
    /// `origin` is only used in error messages.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn parse(content: &str, section: &str, origin: &Path) -> Result<Self, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            path: origin.to_path_buf(),
            message,
        };

        let mut document: toml::Table =
            toml::from_str(content).map_err(|e| parse_error(e.message().to_string()))?;
        let table = document
            .remove(section)
            .ok_or_else(|| ConfigError::MissingSection(section.to_string()))?;
        let raw: RawSection = table
            .try_into()
            .map_err(|e: toml::de::Error| parse_error(e.message().to_string()))?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSection) -> Result<Self, ConfigError> {
        let profile = raw.profile.ok_or(ConfigError::MissingKey("profile"))?;
        let key = raw.key.ok_or(ConfigError::MissingKey("key"))?;
        if key.expose_secret().is_empty() {
            return Err(ConfigError::Invalid {
                key: "key",
                message: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            host: raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: raw.port.unwrap_or(DEFAULT_PORT),
            profile: profile.to_string(),
            key,
            ssl: raw.ssl,
            observe: raw.observe,
            debug: raw.debug,
            ignore: raw.ignore,
            log: raw.log.unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            client_ip_key: raw
                .client_ip
                .unwrap_or_else(|| DEFAULT_CLIENT_IP_KEY.to_string()),
            caller_key: raw.caller.unwrap_or_else(|| DEFAULT_CALLER_KEY.to_string()),
            connect_timeout: timeout("connect_timeout_ms", raw.connect_timeout_ms)?,
            read_timeout: timeout("read_timeout_ms", raw.read_timeout_ms)?,
        })
    }
}

/// Sockets reject a zero timeout, so it is refused at load time.
fn timeout(key: &'static str, millis: Option<u64>) -> Result<Option<Duration>, ConfigError> {
    match millis {
        Some(0) => Err(ConfigError::Invalid {
            key,
            message: "must be greater than zero".to_string(),
        }),
        other => Ok(other.map(Duration::from_millis)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(content: &str) -> Result<Config, ConfigError> {
        Config::parse(content, DEFAULT_SECTION, Path::new("test.toml"))
    }

    #[test]
    fn minimal_section_uses_defaults() {
        let config = parse("[shadowd_rust]\nprofile = 1\nkey = \"k\"\n").unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9115);
        assert_eq!(config.profile, "1");
        assert_eq!(config.key.expose_secret(), "k");
        assert!(config.ssl.is_none());
        assert!(!config.observe);
        assert!(!config.debug);
        assert!(config.ignore.is_none());
        assert_eq!(config.log, PathBuf::from("/var/log/shadowd.log"));
        assert_eq!(config.client_ip_key, "REMOTE_ADDR");
        assert_eq!(config.caller_key, "PATH_INFO");
        assert!(config.connect_timeout.is_none());
        assert!(config.read_timeout.is_none());
    }

    #[test]
    fn full_section() {
        let config = parse(
            r#"
            [shadowd_rust]
            host = "shadowd.internal"
            port = 9200
            profile = "app-1"
            key = "k"
            ssl = "/etc/shadowd/ca.pem"
            observe = true
            debug = true
            ignore = "/etc/shadowd/ignore.json"
            log = "/tmp/shadowd.log"
            client_ip = "HTTP_X_FORWARDED_FOR"
            caller = "SCRIPT_FILENAME"
            connect_timeout_ms = 500
            read_timeout_ms = 2000
            "#,
        )
        .unwrap();

        assert_eq!(config.host, "shadowd.internal");
        assert_eq!(config.port, 9200);
        assert_eq!(config.profile, "app-1");
        assert_eq!(config.ssl, Some(PathBuf::from("/etc/shadowd/ca.pem")));
        assert!(config.observe);
        assert!(config.debug);
        assert_eq!(config.ignore, Some(PathBuf::from("/etc/shadowd/ignore.json")));
        assert_eq!(config.client_ip_key, "HTTP_X_FORWARDED_FOR");
        assert_eq!(config.caller_key, "SCRIPT_FILENAME");
        assert_eq!(config.connect_timeout, Some(Duration::from_millis(500)));
        assert_eq!(config.read_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn missing_profile_fails() {
        let err = parse("[shadowd_rust]\nkey = \"k\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("profile")));
    }

    #[test]
    fn missing_key_fails() {
        let err = parse("[shadowd_rust]\nprofile = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("key")));
    }

    #[test]
    fn empty_key_fails() {
        let err = parse("[shadowd_rust]\nprofile = 1\nkey = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "key", .. }));
    }

    #[test]
    fn zero_connect_timeout_fails() {
        let err = parse("[shadowd_rust]\nprofile = 1\nkey = \"k\"\nconnect_timeout_ms = 0\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "connect_timeout_ms",
                ..
            }
        ));
    }

    #[test]
    fn zero_read_timeout_fails() {
        let err = parse("[shadowd_rust]\nprofile = 1\nkey = \"k\"\nread_timeout_ms = 0\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "read_timeout_ms",
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "invalid value for 'read_timeout_ms': must be greater than zero"
        );
    }

    #[test]
    fn missing_section_fails() {
        let err = parse("[other]\nprofile = 1\nkey = \"k\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(s) if s == "shadowd_rust"));
    }

    #[test]
    fn wrong_type_fails() {
        let err = parse("[shadowd_rust]\nprofile = 1\nkey = \"k\"\nport = \"x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn invalid_toml_fails() {
        let err = parse("[shadowd_rust\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn key_is_redacted_in_debug_output() {
        let config = parse("[shadowd_rust]\nprofile = 1\nkey = \"topsecret\"\n").unwrap();
        let output = format!("{:?}", config);
        assert!(!output.contains("topsecret"));
        assert!(output.contains("[REDACTED]"));
    }

    #[test]
    fn location_defaults() {
        let location = ConfigLocation::from_lookup(|_| None);
        assert_eq!(location, ConfigLocation::default());
    }

    #[test]
    fn location_env_overrides() {
        let location = ConfigLocation::from_lookup(|name| match name {
            CONFIG_FILE_ENV => Some("/srv/app/shadowd.toml".to_string()),
            CONFIG_SECTION_ENV => Some("app".to_string()),
            _ => None,
        });
        assert_eq!(location.file, PathBuf::from("/srv/app/shadowd.toml"));
        assert_eq!(location.section, "app");
    }

    #[test]
    fn location_ignores_empty_values() {
        let location = ConfigLocation::from_lookup(|_| Some(String::new()));
        assert_eq!(location, ConfigLocation::default());
    }

    #[test]
    fn load_reads_named_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[first]\nprofile = 1\nkey = \"a\"\n").unwrap();
        writeln!(file, "[second]\nprofile = 2\nkey = \"b\"\nport = 1234").unwrap();

        let config = Config::load(&ConfigLocation {
            file: file.path().to_path_buf(),
            section: "second".to_string(),
        })
        .unwrap();

        assert_eq!(config.profile, "2");
        assert_eq!(config.port, 1234);
    }

    #[test]
    fn load_missing_file_fails() {
        let err = Config::load(&ConfigLocation {
            file: PathBuf::from("/nonexistent/connectors.toml"),
            section: DEFAULT_SECTION.to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
