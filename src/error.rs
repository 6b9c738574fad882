use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;

use crate::verdict::Verdict;

/// Errors that can occur while protecting a request.
///
/// Every variant is caught at the connector boundary, where the configured
/// observe mode decides whether the request is aborted or let through.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration or ignore file problem
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Exchange with the daemon failed
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A threat could not be neutralized in place
    #[error(transparent)]
    Defuse(#[from] DefuseError),
}

/// Configuration could not be loaded or is incomplete.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("could not read config file {path}: {source}")]
    Read {
        /// File that was opened
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },
    /// The config file is not valid TOML or has wrongly typed values.
    #[error("could not parse config file {path}: {message}")]
    Parse {
        /// File that was parsed
        path: PathBuf,
        /// Parser message
        message: String,
    },
    /// The selected section does not exist.
    #[error("config section '{0}' missing")]
    MissingSection(String),
    /// A required key is absent.
    #[error("{0} in config missing")]
    MissingKey(&'static str),
    /// A key holds an unusable value.
    #[error("invalid value for '{key}': {message}")]
    Invalid {
        /// Offending key
        key: &'static str,
        /// What is wrong with it
        message: String,
    },
    /// The ignore file could not be read.
    #[error("could not open ignore file {path}: {source}")]
    IgnoreRead {
        /// File that was opened
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },
    /// The ignore file is not a JSON rule list.
    #[error("could not parse ignore file {path}: {message}")]
    IgnoreParse {
        /// File that was parsed
        path: PathBuf,
        /// Parser message
        message: String,
    },
}

/// The exchange with the daemon did not produce a usable verdict.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Host name did not resolve to any address.
    #[error("could not resolve {host}:{port}")]
    Resolve {
        /// Configured host
        host: String,
        /// Configured port
        port: u16,
    },
    /// TCP connection could not be established.
    #[error("could not connect to {addr}: {source}")]
    Connect {
        /// Address that was tried last
        addr: String,
        /// Underlying I/O error
        source: io::Error,
    },
    /// TLS setup or handshake failed.
    #[error("tls error: {0}")]
    Tls(String),
    /// Connect, read or write exceeded the configured timeout.
    #[error("timed out talking to shadowd: {0}")]
    Timeout(io::Error),
    /// Socket I/O failed mid-exchange.
    #[error("i/o error talking to shadowd: {0}")]
    Io(io::Error),
    /// The payload could not be serialized.
    #[error("could not encode payload: {0}")]
    Encode(serde_json::Error),
    /// The response is not a verdict document.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// The daemon answered with a failure status.
    #[error("shadowd rejected request: {0}")]
    Rejected(Verdict),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout(err),
            _ => TransportError::Io(err),
        }
    }
}

/// Defusal would leave the request only partially cleaned.
#[derive(Debug, thiserror::Error)]
pub enum DefuseError {
    /// At least one threat cannot be neutralized in place.
    #[error("{} threat(s) cannot be removed safely", threats.len())]
    Unremediable {
        /// Threats reported by the daemon
        threats: BTreeSet<String>,
    },
}
