//! Connector core for the Shadow Daemon web application firewall.
//!
//! A connector sits in front of a request handler. For every request it
//! captures the user input, sends it signed to the shadowd daemon, and acts
//! on the verdict: continue, neutralize the flagged fields, or abort.
//!
//! - **Paths**: every input field is addressed as `CATEGORY|key[|index]`
//!   with `|` and `\` escaped inside keys
//! - **Transport**: one TCP (optionally TLS) exchange per request, framed as
//!   profile, HMAC-SHA256 signature and JSON payload
//! - **Modes**: `observe` never enforces and fails open, `debug` appends
//!   non-clean outcomes to a log file
//!
//! # Core Types
//!
//! - [`Connector`]: runs the full protection sequence for one request
//! - [`FrameworkAdapter`](web::FrameworkAdapter): what a framework binding provides
//! - [`RequestSnapshot`]: the input sent to the daemon
//! - [`Verdict`]: the daemon's decoded answer
//! - [`Secret<T>`]: wrapper that redacts the shared key in logs
//!
//! # Examples
//!
//! ```
//! use shadowd_connector::{escape_key, Category, FieldPath, SnapshotBuilder};
//!
//! let mut builder = SnapshotBuilder::new();
//! builder.add_field(Category::Get, "ids", ["1", "2"]);
//! builder.add_cookie("session|id", "abc");
//! let input = builder.build();
//!
//! assert_eq!(input.get("GET|ids|0"), Some("1"));
//! assert_eq!(input.get("COOKIE|session\\|id"), Some("abc"));
//!
//! let path: FieldPath = "GET|ids|1".parse().unwrap();
//! assert_eq!(path.key, "ids");
//! assert_eq!(path.index, Some(1));
//! assert_eq!(escape_key("a|b"), "a\\|b");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connector;
mod error;
mod ignore;
mod logging;
mod path;
mod protocol;
mod remediation;
mod secret;
mod sink;
mod snapshot;
mod verdict;

pub mod web;

pub use config::{
    Config, ConfigLocation, CONFIG_FILE_ENV, CONFIG_SECTION_ENV, DEFAULT_CALLER_KEY,
    DEFAULT_CLIENT_IP_KEY, DEFAULT_CONFIG_FILE, DEFAULT_HOST, DEFAULT_LOG_FILE, DEFAULT_PORT,
    DEFAULT_SECTION,
};
pub use connector::{Connector, Outcome, Resolution};
pub use error::{ConfigError, DefuseError, Error, TransportError};
pub use ignore::{IgnoreEffect, IgnoreList, IgnoreRule};
pub use logging::RequestLog;
pub use path::{
    escape_key, split_path, unescape_key, Category, FieldPath, PathError, DELIMITER, ESCAPE,
};
pub use protocol::{
    compose, frame, parse_response, sign, tls_config, Connection, Endpoint, CONNECTOR_VERSION,
};
pub use remediation::{decide, Action};
pub use secret::Secret;
pub use sink::{format_entry, FileLog, LogSink, MemoryLog, NullLog, SinkError, TIMESTAMP_FORMAT};
pub use snapshot::{
    source_hashes, InputMap, RequestSnapshot, SnapshotBuilder, HEADER_PREFIX, RAW_BODY_KEY,
};
pub use verdict::{
    Verdict, STATUS_ATTACK, STATUS_BAD_JSON, STATUS_BAD_REQUEST, STATUS_BAD_SIGNATURE,
    STATUS_CRITICAL_ATTACK, STATUS_OK,
};
