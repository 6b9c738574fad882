//! Signed exchange with the analysis daemon.
//!
//! One exchange per request over a fresh connection:
//!
//! ```text
//! connector                                   shadowd
//!   | <profile>\n<hex hmac-sha256>\n<json>\n     |
//!   | ----------------------------------------> |
//!   |        {"status": n, "threats": [...]}     |
//!   | <---------------------------------------- |
//!   |                 (close)                    |
//! ```
//!
//! The signature covers the exact JSON bytes that are sent. The response is
//! read until the daemon closes the connection.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ring::hmac;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::TransportError;
use crate::secret::Secret;
use crate::snapshot::{InputMap, RequestSnapshot};
use crate::verdict::Verdict;

/// Protocol and connector version reported in every payload.
pub const CONNECTOR_VERSION: &str = "2.0.1-rust";

#[derive(Serialize)]
struct Payload<'a> {
    version: &'static str,
    client_ip: &'a str,
    caller: &'a str,
    resource: &'a str,
    input: &'a InputMap,
    hashes: &'a BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct Response {
    status: i64,
    #[serde(default)]
    threats: Option<Vec<String>>,
}

/// Serializes a snapshot into the JSON payload.
///
/// # Errors
///
/// Returns `TransportError::Encode` if serialization fails.
pub fn compose(snapshot: &RequestSnapshot) -> Result<String, TransportError> {
    let payload = Payload {
        version: CONNECTOR_VERSION,
        client_ip: &snapshot.client_ip,
        caller: &snapshot.caller,
        resource: &snapshot.resource,
        input: &snapshot.input,
        hashes: &snapshot.hashes,
    };
    serde_json::to_string(&payload).map_err(TransportError::Encode)
}

/// Signs payload bytes with the profile key.
///
/// Returns the HMAC-SHA256 as lowercase hex.
///
/// # Examples
///
/// ```
/// use shadowd_connector::{sign, Secret};
///
/// let key = Secret::new("key".to_string());
/// let signature = sign(&key, b"The quick brown fox jumps over the lazy dog");
/// assert_eq!(
///     signature,
///     "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
/// );
/// ```
pub fn sign(key: &Secret<String>, payload: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key.expose_secret().as_bytes());
    hex::encode(hmac::sign(&key, payload).as_ref())
}

/// Builds the request frame.
pub fn frame(profile: &str, signature: &str, payload: &str) -> String {
    format!("{}\n{}\n{}\n", profile, signature, payload)
}

/// Decodes the daemon's response document.
///
/// # Errors
///
/// Returns `TransportError::MalformedResponse` if the response is not JSON,
/// lacks `status`, or reports an attack without `threats`.
pub fn parse_response(raw: &[u8]) -> Result<Verdict, TransportError> {
    let response: Response = serde_json::from_slice(raw)
        .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;

    Verdict::from_status(response.status, response.threats).ok_or_else(|| {
        TransportError::MalformedResponse("attack status without threats".to_string())
    })
}

/// Connection settings for the daemon.
///
/// The TLS client configuration is built once, when the endpoint is
/// created, and shared by every connection made through it.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Daemon host
    pub host: String,
    /// Daemon port
    pub port: u16,
    /// TLS client configuration; plain TCP when unset
    pub tls: Option<Arc<ClientConfig>>,
    /// Upper bound for establishing the TCP connection
    pub connect_timeout: Option<Duration>,
    /// Upper bound for each socket read and write
    pub io_timeout: Option<Duration>,
}

impl Endpoint {
    /// Plain TCP endpoint without timeouts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    /// Endpoint described by a connector configuration.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Tls` if `ssl` names an unusable CA bundle.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let tls = config.ssl.as_deref().map(tls_config).transpose()?;
        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            tls,
            connect_timeout: config.connect_timeout,
            io_timeout: config.read_timeout,
        })
    }

    fn connect_tcp(&self) -> Result<TcpStream, TransportError> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| self.resolve_error())?
            .collect();

        let mut last_error = None;
        for addr in addrs {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(self.io_timeout)?;
                    stream.set_write_timeout(self.io_timeout)?;
                    return Ok(stream);
                }
                Err(err) => {
                    tracing::debug!(%addr, error = %err, "shadowd connect attempt failed");
                    last_error = Some((addr, err));
                }
            }
        }

        match last_error {
            Some((_, err)) if err.kind() == io::ErrorKind::TimedOut => {
                Err(TransportError::Timeout(err))
            }
            Some((addr, source)) => Err(TransportError::Connect {
                addr: addr.to_string(),
                source,
            }),
            None => Err(self.resolve_error()),
        }
    }

    fn resolve_error(&self) -> TransportError {
        TransportError::Resolve {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

/// Loads a PEM CA bundle into a TLS client configuration.
///
/// # Errors
///
/// Returns `TransportError::Tls` if the bundle is unreadable or holds no
/// usable certificate.
pub fn tls_config(ca_bundle: &Path) -> Result<Arc<ClientConfig>, TransportError> {
    let pem = fs::read(ca_bundle).map_err(|e| {
        TransportError::Tls(format!("could not read {}: {}", ca_bundle.display(), e))
    })?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(TransportError::Tls(format!(
            "no certificates found in {}",
            ca_bundle.display()
        )));
    }

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| TransportError::Tls(format!("failed to add CA certificate: {e}")))?;
    }

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| TransportError::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Signs, sends and evaluates one snapshot.
#[derive(Debug)]
pub struct Connection<'a> {
    endpoint: &'a Endpoint,
    profile: &'a str,
    key: &'a Secret<String>,
}

impl<'a> Connection<'a> {
    /// Prepares an exchange; nothing is opened yet.
    pub fn new(endpoint: &'a Endpoint, profile: &'a str, key: &'a Secret<String>) -> Self {
        Self {
            endpoint,
            profile,
            key,
        }
    }

    /// Performs the exchange and returns the daemon's verdict.
    ///
    /// Failure verdicts (bad request, bad signature, bad JSON, unknown
    /// status) are returned as verdicts too; deciding what they mean is up
    /// to the caller. Nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` on resolution, connection, TLS or socket
    /// failures and on responses that do not decode.
    pub fn send(&self, snapshot: &RequestSnapshot) -> Result<Verdict, TransportError> {
        let payload = compose(snapshot)?;
        let signature = sign(self.key, payload.as_bytes());
        let request = frame(self.profile, &signature, &payload);

        let raw = self.exchange(request.as_bytes())?;
        tracing::debug!(bytes = raw.len(), "shadowd response received");
        parse_response(&raw)
    }

    fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let tcp = self.endpoint.connect_tcp()?;

        match &self.endpoint.tls {
            Some(config) => {
                let server_name = ServerName::try_from(self.endpoint.host.clone())
                    .map_err(|e| TransportError::Tls(format!("invalid server name: {e}")))?;
                let session = ClientConnection::new(Arc::clone(config), server_name)
                    .map_err(|e| TransportError::Tls(e.to_string()))?;
                let mut stream = StreamOwned::new(session, tcp);
                round_trip(&mut stream, request).map_err(tls_io_error)
            }
            None => {
                let mut stream = tcp;
                round_trip(&mut stream, request).map_err(TransportError::from)
            }
        }
    }
}

/// Writes the request and reads until the peer closes.
fn round_trip<S: Read + Write>(stream: &mut S, request: &[u8]) -> io::Result<Vec<u8>> {
    stream.write_all(request)?;
    stream.flush()?;

    let mut response = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&chunk[..n]),
            // Peer closed without close_notify after sending its answer.
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof && !response.is_empty() => {
                break
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(response)
}

/// rustls reports handshake and certificate failures as `InvalidData`.
fn tls_io_error(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::InvalidData => TransportError::Tls(err.to_string()),
        _ => TransportError::from(err),
    }
}
