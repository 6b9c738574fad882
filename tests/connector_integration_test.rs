//! End-to-end tests against a fake shadowd listening on loopback.
//!
//! Each test starts a one-shot daemon that records the frame it receives
//! and answers with a canned response, then drives a `RequestContext`
//! through the connector.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use shadowd_connector::web::{ErrorResponse, RequestContext, ERROR_BODY, ERROR_STATUS};
use shadowd_connector::{
    sign, Config, ConfigError, Connector, Error, MemoryLog, Outcome, Resolution, Secret,
    TransportError, Verdict, CONNECTOR_VERSION,
};

struct FakeDaemon {
    port: u16,
    handle: JoinHandle<Vec<String>>,
}

impl FakeDaemon {
    /// Accepts one connection, reads the three frame lines and answers.
    fn spawn(response: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut lines = Vec::new();
            for _ in 0..3 {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                lines.push(line.trim_end_matches('\n').to_string());
            }

            stream.write_all(response.as_bytes()).unwrap();
            lines
        });

        Self { port, handle }
    }

    /// Waits for the exchange and returns `[profile, signature, payload]`.
    fn frame(self) -> Vec<String> {
        self.handle.join().unwrap()
    }
}

/// Accepts one connection, reads the frame and never answers.
///
/// The thread ends once the connector gives up and closes the socket.
fn spawn_hung_daemon() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut sink = Vec::new();
        let _ = BufReader::new(stream).read_to_end(&mut sink);
    });

    (port, handle)
}

fn config(port: u16) -> Config {
    let mut config = Config::new("7", "secret");
    config.port = port;
    config
}

fn request() -> RequestContext {
    let mut request = RequestContext::new();
    request.set_env("REMOTE_ADDR", "10.0.0.1");
    request.set_env("PATH_INFO", "/index");
    request.set_env("REQUEST_URI", "/index?foo=bar");
    request.set_env("HTTP_USER_AGENT", "test");
    request.add_arg("foo", "bar");
    request.add_form("ids", "1");
    request.add_form("ids", "2");
    request
}

fn error_response() -> ErrorResponse {
    ErrorResponse {
        status: ERROR_STATUS,
        body: ERROR_BODY.to_string(),
    }
}

#[test]
fn clean_request_sends_signed_frame() {
    let daemon = FakeDaemon::spawn(r#"{"status": 1}"#);
    let connector = Connector::new(config(daemon.port));
    let mut request = request();

    let outcome = connector.start_with_sink(&mut request, &MemoryLog::new());
    assert!(matches!(outcome, Outcome::Continue(Resolution::Clean)));

    let frame = daemon.frame();
    assert_eq!(frame[0], "7");
    assert_eq!(
        frame[1],
        sign(&Secret::new("secret".to_string()), frame[2].as_bytes())
    );

    let payload: serde_json::Value = serde_json::from_str(&frame[2]).unwrap();
    assert_eq!(payload["version"], CONNECTOR_VERSION);
    assert_eq!(payload["client_ip"], "10.0.0.1");
    assert_eq!(payload["caller"], "/index");
    assert_eq!(payload["resource"], "/index?foo=bar");
    assert_eq!(payload["input"]["GET|foo"], "bar");
    assert_eq!(payload["input"]["POST|ids|0"], "1");
    assert_eq!(payload["input"]["POST|ids|1"], "2");
    assert_eq!(payload["input"]["SERVER|HTTP_USER_AGENT"], "test");
    assert!(payload["input"].get("SERVER|REMOTE_ADDR").is_none());
    assert_eq!(payload["hashes"], serde_json::json!({}));

    // Field order on the wire follows the category order.
    let get = frame[2].find("GET|foo").unwrap();
    let post = frame[2].find("POST|ids|0").unwrap();
    let server = frame[2].find("SERVER|HTTP_USER_AGENT").unwrap();
    assert!(get < post && post < server);
}

#[test]
fn attack_is_defused_and_logged() {
    let daemon = FakeDaemon::spawn(r#"{"status": 5, "threats": ["GET|foo", "POST|ids|1"]}"#);
    let mut config = config(daemon.port);
    config.debug = true;
    let connector = Connector::new(config);
    let log = MemoryLog::new();
    let mut request = request();

    let outcome = connector.start_with_sink(&mut request, &log);

    let Outcome::Continue(Resolution::Defused(threats)) = outcome else {
        panic!("expected defused request");
    };
    assert_eq!(threats.len(), 2);
    assert_eq!(request.arg("foo"), Some(""));
    assert_eq!(request.form_values("ids"), ["1", ""]);
    assert_eq!(
        log.entries(),
        ["shadowd: removed threat from client: 10.0.0.1"]
    );
    daemon.frame();
}

#[test]
fn attack_is_only_reported_when_observing() {
    let daemon = FakeDaemon::spawn(r#"{"status": 5, "threats": ["GET|foo"]}"#);
    let mut config = config(daemon.port);
    config.observe = true;
    let connector = Connector::new(config);
    let mut request = request();

    let outcome = connector.start_with_sink(&mut request, &MemoryLog::new());

    assert!(matches!(
        outcome,
        Outcome::Continue(Resolution::Observed(Verdict::Attack { .. }))
    ));
    assert_eq!(request.arg("foo"), Some("bar"));
    daemon.frame();
}

#[test]
fn critical_attack_aborts_untouched() {
    let daemon = FakeDaemon::spawn(r#"{"status": 6}"#);
    let mut config = config(daemon.port);
    config.debug = true;
    let connector = Connector::new(config);
    let log = MemoryLog::new();
    let mut request = request();

    let outcome = connector.start_with_sink(&mut request, &log);

    let Outcome::Abort(response) = outcome else {
        panic!("expected abort");
    };
    assert_eq!(response, error_response());
    assert_eq!(request.arg("foo"), Some("bar"));
    assert_eq!(
        log.entries(),
        ["shadowd: stopped critical attack from client: 10.0.0.1"]
    );
    daemon.frame();
}

#[test]
fn critical_attack_passes_when_observing() {
    let daemon = FakeDaemon::spawn(r#"{"status": 6}"#);
    let mut config = config(daemon.port);
    config.observe = true;
    let connector = Connector::new(config);

    let outcome = connector.start_with_sink(&mut request(), &MemoryLog::new());

    assert!(matches!(
        outcome,
        Outcome::Continue(Resolution::Observed(Verdict::CriticalAttack))
    ));
    daemon.frame();
}

#[test]
fn file_threat_aborts_without_partial_defuse() {
    let daemon = FakeDaemon::spawn(r#"{"status": 5, "threats": ["GET|foo", "FILES|upload"]}"#);
    let mut config = config(daemon.port);
    config.debug = true;
    let connector = Connector::new(config);
    let log = MemoryLog::new();
    let mut request = request();
    request.add_file("upload", "shell.php");

    let outcome = connector.start_with_sink(&mut request, &log);

    assert!(outcome.is_abort());
    assert_eq!(request.arg("foo"), Some("bar"));
    let entries = log.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains("cannot be removed safely"));

    let frame = daemon.frame();
    let payload: serde_json::Value = serde_json::from_str(&frame[2]).unwrap();
    assert_eq!(payload["input"]["FILES|upload"], "shell.php");
}

#[test]
fn bad_signature_fails_closed() {
    let daemon = FakeDaemon::spawn(r#"{"status": 3}"#);
    let connector = Connector::new(config(daemon.port));

    let outcome = connector.start_with_sink(&mut request(), &MemoryLog::new());

    assert!(outcome.is_abort());
    daemon.frame();
}

#[test]
fn bad_signature_fails_open_when_observing() {
    let daemon = FakeDaemon::spawn(r#"{"status": 3}"#);
    let mut config = config(daemon.port);
    config.observe = true;
    let connector = Connector::new(config);

    let outcome = connector.start_with_sink(&mut request(), &MemoryLog::new());

    assert!(matches!(
        outcome,
        Outcome::Continue(Resolution::FailedOpen(Error::Transport(
            TransportError::Rejected(Verdict::BadSignature)
        )))
    ));
    daemon.frame();
}

#[test]
fn malformed_response_fails_closed() {
    let daemon = FakeDaemon::spawn("not json");
    let connector = Connector::new(config(daemon.port));

    let outcome = connector.start_with_sink(&mut request(), &MemoryLog::new());

    assert!(outcome.is_abort());
    daemon.frame();
}

#[test]
fn attack_without_threats_is_malformed() {
    let daemon = FakeDaemon::spawn(r#"{"status": 5}"#);
    let mut config = config(daemon.port);
    config.observe = true;
    let connector = Connector::new(config);

    let outcome = connector.start_with_sink(&mut request(), &MemoryLog::new());

    assert!(matches!(
        outcome,
        Outcome::Continue(Resolution::FailedOpen(Error::Transport(
            TransportError::MalformedResponse(_)
        )))
    ));
    daemon.frame();
}

#[test]
fn ignored_fields_are_not_sent() {
    let dir = tempfile::tempdir().unwrap();
    let ignore = dir.path().join("ignore.json");
    std::fs::write(
        &ignore,
        r#"[{"caller": "/index", "path": "GET|foo"}, {"path": "POST|ids|1"}]"#,
    )
    .unwrap();

    let daemon = FakeDaemon::spawn(r#"{"status": 1}"#);
    let mut config = config(daemon.port);
    config.ignore = Some(ignore);
    let connector = Connector::new(config);
    let mut request = request();

    let outcome = connector.start_with_sink(&mut request, &MemoryLog::new());
    assert!(!outcome.is_abort());

    let frame = daemon.frame();
    let payload: serde_json::Value = serde_json::from_str(&frame[2]).unwrap();
    let input = payload["input"].as_object().unwrap();
    assert!(!input.contains_key("GET|foo"));
    assert!(!input.contains_key("POST|ids|1"));
    assert!(input.contains_key("POST|ids|0"));

    // Ignoring only affects what is sent, never the request itself.
    assert_eq!(request.arg("foo"), Some("bar"));
}

#[test]
fn ignored_caller_sends_empty_input() {
    let dir = tempfile::tempdir().unwrap();
    let ignore = dir.path().join("ignore.json");
    std::fs::write(&ignore, r#"[{"caller": "/index"}]"#).unwrap();

    let daemon = FakeDaemon::spawn(r#"{"status": 1}"#);
    let mut config = config(daemon.port);
    config.ignore = Some(ignore);
    let connector = Connector::new(config);

    connector.start_with_sink(&mut request(), &MemoryLog::new());

    let frame = daemon.frame();
    let payload: serde_json::Value = serde_json::from_str(&frame[2]).unwrap();
    assert_eq!(payload["input"], serde_json::json!({}));
}

#[test]
fn broken_ignore_file_fails_before_sending() {
    let dir = tempfile::tempdir().unwrap();
    let ignore = dir.path().join("ignore.json");
    std::fs::write(&ignore, "{not a list").unwrap();

    let mut config = Config::new("7", "secret");
    config.observe = true;
    config.ignore = Some(ignore);
    let connector = Connector::new(config);

    let outcome = connector.start_with_sink(&mut request(), &MemoryLog::new());

    assert!(matches!(
        outcome,
        Outcome::Continue(Resolution::FailedOpen(Error::Config(
            ConfigError::IgnoreParse { .. }
        )))
    ));
}

#[test]
fn handler_source_is_hashed() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("handler.py");
    std::fs::write(&source, "abc").unwrap();

    let daemon = FakeDaemon::spawn(r#"{"status": 1}"#);
    let connector = Connector::new(config(daemon.port));
    let mut request = request();
    request.set_source(&source);

    connector.start_with_sink(&mut request, &MemoryLog::new());

    let frame = daemon.frame();
    let payload: serde_json::Value = serde_json::from_str(&frame[2]).unwrap();
    assert_eq!(
        payload["hashes"]["sha256"],
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn debug_entries_reach_the_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let log_file = dir.path().join("shadowd.log");

    let daemon = FakeDaemon::spawn(r#"{"status": 6}"#);
    let mut config = config(daemon.port);
    config.debug = true;
    config.log = log_file.clone();
    let connector = Connector::new(config);

    assert!(connector.start(&mut request()).is_abort());
    daemon.frame();

    let content = std::fs::read_to_string(&log_file).unwrap();
    let line = content.lines().next().unwrap();
    let (timestamp, message) = line.split_once('\t').unwrap();
    assert_eq!(timestamp.len(), "2026-01-01 00:00:00".len());
    assert_eq!(message, "shadowd: stopped critical attack from client: 10.0.0.1");
}

#[test]
fn hung_daemon_times_out_and_fails_open_when_observing() {
    let (port, daemon) = spawn_hung_daemon();
    let mut config = config(port);
    config.observe = true;
    config.read_timeout = Some(Duration::from_millis(200));
    let connector = Connector::new(config);
    let mut request = request();

    let started = Instant::now();
    let outcome = connector.start_with_sink(&mut request, &MemoryLog::new());

    assert!(matches!(
        outcome,
        Outcome::Continue(Resolution::FailedOpen(Error::Transport(
            TransportError::Timeout(_)
        )))
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(request.arg("foo"), Some("bar"));
    daemon.join().unwrap();
}

#[test]
fn hung_daemon_times_out_and_fails_closed() {
    let (port, daemon) = spawn_hung_daemon();
    let mut config = config(port);
    config.debug = true;
    config.read_timeout = Some(Duration::from_millis(200));
    let connector = Connector::new(config);
    let log = MemoryLog::new();

    let outcome = connector.start_with_sink(&mut request(), &log);

    let Outcome::Abort(response) = outcome else {
        panic!("expected abort");
    };
    assert_eq!(response, error_response());
    let entries = log.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with("shadowd: timed out talking to shadowd"));
    daemon.join().unwrap();
}

#[test]
fn attack_without_threats_is_clean() {
    let daemon = FakeDaemon::spawn(r#"{"status": 5, "threats": []}"#);
    let mut config = config(daemon.port);
    config.debug = true;
    let connector = Connector::new(config);
    let log = MemoryLog::new();
    let mut request = request();

    let outcome = connector.start_with_sink(&mut request, &log);

    assert!(matches!(outcome, Outcome::Continue(Resolution::Clean)));
    assert_eq!(request.arg("foo"), Some("bar"));
    assert!(log.is_empty());
    daemon.frame();
}
