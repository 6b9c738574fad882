//! Connector flow demonstration.
//!
//! This example runs a stand-in daemon on loopback and protects three
//! requests against it:
//! 1. A clean request that continues untouched
//! 2. An attack whose flagged field is defused
//! 3. A critical attack that is aborted
//!
//! Run with: `cargo run --example connector_flow`

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;

use shadowd_connector::web::RequestContext;
use shadowd_connector::{Config, Connector, MemoryLog, Outcome, Resolution};

/// Answers each connection with the next canned response.
fn spawn_daemon(responses: Vec<&'static str>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let port = listener.local_addr().expect("local address").port();

    thread::spawn(move || {
        for response in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut line = String::new();
            for _ in 0..3 {
                line.clear();
                if reader.read_line(&mut line).is_err() {
                    break;
                }
            }
            let _ = stream.write_all(response.as_bytes());
        }
    });

    port
}

fn search_request(query: &str) -> RequestContext {
    let mut request = RequestContext::new();
    request.set_env("REMOTE_ADDR", "192.0.2.10");
    request.set_env("PATH_INFO", "/search");
    request.set_env("REQUEST_URI", "/search");
    request.set_env("HTTP_USER_AGENT", "demo");
    request.add_arg("q", query);
    request
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    println!("=== Connector Flow Example ===\n");

    let port = spawn_daemon(vec![
        r#"{"status": 1}"#,
        r#"{"status": 5, "threats": ["GET|q"]}"#,
        r#"{"status": 6}"#,
    ]);

    let mut config = Config::new("1", "demo-key");
    config.port = port;
    config.debug = true;
    let connector = Connector::new(config);
    let debug_log = MemoryLog::new();

    let queries = ["rust books", "' OR 1=1 --", "<script>alert(1)</script>"];
    for (i, query) in queries.into_iter().enumerate() {
        println!("--- Request {}: q={:?} ---", i + 1, query);
        let mut request = search_request(query);

        match connector.start_with_sink(&mut request, &debug_log) {
            Outcome::Continue(Resolution::Clean) => {
                println!("✓ Clean, handler sees q={:?}", request.arg("q").unwrap_or_default());
            }
            Outcome::Continue(Resolution::Defused(threats)) => {
                println!("✓ Defused {:?}", threats);
                println!("  handler sees q={:?}", request.arg("q").unwrap_or_default());
            }
            Outcome::Continue(other) => println!("✓ Continued: {:?}", other),
            Outcome::Abort(response) => {
                println!("✗ Aborted with {} {}", response.status, response.body);
            }
        }
        println!();
    }

    println!("--- Debug log ---");
    for entry in debug_log.entries() {
        println!("{}", entry);
    }
}
