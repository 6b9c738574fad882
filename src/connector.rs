//! End-to-end protection of one request.
//!
//! The connector captures a snapshot through the framework adapter, drops
//! ignored fields, asks the daemon for a verdict and carries out the
//! resulting action. Every error is caught here: with `observe` the request
//! goes through unmodified (fail open), otherwise the adapter's error
//! response is returned (fail closed). With `debug` every non-clean outcome
//! is appended to the debug log.

use std::collections::BTreeSet;
use std::error::Error as StdError;

use crate::config::Config;
use crate::error::{ConfigError, DefuseError, Error, TransportError};
use crate::ignore::{IgnoreEffect, IgnoreList};
use crate::logging::RequestLog;
use crate::protocol::{Connection, Endpoint};
use crate::remediation::{decide, Action};
use crate::sink::{FileLog, LogSink};
use crate::verdict::Verdict;
use crate::web::FrameworkAdapter;

/// How a request that is allowed to continue was handled.
#[derive(Debug)]
pub enum Resolution {
    /// The daemon found nothing.
    Clean,
    /// The listed paths were neutralized in place.
    Defused(BTreeSet<String>),
    /// A verdict was reported but not enforced (observe mode).
    Observed(Verdict),
    /// Protection failed and observe mode let the request through.
    FailedOpen(Error),
}

/// Final decision for a request.
#[derive(Debug)]
pub enum Outcome<R> {
    /// Run the handler with the (possibly defused) request.
    Continue(Resolution),
    /// Return this response instead of running the handler.
    Abort(R),
}

impl<R> Outcome<R> {
    /// Returns `true` if the request must not reach the handler.
    pub fn is_abort(&self) -> bool {
        matches!(self, Outcome::Abort(_))
    }

    /// Returns the resolution of a continuing request.
    pub fn resolution(&self) -> Option<&Resolution> {
        match self {
            Outcome::Continue(resolution) => Some(resolution),
            Outcome::Abort(_) => None,
        }
    }
}

enum Step {
    Continue(Resolution),
    Block,
}

/// Protects requests according to one configuration.
///
/// A `Connector` is built once per process and shared read-only between
/// requests; each call to [`Connector::start`] is independent and opens its
/// own connection, files and log handles.
///
/// # Examples
///
/// ```no_run
/// use shadowd_connector::web::RequestContext;
/// use shadowd_connector::{Connector, Outcome};
///
/// let connector = Connector::from_env().expect("connector config");
///
/// let mut request = RequestContext::with_config(connector.config());
/// request.set_env("REMOTE_ADDR", "10.0.0.1");
/// request.add_arg("q", "search term");
///
/// match connector.start(&mut request) {
///     Outcome::Continue(_) => { /* run the handler with `request` */ }
///     Outcome::Abort(response) => { /* send `response` */ }
/// }
/// ```
#[derive(Debug)]
pub struct Connector {
    config: Config,
    // An unusable CA bundle fails every request, subject to `observe`.
    endpoint: Result<Endpoint, String>,
}

impl Connector {
    /// Creates a connector for a loaded configuration.
    ///
    /// The TLS client configuration is built here, once. If the CA bundle
    /// is unusable, every request fails with `TransportError::Tls` and is
    /// handled like any other transport failure.
    pub fn new(config: Config) -> Self {
        let endpoint = Endpoint::from_config(&config).map_err(|e| {
            tracing::error!(error = %e, "shadowd endpoint unusable");
            match e {
                TransportError::Tls(message) => message,
                other => other.to_string(),
            }
        });
        Self { config, endpoint }
    }

    /// Loads the configuration named by the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is unusable. There is no
    /// observe mode to fall back on at this point, so callers should treat
    /// this as a startup failure.
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::from_env().map(Self::new)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Protects one request, writing debug entries to the configured file.
    pub fn start<A: FrameworkAdapter>(&self, adapter: &mut A) -> Outcome<A::ErrorResponse> {
        self.start_with_sink(adapter, &FileLog::new(&self.config.log))
    }

    /// Protects one request, writing debug entries to `sink`.
    pub fn start_with_sink<A, S>(&self, adapter: &mut A, sink: &S) -> Outcome<A::ErrorResponse>
    where
        A: FrameworkAdapter,
        S: LogSink + ?Sized,
    {
        let caller = adapter.caller();
        let client_ip = adapter.client_ip();
        let log = RequestLog::new(&caller, &client_ip);

        match self.protect(adapter, &log, sink) {
            Ok(Step::Continue(resolution)) => Outcome::Continue(resolution),
            Ok(Step::Block) => Outcome::Abort(adapter.error()),
            Err(err) => {
                log.error(format_args!("shadowd connector failed: {}", err));
                self.debug_entry(sink, &format!("shadowd: {}", error_chain(&err)));

                if self.config.observe {
                    Outcome::Continue(Resolution::FailedOpen(err))
                } else {
                    Outcome::Abort(adapter.error())
                }
            }
        }
    }

    fn protect<A, S>(&self, adapter: &mut A, log: &RequestLog<'_>, sink: &S) -> Result<Step, Error>
    where
        A: FrameworkAdapter,
        S: LogSink + ?Sized,
    {
        let mut snapshot = adapter.snapshot();

        if let Some(path) = &self.config.ignore {
            let ignored = IgnoreList::load(path)?;
            match ignored.apply(log.caller(), &mut snapshot.input) {
                IgnoreEffect::Cleared => log.debug(format_args!("all input ignored for caller")),
                IgnoreEffect::Removed(count) => {
                    log.debug(format_args!("{} ignored field(s) removed", count))
                }
                IgnoreEffect::Untouched => {}
            }
        }

        let endpoint = self
            .endpoint
            .as_ref()
            .map_err(|message| TransportError::Tls(message.clone()))?;
        let connection = Connection::new(endpoint, &self.config.profile, &self.config.key);
        let verdict = connection.send(&snapshot)?;
        log.debug(format_args!(
            "shadowd verdict: {} for {} field(s)",
            verdict,
            snapshot.input.len()
        ));

        match decide(verdict, self.config.observe) {
            Action::Continue => {
                log.info(format_args!("request clean"));
                Ok(Step::Continue(Resolution::Clean))
            }
            Action::Defuse(threats) => {
                if !adapter.defuse_input(&threats) {
                    return Err(DefuseError::Unremediable { threats }.into());
                }
                log.warn(format_args!("removed {} threat(s)", threats.len()));
                self.debug_entry(
                    sink,
                    &format!("shadowd: removed threat from client: {}", log.client_ip()),
                );
                Ok(Step::Continue(Resolution::Defused(threats)))
            }
            Action::Abort => {
                log.warn(format_args!("critical attack, aborting request"));
                self.debug_entry(
                    sink,
                    &format!("shadowd: stopped critical attack from client: {}", log.client_ip()),
                );
                Ok(Step::Block)
            }
            Action::Report(verdict) => {
                log.warn(format_args!("observed {}", verdict));
                self.debug_entry(
                    sink,
                    &format!("shadowd: observed {} from client: {}", verdict, log.client_ip()),
                );
                Ok(Step::Continue(Resolution::Observed(verdict)))
            }
            Action::Fail(verdict) => Err(TransportError::Rejected(verdict).into()),
        }
    }

    fn debug_entry<S: LogSink + ?Sized>(&self, sink: &S, message: &str) {
        if !self.config.debug {
            return;
        }
        if let Err(e) = sink.append(message) {
            tracing::warn!(error = %e, "could not write shadowd debug log");
        }
    }
}

/// Renders an error followed by its sources.
fn error_chain(err: &Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}
