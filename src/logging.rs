use std::fmt;

/// Request-scoped structured logging.
///
/// `RequestLog` borrows the identity of the request being protected and
/// attaches it to every `tracing` event, so diagnostics from one request can
/// be correlated without threading fields through each call site.
///
/// Input values are never passed to the logger, only paths and counts.
#[derive(Debug, Clone, Copy)]
pub struct RequestLog<'a> {
    caller: &'a str,
    client_ip: &'a str,
}

impl<'a> RequestLog<'a> {
    /// Creates a logger for one request.
    pub fn new(caller: &'a str, client_ip: &'a str) -> Self {
        Self { caller, client_ip }
    }

    /// Returns the caller this logger is bound to.
    pub fn caller(&self) -> &str {
        self.caller
    }

    /// Returns the client address this logger is bound to.
    pub fn client_ip(&self) -> &str {
        self.client_ip
    }

    /// Logs a debug-level message.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(caller = %self.caller, client_ip = %self.client_ip, "{}", args);
    }

    /// Logs an info-level message.
    pub fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(caller = %self.caller, client_ip = %self.client_ip, "{}", args);
    }

    /// Logs a warning-level message.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(caller = %self.caller, client_ip = %self.client_ip, "{}", args);
    }

    /// Logs an error-level message.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        tracing::error!(caller = %self.caller, client_ip = %self.client_ip, "{}", args);
    }
}
