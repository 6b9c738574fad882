//! Framework-neutral request object.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use indexmap::IndexMap;

use crate::config::{Config, DEFAULT_CALLER_KEY, DEFAULT_CLIENT_IP_KEY};
use crate::path::{Category, FieldPath};
use crate::snapshot::{source_hashes, InputMap, SnapshotBuilder};

use super::FrameworkAdapter;

/// Field name to values, in arrival order.
pub type MultiDict = IndexMap<String, Vec<String>>;

/// Environment key holding the full request URI.
pub const REQUEST_URI_KEY: &str = "REQUEST_URI";

/// Status code of the abort response.
pub const ERROR_STATUS: u16 = 500;

/// Body of the abort response.
pub const ERROR_BODY: &str = "<h1>500 Internal Server Error</h1>";

/// Abort response produced by [`RequestContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// HTTP status code
    pub status: u16,
    /// HTML body
    pub body: String,
}

/// A mutable, owned request modelled after WSGI and CGI.
///
/// Framework bindings copy their native request into a `RequestContext`,
/// run the connector against it, and copy the (possibly defused) fields
/// back. All mutation happens on this value; nothing global is touched.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use shadowd_connector::web::{FrameworkAdapter, RequestContext};
///
/// let mut request = RequestContext::new();
/// request.set_env("REMOTE_ADDR", "10.0.0.1");
/// request.add_arg("foo", "bar");
///
/// let snapshot = request.snapshot();
/// assert_eq!(snapshot.client_ip, "10.0.0.1");
/// assert_eq!(snapshot.input.get("GET|foo"), Some("bar"));
///
/// let threats: BTreeSet<String> = ["GET|foo".to_string()].into_iter().collect();
/// assert!(request.defuse_input(&threats));
/// assert_eq!(request.arg("foo"), Some(""));
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// CGI meta variables, including `HTTP_*` headers
    environ: IndexMap<String, String>,
    /// Query string parameters
    args: MultiDict,
    /// Form body parameters
    form: MultiDict,
    /// Cookies
    cookies: IndexMap<String, String>,
    /// Uploaded file names per form field
    files: MultiDict,
    /// Raw body
    body: String,
    /// Handler source used for integrity hashes
    source: Option<PathBuf>,
    client_ip_key: String,
    caller_key: String,
}

impl RequestContext {
    /// Creates an empty request using the default environment keys.
    pub fn new() -> Self {
        Self {
            environ: IndexMap::new(),
            args: MultiDict::new(),
            form: MultiDict::new(),
            cookies: IndexMap::new(),
            files: MultiDict::new(),
            body: String::new(),
            source: None,
            client_ip_key: DEFAULT_CLIENT_IP_KEY.to_string(),
            caller_key: DEFAULT_CALLER_KEY.to_string(),
        }
    }

    /// Creates an empty request using the environment keys of `config`.
    pub fn with_config(config: &Config) -> Self {
        let mut request = Self::new();
        request.client_ip_key = config.client_ip_key.clone();
        request.caller_key = config.caller_key.clone();
        request
    }

    /// Sets a meta variable.
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.environ.insert(key.into(), value.into());
    }

    /// Appends a query string value.
    pub fn add_arg(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.args.entry(key.into()).or_default().push(value.into());
    }

    /// Appends a form value.
    pub fn add_form(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.form.entry(key.into()).or_default().push(value.into());
    }

    /// Sets a cookie.
    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// Records an uploaded file name.
    pub fn add_file(&mut self, key: impl Into<String>, filename: impl Into<String>) {
        self.files.entry(key.into()).or_default().push(filename.into());
    }

    /// Sets the raw body.
    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }

    /// Sets the handler source file used for integrity hashes.
    pub fn set_source(&mut self, path: impl Into<PathBuf>) {
        self.source = Some(path.into());
    }

    /// Returns a meta variable.
    pub fn env(&self, key: &str) -> Option<&str> {
        self.environ.get(key).map(String::as_str)
    }

    /// Returns the first query value of a field.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key)?.first().map(String::as_str)
    }

    /// Returns all query values of a field.
    pub fn arg_values(&self, key: &str) -> &[String] {
        self.args.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the first form value of a field.
    pub fn form(&self, key: &str) -> Option<&str> {
        self.form.get(key)?.first().map(String::as_str)
    }

    /// Returns all form values of a field.
    pub fn form_values(&self, key: &str) -> &[String] {
        self.form.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns a cookie.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Returns the raw body.
    pub fn body(&self) -> &str {
        &self.body
    }

    fn params_mut(&mut self, category: Category) -> Option<&mut MultiDict> {
        match category {
            Category::Get => Some(&mut self.args),
            Category::Post => Some(&mut self.form),
            _ => None,
        }
    }

    fn clear_field(&mut self, path: &FieldPath) {
        match path.category {
            Category::Get | Category::Post => {
                let Some(values) = self
                    .params_mut(path.category)
                    .and_then(|params| params.get_mut(&path.key))
                else {
                    return;
                };
                match path.index {
                    Some(index) => {
                        if let Some(value) = values.get_mut(index) {
                            value.clear();
                        }
                    }
                    None => *values = vec![String::new()],
                }
            }
            Category::Cookie => {
                if let Some(value) = self.cookies.get_mut(&path.key) {
                    value.clear();
                }
            }
            Category::Server => {
                if let Some(value) = self.environ.get_mut(&path.key) {
                    value.clear();
                }
            }
            Category::Data => self.body.clear(),
            // Rejected before any mutation.
            Category::Files => {}
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameworkAdapter for RequestContext {
    type ErrorResponse = ErrorResponse;

    fn client_ip(&self) -> String {
        self.env(&self.client_ip_key).unwrap_or_default().to_string()
    }

    fn caller(&self) -> String {
        self.env(&self.caller_key).unwrap_or_default().to_string()
    }

    fn resource(&self) -> String {
        self.env(REQUEST_URI_KEY)
            .or_else(|| self.env("PATH_INFO"))
            .unwrap_or_default()
            .to_string()
    }

    fn gather_input(&self) -> InputMap {
        let mut builder = SnapshotBuilder::new();

        for (key, values) in &self.args {
            builder.add_field(Category::Get, key, values.iter().cloned());
        }
        for (key, values) in &self.form {
            builder.add_field(Category::Post, key, values.iter().cloned());
        }
        for (name, value) in &self.cookies {
            builder.add_cookie(name, value.clone());
        }
        for (key, value) in &self.environ {
            builder.add_header(key, value.clone());
        }
        for (key, filenames) in &self.files {
            builder.add_files(key, filenames.iter().cloned());
        }
        builder.set_raw_body(&self.body);

        builder.build()
    }

    fn gather_hashes(&self) -> BTreeMap<String, String> {
        let Some(source) = &self.source else {
            return BTreeMap::new();
        };
        source_hashes(source).unwrap_or_else(|e| {
            tracing::warn!(source = %source.display(), error = %e, "could not hash handler source");
            BTreeMap::new()
        })
    }

    fn defuse_input(&mut self, threats: &BTreeSet<String>) -> bool {
        let paths: Vec<FieldPath> = threats
            .iter()
            .filter_map(|threat| match threat.parse::<FieldPath>() {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::debug!(threat = %threat, error = %e, "skipping unusable threat path");
                    None
                }
            })
            .collect();

        // Uploaded files cannot be rewritten in place.
        if paths.iter().any(|path| path.category == Category::Files) {
            return false;
        }

        for path in &paths {
            self.clear_field(path);
        }
        true
    }

    fn error(&self) -> ErrorResponse {
        ErrorResponse {
            status: ERROR_STATUS,
            body: ERROR_BODY.to_string(),
        }
    }
}
