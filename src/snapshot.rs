//! Request snapshots.
//!
//! A snapshot is the canonical view of one inbound request that gets
//! shipped to the daemon: every input field keyed by its escaped path,
//! plus who sent it, which handler runs it and digests of that handler.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use indexmap::IndexMap;
use ring::digest;
use serde::Serialize;

use crate::path::{Category, FieldPath};

/// Prefix of environment keys that carry forwarded request headers.
pub const HEADER_PREFIX: &str = "HTTP_";

/// Fixed key under which the raw request body is stored.
pub const RAW_BODY_KEY: &str = "raw";

/// Ordered mapping from joined path key to field value.
///
/// Keys are stored in their escaped wire form because both ignore rules and
/// daemon threats refer to fields by that exact string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InputMap {
    entries: IndexMap<String, String>,
}

impl InputMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value under a decoded path.
    pub fn insert(&mut self, path: &FieldPath, value: impl Into<String>) {
        self.entries.insert(path.to_key(), value.into());
    }

    /// Returns the value stored under a joined key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns `true` if the joined key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes a joined key, keeping the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(key)
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterates over the joined keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Collects request fields and emits them in a fixed category order.
///
/// Fields can be added in any order; [`SnapshotBuilder::build`] always
/// writes `GET`, `POST`, `COOKIE`, `SERVER`, `FILES` and then `DATA`, each
/// category in the order its fields were added.
///
/// # Examples
///
/// ```
/// use shadowd_connector::{Category, SnapshotBuilder};
///
/// let mut builder = SnapshotBuilder::new();
/// builder.add_cookie("session", "abc");
/// builder.add_field(Category::Get, "foo", ["bar1", "bar2"]);
/// builder.add_field(Category::Get, "q", ["x"]);
///
/// let input = builder.build();
/// let keys: Vec<&str> = input.keys().collect();
/// assert_eq!(keys, ["GET|foo|0", "GET|foo|1", "GET|q", "COOKIE|session"]);
/// ```
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    buckets: BTreeMap<Category, Vec<(FieldPath, String)>>,
}

impl SnapshotBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a possibly multi-valued field.
    ///
    /// A field with more than one value gets one indexed path per value,
    /// counted from zero in the given order. A single value is stored without
    /// index. A field without values is skipped.
    pub fn add_field<I, V>(&mut self, category: Category, key: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        let bucket = self.buckets.entry(category).or_default();

        match values.len() {
            0 => {}
            1 => {
                let value = values.into_iter().next().unwrap_or_default();
                bucket.push((FieldPath::new(category, key), value));
            }
            _ => bucket.extend(
                values
                    .into_iter()
                    .enumerate()
                    .map(|(index, value)| (FieldPath::indexed(category, key, index), value)),
            ),
        }
    }

    /// Adds a cookie.
    pub fn add_cookie(&mut self, name: &str, value: impl Into<String>) {
        self.add_field(Category::Cookie, name, [value.into()]);
    }

    /// Adds an environment entry if it is a forwarded header.
    ///
    /// Returns `false` when the key lacks the [`HEADER_PREFIX`] and was
    /// therefore not captured.
    pub fn add_header(&mut self, key: &str, value: impl Into<String>) -> bool {
        if !key.starts_with(HEADER_PREFIX) {
            return false;
        }
        self.add_field(Category::Server, key, [value.into()]);
        true
    }

    /// Adds the uploaded file names of one form field.
    ///
    /// Only names are captured, never file contents.
    pub fn add_files<I, V>(&mut self, key: &str, filenames: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.add_field(Category::Files, key, filenames);
    }

    /// Stores the raw request body under `DATA|raw` unless it is empty.
    pub fn set_raw_body(&mut self, body: &str) {
        if body.is_empty() {
            return;
        }
        self.buckets.insert(
            Category::Data,
            vec![(FieldPath::new(Category::Data, RAW_BODY_KEY), body.to_string())],
        );
    }

    /// Produces the ordered input map.
    pub fn build(self) -> InputMap {
        let mut input = InputMap::new();
        // BTreeMap iterates in `Category` declaration order.
        for (_, fields) in self.buckets {
            for (path, value) in fields {
                input.insert(&path, value);
            }
        }
        input
    }
}

/// One inbound request as sent to the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSnapshot {
    /// Address of the remote client
    pub client_ip: String,
    /// Identifier of the executing script or handler
    pub caller: String,
    /// Requested resource (URL path)
    pub resource: String,
    /// Input fields by joined path key
    pub input: InputMap,
    /// Digest algorithm name to hex digest of the handler's source
    pub hashes: BTreeMap<String, String>,
}

impl RequestSnapshot {
    /// Creates a snapshot with empty input and no hashes.
    pub fn new(
        client_ip: impl Into<String>,
        caller: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            client_ip: client_ip.into(),
            caller: caller.into(),
            resource: resource.into(),
            input: InputMap::new(),
            hashes: BTreeMap::new(),
        }
    }

    /// Replaces the input fields.
    pub fn with_input(mut self, input: InputMap) -> Self {
        self.input = input;
        self
    }

    /// Replaces the source hashes.
    pub fn with_hashes(mut self, hashes: BTreeMap<String, String>) -> Self {
        self.hashes = hashes;
        self
    }
}

/// Computes the digests of a handler's source file.
///
/// Currently only `sha256` is produced.
///
/// # Errors
///
/// Returns the I/O error if the file cannot be read.
pub fn source_hashes(path: &Path) -> io::Result<BTreeMap<String, String>> {
    let content = fs::read(path)?;
    let sha256 = digest::digest(&digest::SHA256, &content);

    let mut hashes = BTreeMap::new();
    hashes.insert("sha256".to_string(), hex::encode(sha256.as_ref()));
    Ok(hashes)
}
