//! Hierarchical field identifiers.
//!
//! Every input field of a request is addressed by a path such as
//! `GET|foo` or `POST|tags|1`: a source category, the field key and an
//! optional array index, joined by an unescaped `|`. Literal `\` and `|`
//! inside a segment are backslash-escaped so the joined key can always be
//! split back into the original segments.

use std::fmt;
use std::str::FromStr;

/// Segment delimiter of a joined path key.
pub const DELIMITER: char = '|';

/// Escape character used inside path segments.
pub const ESCAPE: char = '\\';

/// Escapes a single path segment.
///
/// `\` becomes `\\` first, then `|` becomes `\|`. The order matters: the
/// backslash introduced for a pipe must not be escaped again.
///
/// # Examples
///
/// ```
/// use shadowd_connector::escape_key;
///
/// assert_eq!(escape_key("foo|bar"), "foo\\|bar");
/// assert_eq!(escape_key("foo\\bar"), "foo\\\\bar");
/// ```
pub fn escape_key(segment: &str) -> String {
    segment.replace('\\', "\\\\").replace('|', "\\|")
}

/// Reverses [`escape_key`].
///
/// A backslash makes the following character literal. A lone backslash at
/// the very end of the input has nothing to escape and is kept as is.
///
/// # Examples
///
/// ```
/// use shadowd_connector::{escape_key, unescape_key};
///
/// assert_eq!(unescape_key("foo\\|bar"), "foo|bar");
/// assert_eq!(unescape_key("foo\\"), "foo\\");
///
/// let raw = "a\\|b|c";
/// assert_eq!(unescape_key(&escape_key(raw)), raw);
/// ```
pub fn unescape_key(segment: &str) -> String {
    let mut output = String::with_capacity(segment.len());
    let mut chars = segment.chars();

    while let Some(c) = chars.next() {
        if c == ESCAPE {
            output.push(chars.next().unwrap_or(ESCAPE));
        } else {
            output.push(c);
        }
    }

    output
}

/// Splits a joined path key on unescaped delimiters.
///
/// Escape sequences are copied into the segments untouched, so each segment
/// is still in its escaped form and has to go through [`unescape_key`] before
/// it is compared against a raw field name.
///
/// # Examples
///
/// ```
/// use shadowd_connector::split_path;
///
/// assert_eq!(split_path("GET|foo|0"), vec!["GET", "foo", "0"]);
/// assert_eq!(split_path("foo\\|bar"), vec!["foo\\|bar"]);
/// assert_eq!(split_path("foo\\\\|bar"), vec!["foo\\\\", "bar"]);
/// ```
pub fn split_path(key: &str) -> Vec<String> {
    let mut output = Vec::new();
    let mut current = String::new();
    let mut chars = key.chars();

    while let Some(c) = chars.next() {
        match c {
            ESCAPE => {
                current.push(ESCAPE);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            DELIMITER => output.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    output.push(current);
    output
}

/// Source category of an input field.
///
/// The declaration order is the order in which categories are written into
/// a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Query string parameters
    Get,
    /// Form body parameters
    Post,
    /// Request cookies
    Cookie,
    /// Forwarded request headers (`HTTP_*` meta variables)
    Server,
    /// Uploaded file names
    Files,
    /// Raw request body
    Data,
}

impl Category {
    /// All categories in snapshot order.
    pub const ALL: [Category; 6] = [
        Category::Get,
        Category::Post,
        Category::Cookie,
        Category::Server,
        Category::Files,
        Category::Data,
    ];

    /// Returns the wire token of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Get => "GET",
            Category::Post => "POST",
            Category::Cookie => "COOKIE",
            Category::Server => "SERVER",
            Category::Files => "FILES",
            Category::Data => "DATA",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| PathError::UnknownCategory(s.to_string()))
    }
}

/// Error returned when a joined key does not describe a field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Fewer than two or more than three segments.
    #[error("path must have 2 or 3 segments, found {0}")]
    SegmentCount(usize),
    /// The first segment is not a known category token.
    #[error("unknown path category '{0}'")]
    UnknownCategory(String),
    /// The third segment is not a non-negative integer.
    #[error("invalid array index '{0}'")]
    InvalidIndex(String),
}

/// A decoded field path.
///
/// # Examples
///
/// ```
/// use shadowd_connector::{Category, FieldPath};
///
/// let path = FieldPath::indexed(Category::Get, "a|b", 1);
/// assert_eq!(path.to_key(), "GET|a\\|b|1");
///
/// let parsed: FieldPath = "GET|a\\|b|1".parse().unwrap();
/// assert_eq!(parsed, path);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    /// Source category
    pub category: Category,
    /// Raw (unescaped) field key
    pub key: String,
    /// Position within a multi-valued field
    pub index: Option<usize>,
}

impl FieldPath {
    /// Creates a path for a single-valued field.
    pub fn new(category: Category, key: impl Into<String>) -> Self {
        Self {
            category,
            key: key.into(),
            index: None,
        }
    }

    /// Creates a path for one value of a multi-valued field.
    pub fn indexed(category: Category, key: impl Into<String>, index: usize) -> Self {
        Self {
            category,
            key: key.into(),
            index: Some(index),
        }
    }

    /// Renders the joined, escaped key used on the wire.
    pub fn to_key(&self) -> String {
        let mut key = format!("{}{}{}", self.category, DELIMITER, escape_key(&self.key));
        if let Some(index) = self.index {
            key.push(DELIMITER);
            key.push_str(&index.to_string());
        }
        key
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let segments = split_path(key);
        if !(2..=3).contains(&segments.len()) {
            return Err(PathError::SegmentCount(segments.len()));
        }

        let category = unescape_key(&segments[0]).parse()?;
        let field = unescape_key(&segments[1]);
        let index = match segments.get(2) {
            Some(raw) => {
                let raw = unescape_key(raw);
                Some(raw.parse().map_err(|_| PathError::InvalidIndex(raw))?)
            }
            None => None,
        };

        Ok(Self {
            category,
            key: field,
            index,
        })
    }
}
