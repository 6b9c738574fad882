//! Ignore rules.
//!
//! Some fields must never leave the application, for example a password
//! field of one login handler. Operators list them in a JSON file:
//!
//! ```json
//! [
//!   {"caller": "/healthz"},
//!   {"caller": "/login", "path": "POST|password"},
//!   {"path": "COOKIE|session"}
//! ]
//! ```
//!
//! A rule with only a `caller` drops the whole input of that caller. A rule
//! with a `path` drops that one field, optionally only for one caller. The
//! file is read on every request so edits apply without a restart.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::snapshot::InputMap;

/// One entry of the ignore file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IgnoreRule {
    /// Restricts the rule to one caller
    #[serde(default)]
    pub caller: Option<String>,
    /// Joined path key to drop
    #[serde(default)]
    pub path: Option<String>,
}

impl IgnoreRule {
    /// Rule dropping all input of a caller.
    pub fn caller(caller: impl Into<String>) -> Self {
        Self {
            caller: Some(caller.into()),
            path: None,
        }
    }

    /// Rule dropping one path for every caller.
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            caller: None,
            path: Some(path.into()),
        }
    }

    /// Rule dropping one path for one caller.
    pub fn scoped(caller: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            caller: Some(caller.into()),
            path: Some(path.into()),
        }
    }
}

/// What applying an ignore list did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreEffect {
    /// Nothing matched.
    Untouched,
    /// Individual paths were removed.
    Removed(usize),
    /// A caller rule matched and the input was cleared.
    Cleared,
}

/// Parsed ignore file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    rules: Vec<IgnoreRule>,
}

impl IgnoreList {
    /// Creates a list from rules.
    pub fn new(rules: Vec<IgnoreRule>) -> Self {
        Self { rules }
    }

    /// Reads and parses an ignore file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::IgnoreRead` if the file cannot be opened and
    /// `ConfigError::IgnoreParse` if it is not a JSON array of rules.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::IgnoreRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|message| ConfigError::IgnoreParse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parses the JSON rule list.
    ///
    /// # Errors
    ///
    /// Returns the decoder message if `content` is not a JSON array of rules.
    pub fn parse(content: &str) -> Result<Self, String> {
        serde_json::from_str::<Vec<IgnoreRule>>(content)
            .map(Self::new)
            .map_err(|e| e.to_string())
    }

    /// The rules in file order.
    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }

    /// Removes ignored fields of `caller` from `input`.
    ///
    /// Rules are evaluated in order. The first caller-only rule that matches
    /// clears the input and stops evaluation. Path rules for other callers
    /// are skipped. Removing a path that is not present is a no-op.
    pub fn apply(&self, caller: &str, input: &mut InputMap) -> IgnoreEffect {
        let mut removed = 0;

        for rule in &self.rules {
            match (&rule.caller, &rule.path) {
                (Some(rule_caller), None) => {
                    if rule_caller == caller {
                        input.clear();
                        return IgnoreEffect::Cleared;
                    }
                }
                (Some(rule_caller), Some(_)) if rule_caller != caller => continue,
                (_, Some(path)) => {
                    if input.remove(path).is_some() {
                        removed += 1;
                    }
                }
                (None, None) => {}
            }
        }

        if removed == 0 {
            IgnoreEffect::Untouched
        } else {
            IgnoreEffect::Removed(removed)
        }
    }
}
