// Scoped SQLite storage: one database per scope, opened lazily and cached

pub mod migrations;
pub mod registry;
pub mod schema;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub use registry::{ConnectionPool, ScopeDatabase, ScopeRegistry, StorageLocation};

/// An isolated storage unit with its own lifecycle and schema state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Project,
    User,
    Global,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Project, Scope::User, Scope::Global];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Project => "project",
            Scope::User => "user",
            Scope::Global => "global",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "project" => Ok(Scope::Project),
            "user" => Ok(Scope::User),
            "global" => Ok(Scope::Global),
            other => Err(Error::validation(format!(
                "unknown scope '{}' (expected project, user or global)",
                other
            ))),
        }
    }
}

/// Target of a read operation: one scope or a fan-out over all of them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeSelector {
    One(Scope),
    All,
}

impl ScopeSelector {
    pub fn scopes(&self) -> Vec<Scope> {
        match self {
            ScopeSelector::One(scope) => vec![*scope],
            ScopeSelector::All => Scope::ALL.to_vec(),
        }
    }
}

impl From<Scope> for ScopeSelector {
    fn from(scope: Scope) -> Self {
        ScopeSelector::One(scope)
    }
}

impl FromStr for ScopeSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(ScopeSelector::All)
        } else {
            s.parse().map(ScopeSelector::One)
        }
    }
}

/// Current time in seconds since the epoch
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Case-insensitive `LIKE` pattern matching `text` anywhere, wildcards escaped.
/// Use with `ESCAPE '\'` against a column passed through SQLite `lower()`,
/// which folds ASCII only, so the pattern folds the same way.
pub fn like_pattern(text: &str) -> String {
    format!("%{}%", escape_like(&text.to_ascii_lowercase()))
}

/// Escape `LIKE` wildcards so `text` matches literally
pub fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
