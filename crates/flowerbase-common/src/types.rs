//! Request-scoped types shared across crates

use std::fmt;
use std::str::FromStr;

use bson::Document;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Authenticated caller as seen by rule expansions (`%%user`)
pub type User = Document;

/// Kind of access being validated for a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationType {
    Insert,
    Read,
    Delete,
    Search,
    Write,
}

impl ValidationType {
    /// Types that run through the read pipeline
    pub fn is_read_like(self) -> bool {
        matches!(self, Self::Read | Self::Search)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Read => "read",
            Self::Delete => "delete",
            Self::Search => "search",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for ValidationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "read" => Ok(Self::Read),
            "delete" => Ok(Self::Delete),
            "search" => Ok(Self::Search),
            "write" => Ok(Self::Write),
            other => Err(Error::InvalidRule(format!(
                "unknown validation type '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_validation_type() {
        assert_eq!("read".parse::<ValidationType>().unwrap(), ValidationType::Read);
        assert_eq!("DELETE".parse::<ValidationType>().unwrap(), ValidationType::Delete);
        assert!("upsert".parse::<ValidationType>().is_err());
    }

    #[test]
    fn test_read_like() {
        assert!(ValidationType::Read.is_read_like());
        assert!(ValidationType::Search.is_read_like());
        assert!(!ValidationType::Insert.is_read_like());
        assert_eq!(ValidationType::Write.to_string(), "write");
    }
}
