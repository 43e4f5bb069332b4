//! Strongly-typed identifiers for curfew

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a category in the per-user quota tree
    CategoryId
);

string_id!(
    /// Identifier of a device user (restricted or parent)
    UserId
);

string_id!(
    /// Identifier of a time limit rule
    RuleId
);

string_id!(
    /// Application identifier as reported by the foreground sampler
    /// (package name on mobile, executable name on Linux)
    AppId
);

/// Unique identifier for a used-time commit, kept across retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(Uuid);

impl CommitId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CommitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_id_equality() {
        let id1 = CategoryId::new("games");
        let id2 = CategoryId::new("games");
        let id3 = CategoryId::new("video");

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn commit_id_uniqueness() {
        assert_ne!(CommitId::new(), CommitId::new());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let app = AppId::new("org.example.game");
        let json = serde_json::to_string(&app).unwrap();
        assert_eq!(json, "\"org.example.game\"");
        let parsed: AppId = serde_json::from_str(&json).unwrap();
        assert_eq!(app, parsed);
    }
}
