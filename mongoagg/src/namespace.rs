use serde::{Deserialize, Serialize};
use std::fmt;

/// A fully qualified collection name.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, PartialOrd, Ord, Hash)]
pub struct Namespace {
    pub db: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Namespace {
            db: db.into(),
            collection: collection.into(),
        }
    }

    /// The dotted `db.collection` form used in messages and wire documents.
    pub fn ns(&self) -> String {
        format!("{}.{}", self.db, self.collection)
    }

    pub fn is_valid(&self) -> bool {
        !self.db.is_empty()
            && !self.db.contains(|c| c == '$' || c == '/' || c == ' ' || c == '\0')
            && !self.collection.is_empty()
            && !self.collection.starts_with('.')
            && !self.collection.ends_with('.')
            && !self.collection.contains('$')
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_namespace() {
        assert!(Namespace::new("test", "coll").is_valid());
        assert!(Namespace::new("test", "system.profile").is_valid());
    }

    #[test]
    fn invalid_namespaces() {
        assert!(!Namespace::new("", "coll").is_valid());
        assert!(!Namespace::new("test", "").is_valid());
        assert!(!Namespace::new("te$t", "coll").is_valid());
        assert!(!Namespace::new("test", ".coll").is_valid());
        assert!(!Namespace::new("test", "co$ll").is_valid());
    }
}
