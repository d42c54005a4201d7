//! Namespaces: a database name optionally qualified by a collection name.

use std::fmt;

use uuid::Uuid;

/// Database that hosts administrative commands.
pub const ADMIN_DB: &str = "admin";
/// Node-local database.
pub const LOCAL_DB: &str = "local";
/// Cluster metadata database.
pub const CONFIG_DB: &str = "config";

/// Maximum length of a database name, in bytes.
pub const MAX_DB_NAME_LEN: usize = 63;

/// Characters that may not appear in a database name.
const INVALID_DB_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$', '*', '<', '>', ':', '|', '?', '\0'];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    #[error("Invalid database name: '{0}'")]
    InvalidDatabase(String),
    #[error("Invalid collection name: '{0}'")]
    InvalidCollection(String),
    #[error("Namespace '{0}' is not fully qualified")]
    NotFullyQualified(String),
}

/// Returns true when `db` is usable as a database name.
#[must_use]
pub fn is_valid_db_name(db: &str) -> bool {
    !db.is_empty() && db.len() <= MAX_DB_NAME_LEN && !db.contains(INVALID_DB_CHARS)
}

/// Returns true when `coll` is usable as a collection name.
#[must_use]
pub fn is_valid_collection_name(coll: &str) -> bool {
    !coll.is_empty() && !coll.starts_with('.') && !coll.contains('$') && !coll.contains('\0')
}

/// A database name plus an optional collection name (`db` or `db.coll`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceString {
    db: String,
    coll: String,
}

impl NamespaceString {
    /// Builds `db.coll` without validation.
    #[must_use]
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// Builds a database-only namespace.
    #[must_use]
    pub fn db_only(db: impl Into<String>) -> Self {
        Self::new(db, String::new())
    }

    /// Parses `db` or `db.coll`; the collection part may itself contain dots.
    #[must_use]
    pub fn parse(ns: &str) -> Self {
        match ns.split_once('.') {
            Some((db, coll)) => Self::new(db, coll),
            None => Self::db_only(ns),
        }
    }

    /// Parses a namespace that must name a collection and validates both parts.
    ///
    /// # Errors
    ///
    /// Returns [`NamespaceError`] if the string has no collection part or
    /// either part is invalid.
    pub fn parse_fully_qualified(ns: &str) -> Result<Self, NamespaceError> {
        let parsed = Self::parse(ns);
        if parsed.coll.is_empty() {
            return Err(NamespaceError::NotFullyQualified(ns.to_string()));
        }
        parsed.validate()?;
        Ok(parsed)
    }

    /// Validates the database and (if present) the collection name.
    ///
    /// # Errors
    ///
    /// Returns the first invalid component.
    pub fn validate(&self) -> Result<(), NamespaceError> {
        if !is_valid_db_name(&self.db) {
            return Err(NamespaceError::InvalidDatabase(self.db.clone()));
        }
        if !self.coll.is_empty() && !is_valid_collection_name(&self.coll) {
            return Err(NamespaceError::InvalidCollection(self.coll.clone()));
        }
        Ok(())
    }

    #[must_use]
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Collection part; empty for database-only namespaces.
    #[must_use]
    pub fn coll(&self) -> &str {
        &self.coll
    }

    /// Whether a collection is named.
    #[must_use]
    pub fn has_collection(&self) -> bool {
        !self.coll.is_empty()
    }

    #[must_use]
    pub fn is_admin_db(&self) -> bool {
        self.db == ADMIN_DB
    }

    #[must_use]
    pub fn is_local_db(&self) -> bool {
        self.db == LOCAL_DB
    }

    #[must_use]
    pub fn is_config_db(&self) -> bool {
        self.db == CONFIG_DB
    }

    /// Collections under `system.` are reserved for server metadata.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.coll.starts_with("system.")
    }
}

impl fmt::Display for NamespaceString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.coll.is_empty() {
            f.write_str(&self.db)
        } else {
            write!(f, "{}.{}", self.db, self.coll)
        }
    }
}

/// Either a namespace or a collection UUID scoped to a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceOrUuid {
    Namespace(NamespaceString),
    Uuid { db: String, uuid: Uuid },
}

impl NamespaceOrUuid {
    #[must_use]
    pub fn db(&self) -> &str {
        match self {
            Self::Namespace(ns) => ns.db(),
            Self::Uuid { db, .. } => db,
        }
    }
}

impl fmt::Display for NamespaceOrUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespace(ns) => ns.fmt(f),
            Self::Uuid { db, uuid } => write!(f, "{db}.{uuid}"),
        }
    }
}
