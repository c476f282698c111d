//! Error types for linkorm operations.

use std::fmt;

/// The primary error type for all linkorm operations.
#[derive(Debug)]
pub enum Error {
    /// Configuration errors (missing model, incomplete relation declaration, bad tags)
    Config(ConfigError),
    /// Statement execution errors, including recovered internal faults
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// A relation failed to load (only surfaced in strict load mode)
    Relation(RelationError),
    /// Model registry lookups
    Registry(RegistryError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// The statement has no model or table to target
    MissingModel,
    /// A relation is missing keys or a link table
    IncompleteRelation,
    /// A preload path names a field that is not a relation
    UnknownRelation,
    /// A field or column name could not be matched
    UnknownField,
    /// A tag string could not be parsed
    InvalidTag,
    /// A preload path or strategy request is unusable
    InvalidPath,
    /// Engine configuration could not be parsed
    InvalidConfig,
    /// A fragment's placeholders do not line up with its arguments
    PlaceholderMismatch,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    /// Public entry point that produced the error, when known.
    pub operation: Option<&'static str>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Error reported by the database
    Database,
    /// Expected row was not returned
    NotFound,
    /// A panic caught at a recovery boundary
    Internal,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct RelationError {
    pub model: &'static str,
    pub relation: String,
    pub message: String,
    pub source: Option<Box<Error>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No model registered under this table name
    NotFound { table: String },
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            kind,
            message: message.into(),
        })
    }

    /// Wrap a database failure, attaching the statement that failed.
    pub fn database(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind: QueryErrorKind::Database,
            sql: Some(sql.into()),
            message: message.into(),
            operation: None,
            source: None,
        })
    }

    /// Attach the statement text to an execution error that lacks one.
    pub fn with_sql(self, sql: &str) -> Self {
        match self {
            Error::Query(mut q) if q.sql.is_none() => {
                q.sql = Some(sql.to_string());
                Error::Query(q)
            }
            other => other,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::Relation(r) => r.source.as_deref().and_then(Error::sql),
            _ => None,
        }
    }

    /// Get the configuration error kind, if this is one.
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            Error::Config(c) => Some(c.kind),
            _ => None,
        }
    }

    /// Was this error produced by a caught panic?
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Query(q) if q.kind == QueryErrorKind::Internal)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Query(e) => match (e.kind, e.operation) {
                (QueryErrorKind::Internal, Some(op)) => {
                    write!(f, "Internal error in {}: {}", op, e.message)
                }
                _ => write!(f, "Query error: {}", e.message),
            },
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Relation(e) => write!(f, "Relation error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Relation(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for RelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.model, self.relation, self.message)
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotFound { table } => {
                write!(f, "no model registered for table '{}'", table)
            }
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<RelationError> for Error {
    fn from(err: RelationError) -> Self {
        Error::Relation(err)
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Error::Registry(err)
    }
}

/// Result type alias for linkorm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Run `f`, converting a panic into an internal execution error tagged with `operation`.
///
/// Public entry points wrap their reflective work (scanning, association, merging)
/// in this so one malformed record cannot take down a whole batch.
pub fn recover<T>(operation: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            tracing::error!(operation, panic = %message, "Recovered panic");
            Err(Error::Query(QueryError {
                kind: QueryErrorKind::Internal,
                sql: None,
                message,
                operation: Some(operation),
                source: None,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_is_attached_once() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Database,
            sql: None,
            message: "relation \"posts\" does not exist".to_string(),
            operation: None,
            source: None,
        })
        .with_sql("SELECT * FROM posts");
        assert_eq!(err.sql(), Some("SELECT * FROM posts"));

        let err = err.with_sql("SELECT 1");
        assert_eq!(err.sql(), Some("SELECT * FROM posts"));
    }

    #[test]
    fn relation_error_exposes_inner_sql() {
        let err = Error::Relation(RelationError {
            model: "Post",
            relation: "comments".to_string(),
            message: "batch query failed".to_string(),
            source: Some(Box::new(Error::database("SELECT 1", "boom"))),
        });
        assert_eq!(err.sql(), Some("SELECT 1"));
        assert_eq!(err.to_string(), "Relation error: Post.comments: batch query failed");
    }

    #[test]
    fn internal_errors_name_the_operation() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Internal,
            sql: None,
            message: "index out of bounds".to_string(),
            operation: Some("scan"),
            source: None,
        });
        assert!(err.is_internal());
        assert_eq!(err.to_string(), "Internal error in scan: index out of bounds");
    }

    #[test]
    fn recover_converts_panics() {
        let err = recover::<()>("merge_map", || panic!("bad field")).unwrap_err();
        assert!(err.is_internal());
        assert!(err.to_string().contains("merge_map"));
        assert!(err.to_string().contains("bad field"));

        let ok = recover("merge_map", || Ok(3)).unwrap();
        assert_eq!(ok, 3);
    }

    #[test]
    fn config_kind_helper() {
        let err = Error::config(ConfigErrorKind::MissingModel, "no table");
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::MissingModel));
        assert!(Error::Cancelled.config_kind().is_none());
    }
}
