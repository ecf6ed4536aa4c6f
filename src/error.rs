//! Error types for sqlroute.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Routing and configuration failures are kept distinguishable from errors raised by a
//! backend, so callers can tell "we picked the wrong database" apart from "the database
//! said no".

use thiserror::Error;

/// Constraint class reported by the driver for an integrity violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
}

/// Coarse classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid setup: empty registry, unknown primary, duplicate keys, missing factory.
    Configuration,
    /// A resolved routing key has no backend.
    Routing,
    /// Raised by a backend during execution.
    Backend,
    /// Produced by an error translator from a backend error.
    Translated,
    /// Externally managed transaction bookkeeping.
    Transaction,
    /// Bad caller input.
    Input,
    Internal,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Routing error: {message} (key: {key})")]
    Routing { key: String, message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        constraint: Option<ConstraintKind>,
    },

    #[error("No rows returned")]
    RowNotFound,

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Duplicate key: {message}")]
    DuplicateKey {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Data integrity violation: {message}")]
    DataIntegrityViolation {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Concurrency failure: {message}")]
    ConcurrencyFailure {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Bad SQL grammar: {message}")]
    BadSqlGrammar {
        message: String,
        sql_state: Option<String>,
    },

    #[error("Transaction error: {message} (key: {key}, unit of work: {unit_of_work})")]
    Transaction {
        message: String,
        key: String,
        unit_of_work: String,
    },

    #[error("Statement '{statement}' failed: {source}")]
    Statement {
        statement: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a routing error for the given key.
    pub fn routing(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Routing {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            constraint: None,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a transaction error.
    pub fn transaction(
        message: impl Into<String>,
        key: impl Into<String>,
        unit_of_work: impl Into<String>,
    ) -> Self {
        Self::Transaction {
            message: message.into(),
            key: key.into(),
            unit_of_work: unit_of_work.into(),
        }
    }

    /// Wrap an error with the statement that produced it.
    pub fn statement(statement: impl Into<String>, source: DbError) -> Self {
        Self::Statement {
            statement: statement.into(),
            source: Box::new(source),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Strip statement wrappers and return the error raised underneath.
    pub fn into_cause(self) -> DbError {
        let mut current = self;
        while let DbError::Statement { source, .. } = current {
            current = *source;
        }
        current
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Routing { .. } => ErrorKind::Routing,
            Self::Connection { .. }
            | Self::Database { .. }
            | Self::RowNotFound
            | Self::Timeout { .. } => ErrorKind::Backend,
            Self::DuplicateKey { .. }
            | Self::DataIntegrityViolation { .. }
            | Self::ConcurrencyFailure { .. }
            | Self::BadSqlGrammar { .. } => ErrorKind::Translated,
            Self::Transaction { .. } => ErrorKind::Transaction,
            Self::Statement { source, .. } => source.kind(),
            Self::InvalidInput { .. } => ErrorKind::Input,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// True for errors raised by the persistence layer itself, the family an
    /// [`ErrorTranslator`](crate::routing::ErrorTranslator) is asked about.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Database { .. } | Self::RowNotFound | Self::Timeout { .. }
        )
    }

    /// SQLSTATE (or driver code) carried by this error, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. }
            | Self::DuplicateKey { sql_state, .. }
            | Self::DataIntegrityViolation { sql_state, .. }
            | Self::ConcurrencyFailure { sql_state, .. }
            | Self::BadSqlGrammar { sql_state, .. } => sql_state.as_deref(),
            Self::Statement { source, .. } => source.sql_state(),
            _ => None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::ConcurrencyFailure { .. }
        )
    }
}

fn constraint_kind(kind: sqlx::error::ErrorKind) -> Option<ConstraintKind> {
    match kind {
        sqlx::error::ErrorKind::UniqueViolation => Some(ConstraintKind::Unique),
        sqlx::error::ErrorKind::ForeignKeyViolation => Some(ConstraintKind::ForeignKey),
        sqlx::error::ErrorKind::NotNullViolation => Some(ConstraintKind::NotNull),
        sqlx::error::ErrorKind::CheckViolation => Some(ConstraintKind::Check),
        _ => None,
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => DbError::Database {
                message: db_err.message().to_string(),
                sql_state: db_err.code().map(|c| c.to_string()),
                constraint: constraint_kind(db_err.kind()),
            },
            sqlx::Error::RowNotFound => DbError::RowNotFound,
            // The pool limit is only known to the pool; see `DbPool::begin`.
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "Raise acquire_timeout or max_connections for this backend",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
