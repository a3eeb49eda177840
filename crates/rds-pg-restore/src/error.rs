//! Error types for the restore library.

use thiserror::Error;

/// Main error type for restore operations.
#[derive(Error, Debug)]
pub enum RestoreError {
    /// Configuration error (invalid file, missing fields, contradictory flags).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target database connection or query error.
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Snapshot manifest is missing, incomplete, or inconsistent.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// The foreign-key graph contains a non-self cycle or is otherwise unusable.
    #[error("Foreign-key graph error: {0}")]
    Graph(String),

    /// The computed table order violates the parent-after-child invariant.
    #[error("Table ordering error: {0}")]
    Ordering(String),

    /// Data transfer failed for a specific table.
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Post-load row count does not match pre-load count plus the file row count.
    #[error("Row count mismatch for table {table}: expected {expected}, got {actual}")]
    RowCount {
        table: String,
        expected: i64,
        actual: i64,
    },

    /// A column carries an original-type tag outside the supported set.
    #[error("Unknown original type '{type_tag}' for column {column}")]
    UnknownType { column: String, type_tag: String },

    /// A cell value could not be encoded for the bulk-copy protocol.
    #[error("Value encoding error: {0}")]
    Encoding(String),

    /// Parquet file could not be opened or decoded.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// CSV serialization error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Restore was cancelled (SIGINT, etc.)
    #[error("Restore cancelled")]
    Cancelled,
}

impl RestoreError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        RestoreError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error.
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        RestoreError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Format error with full details including the error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            RestoreError::Config(_) => 2,
            RestoreError::Manifest(_) => 3,
            RestoreError::Graph(_) | RestoreError::Ordering(_) => 4,
            _ => 1,
        }
    }
}

/// Result type alias for restore operations.
pub type Result<T> = std::result::Result<T, RestoreError>;
