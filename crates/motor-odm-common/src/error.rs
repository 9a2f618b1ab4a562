//! Error types for motor-odm

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Result type alias for motor-odm operations
pub type Result<T> = std::result::Result<T, OdmError>;

/// Server error code reported for unique index violations
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Extracts index name and offending key from a driver duplicate-key message
///
/// Matches messages shaped like
/// `E11000 duplicate key error collection: db.users index: email_1 dup key: { email: "a@b.com" }`
static DUPLICATE_KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"index:\s+(?P<index>\S+)\s+dup key:\s+(?P<key>\{.*\})"#).unwrap()
});

/// Unified error type for all motor-odm operations
#[derive(Error, Debug, Clone)]
pub enum OdmError {
    #[error("MongoDB error: {0}")]
    MongoDB(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Client setup or open failure for a registered alias
    #[error("Cannot connect to database {alias}: {cause}")]
    Connection { alias: String, cause: String },

    /// Invalid connection or schema configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A field value failed its contract
    #[error("Validation error: field '{field}' of {document} {reason} (value: {value})")]
    InvalidField {
        document: String,
        field: String,
        value: String,
        reason: String,
    },

    /// A document of a bulk insert failed validation; nothing was written
    #[error("Validation for document {index} in the batch failed: {source}")]
    BatchValidation {
        index: usize,
        #[source]
        source: Box<OdmError>,
    },

    /// Full save attempted on a document loaded with a projection
    #[error(
        "Partly loaded document {document} can't be saved. Document should be loaded without 'only' or 'exclude' modifiers"
    )]
    PartlyLoaded { document: String },

    /// Duplicate key reported by the storage layer, not yet attributed to a document type
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Unique index violation attributed to a document type
    #[error("The index \"{index}\" was violated when trying to save this \"{document}\" (error code: E11000): {key}")]
    UniqueKeyViolation {
        document: String,
        index: String,
        key: String,
    },

    /// API misuse (e.g. `get` with neither identity nor filter)
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OdmError {
    /// Builds an `InvalidField` error
    pub fn invalid_field(
        document: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        OdmError::InvalidField {
            document: document.into(),
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Builds a `Connection` error for an alias
    pub fn connection(alias: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        OdmError::Connection {
            alias: alias.into(),
            cause: cause.to_string(),
        }
    }

    /// Attributes a storage-level `DuplicateKey` to a document type.
    ///
    /// Any other error is returned unchanged.
    pub fn into_unique_violation(self, document: &str) -> Self {
        match self {
            OdmError::DuplicateKey(message) => {
                let (index, key) = match DUPLICATE_KEY_REGEX.captures(&message) {
                    Some(caps) => (caps["index"].to_string(), caps["key"].to_string()),
                    None => ("unknown".to_string(), message.clone()),
                };
                OdmError::UniqueKeyViolation {
                    document: document.to_string(),
                    index,
                    key,
                }
            }
            other => other,
        }
    }

    /// Returns true if this error is any kind of validation failure
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OdmError::Validation(_)
                | OdmError::InvalidField { .. }
                | OdmError::BatchValidation { .. }
        )
    }

    /// Returns true if this is a uniqueness constraint violation
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            OdmError::DuplicateKey(_) | OdmError::UniqueKeyViolation { .. }
        )
    }
}

impl From<serde_json::Error> for OdmError {
    fn from(err: serde_json::Error) -> Self {
        OdmError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for OdmError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::{ErrorKind, WriteFailure};

        let duplicate = match err.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
                write_error.code == DUPLICATE_KEY_CODE
            }
            _ => false,
        };

        let message = err.to_string();
        // insert_many reports its write errors inside the message
        if duplicate || message.contains("E11000") {
            OdmError::DuplicateKey(message)
        } else {
            OdmError::MongoDB(message)
        }
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for OdmError {
    fn from(err: bson::ser::Error) -> Self {
        OdmError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for OdmError {
    fn from(err: bson::de::Error) -> Self {
        OdmError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}
