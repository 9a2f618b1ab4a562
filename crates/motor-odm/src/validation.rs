//! Input validation for names and translated filters
//!
//! Schemas validate their collection and storage key names when they are
//! built; querysets run translated filters through [`validate_query`] when
//! `OdmConfig::validate_queries` is on.

use bson::Bson;
use tracing::warn;

use crate::{OdmError, Result};

/// Maximum allowed length for collection names (MongoDB limit is 255, we're more conservative)
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Maximum allowed length for storage keys
const MAX_FIELD_NAME_LENGTH: usize = 1024;

/// Operators that execute server-side JavaScript
const DANGEROUS_OPERATORS: &[&str] = &["$where", "$function", "$accumulator"];

/// Collection name checked against MongoDB naming rules
///
/// - Not empty, at most 120 characters
/// - No null bytes or `$`
/// - No "system." prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(OdmError::Configuration(
                "Collection name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(OdmError::Configuration(format!(
                "Collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }

        if name.contains('\0') {
            return Err(OdmError::Configuration(
                "Collection name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with("system.") {
            return Err(OdmError::Configuration(format!(
                "Collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }

        if name.contains('$') {
            return Err(OdmError::Configuration(format!(
                "Collection name cannot contain '$' character: '{}'",
                name
            )));
        }

        if name.contains("..") {
            warn!(collection = name, "collection name contains suspicious pattern");
        }

        Ok(ValidatedCollectionName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn into_string(self) -> String {
        self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Storage key of a schema field
///
/// - Not empty, at most 1024 characters
/// - No null bytes
/// - No `$` prefix and no `.` (keys are single path segments)
/// - `_id` is reserved for the document identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFieldName {
    name: String,
}

impl ValidatedFieldName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(OdmError::Configuration(
                "Field name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_FIELD_NAME_LENGTH {
            return Err(OdmError::Configuration(format!(
                "Field name exceeds maximum length of {} characters",
                MAX_FIELD_NAME_LENGTH
            )));
        }

        if name.contains('\0') {
            return Err(OdmError::Configuration(
                "Field name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with('$') {
            return Err(OdmError::Configuration(format!(
                "Field name cannot start with '$' (reserved for operators): '{}'",
                name
            )));
        }

        if name.contains('.') {
            return Err(OdmError::Configuration(format!(
                "Field name cannot contain '.': '{}'",
                name
            )));
        }

        if name == "_id" {
            return Err(OdmError::Configuration(
                "Field name '_id' is reserved for the document identity".to_string(),
            ));
        }

        Ok(ValidatedFieldName {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn into_string(self) -> String {
        self.name
    }
}

/// Rejects filters containing operators that run server-side JavaScript
pub fn validate_query(query: &Bson) -> Result<()> {
    match query {
        Bson::Document(doc) => {
            for (key, value) in doc.iter() {
                if DANGEROUS_OPERATORS.contains(&key.as_str()) {
                    return Err(OdmError::Query(format!(
                        "Dangerous operator '{}' is not allowed for security reasons",
                        key
                    )));
                }
                validate_query(value)?;
            }
            Ok(())
        }
        Bson::Array(items) => items.iter().try_for_each(validate_query),
        _ => Ok(()),
    }
}
