//! Typed field descriptors.
//!
//! Every field type implements [`Field`]: it knows how to validate a
//! [`Value`], convert it to its BSON storage representation and back.
//! Null handling and custom validators are shared by the trait; concrete
//! types only deal with non-null values.
//!
//! # Example
//!
//! ```ignore
//! use motor_odm::fields::{IntField, StringField, UrlField};
//!
//! let name = StringField::new().max_length(50).required();
//! let age = IntField::new().min_value(0).default(0);
//! let homepage = UrlField::new().db_field("url");
//! ```

use bson::Bson;
use std::fmt;
use std::sync::Arc;

use crate::schema::Schema;
use crate::value::Value;
use crate::{OdmError, Result};

mod compound;
mod datetime;
pub mod formats;
mod json;
mod scalar;

pub use compound::{EmbeddedDocumentField, ListField, ReferenceField};
pub use datetime::{now, DateTimeField, DATETIME_FORMAT};
pub use json::{DictField, JsonField};
pub use scalar::{
    BinaryField, BooleanField, DecimalField, EmailField, FloatField, IntField, ObjectIdField,
    StringField, UrlField, UuidField,
};

/// Custom validator run after the type check
pub type ValidatorFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Zero-argument default producer
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Default value of a field
#[derive(Clone)]
pub enum DefaultValue {
    Static(Value),
    Producer(DefaultFn),
}

impl DefaultValue {
    /// Produce the default value
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Static(value) => value.clone(),
            DefaultValue::Producer(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(value) => write!(f, "Static({})", value),
            DefaultValue::Producer(_) => write!(f, "Producer(..)"),
        }
    }
}

/// Options shared by every field type
#[derive(Clone, Default)]
pub struct FieldOptions {
    /// Storage key; the attribute name is used when unset
    pub db_field: Option<String>,
    pub required: bool,
    pub default: Option<DefaultValue>,
    /// Ensure a unique index for this field
    pub unique: bool,
    /// Ensure a sparse index for this field
    pub sparse: bool,
    pub validator: Option<ValidatorFn>,
}

impl fmt::Debug for FieldOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldOptions")
            .field("db_field", &self.db_field)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("unique", &self.unique)
            .field("sparse", &self.sparse)
            .field("validator", &self.validator.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Automatic timestamp behaviour applied by the queryset on save
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampPolicy {
    pub on_insert: bool,
    pub on_update: bool,
}

impl TimestampPolicy {
    pub fn is_active(&self) -> bool {
        self.on_insert || self.on_update
    }
}

/// Structural view of a field, used to walk nested values
pub enum FieldShape<'a> {
    Scalar,
    List(&'a dyn Field),
    Embedded(&'a Arc<Schema>),
    /// Name of the referenced schema
    Reference(&'a str),
}

/// Core trait for field descriptors
pub trait Field: fmt::Debug + Send + Sync {
    /// Field type name used in diagnostics (e.g. "StringField")
    fn kind(&self) -> &'static str;

    fn options(&self) -> &FieldOptions;

    /// Type-specific check for a non-null value
    fn validate_value(&self, value: &Value) -> bool;

    /// Convert a non-null value to BSON
    fn serialize(&self, value: &Value) -> Result<Bson>;

    /// Convert non-null BSON to a value
    fn deserialize(&self, bson: &Bson) -> Result<Value>;

    fn shape(&self) -> FieldShape<'_> {
        FieldShape::Scalar
    }

    fn timestamp_policy(&self) -> TimestampPolicy {
        TimestampPolicy::default()
    }

    /// Returns true if `value` satisfies this field's contract.
    ///
    /// `Null` is accepted unless the field is required.
    fn validate(&self, value: &Value) -> bool {
        if value.is_null() {
            return !self.options().required;
        }
        if !self.validate_value(value) {
            return false;
        }
        match &self.options().validator {
            Some(validator) => validator(value),
            None => true,
        }
    }

    fn to_storage(&self, value: &Value) -> Result<Bson> {
        if value.is_null() {
            return Ok(Bson::Null);
        }
        self.serialize(value)
    }

    fn from_storage(&self, bson: &Bson) -> Result<Value> {
        if matches!(bson, Bson::Null | Bson::Undefined) {
            return Ok(Value::Null);
        }
        self.deserialize(bson)
    }
}

/// Error for a value a field cannot store
pub(crate) fn unsupported_value(kind: &str, value: &Value) -> OdmError {
    OdmError::Validation(format!("{} cannot store {} value {}", kind, value.type_name(), value))
}

/// Error for a storage value a field cannot load
pub(crate) fn unsupported_bson(kind: &str, bson: &Bson) -> OdmError {
    OdmError::Deserialization(format!("{} cannot load {:?}", kind, bson.element_type()))
}

/// Generates the option setters shared by every field type
macro_rules! field_options {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                /// Store this field under a different key
                pub fn db_field(mut self, name: impl Into<String>) -> Self {
                    self.options.db_field = Some(name.into());
                    self
                }

                pub fn required(mut self) -> Self {
                    self.options.required = true;
                    self
                }

                pub fn default(mut self, value: impl Into<$crate::value::Value>) -> Self {
                    self.options.default = Some($crate::fields::DefaultValue::Static(value.into()));
                    self
                }

                /// Default computed on every new document
                pub fn default_with<F>(mut self, producer: F) -> Self
                where
                    F: Fn() -> $crate::value::Value + Send + Sync + 'static,
                {
                    self.options.default =
                        Some($crate::fields::DefaultValue::Producer(std::sync::Arc::new(producer)));
                    self
                }

                pub fn unique(mut self) -> Self {
                    self.options.unique = true;
                    self
                }

                pub fn sparse(mut self) -> Self {
                    self.options.sparse = true;
                    self
                }

                pub fn validator<F>(mut self, validator: F) -> Self
                where
                    F: Fn(&$crate::value::Value) -> bool + Send + Sync + 'static,
                {
                    self.options.validator = Some(std::sync::Arc::new(validator));
                    self
                }
            }
        )*
    };
}

pub(crate) use field_options;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_value_producer() {
        let default = DefaultValue::Producer(Arc::new(|| Value::Int(7)));
        assert_eq!(default.produce(), Value::Int(7));
        assert_eq!(DefaultValue::Static(Value::from("x")).produce(), Value::from("x"));
    }

    #[test]
    fn test_null_handling_is_shared() {
        let optional = StringField::new();
        assert!(optional.validate(&Value::Null));
        assert_eq!(optional.to_storage(&Value::Null).unwrap(), Bson::Null);
        assert_eq!(optional.from_storage(&Bson::Null).unwrap(), Value::Null);

        let required = StringField::new().required();
        assert!(!required.validate(&Value::Null));
    }

    #[test]
    fn test_custom_validator_runs_after_type_check() {
        let field = IntField::new().validator(|v| v.as_i64().map(|i| i % 2 == 0).unwrap_or(false));
        assert!(field.validate(&Value::Int(4)));
        assert!(!field.validate(&Value::Int(3)));
        assert!(!field.validate(&Value::from("four")));
        // validators never see null
        assert!(field.validate(&Value::Null));
    }
}
