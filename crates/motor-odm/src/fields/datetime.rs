//! Date-time field with automatic timestamp policies.

use bson::Bson;
use chrono::{DateTime, NaiveDateTime, Utc};

use super::{
    field_options, unsupported_bson, unsupported_value, Field, FieldOptions, TimestampPolicy,
};
use crate::value::Value;
use crate::{OdmError, Result};

/// Text format accepted for date-time values
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current UTC time at storage precision (milliseconds)
pub fn now() -> NaiveDateTime {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp_millis(now.timestamp_millis())
        .unwrap_or(now)
        .naive_utc()
}

/// Naive UTC date-time.
///
/// Stored as a BSON datetime, so sub-millisecond precision is dropped.
#[derive(Debug, Clone)]
pub struct DateTimeField {
    options: FieldOptions,
    policy: TimestampPolicy,
}

impl DateTimeField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
            policy: TimestampPolicy::default(),
        }
    }

    /// Set to the current time when a document is first saved
    pub fn auto_now_on_insert(mut self) -> Self {
        self.policy.on_insert = true;
        self
    }

    /// Set to the current time on every save
    pub fn auto_now_on_update(mut self) -> Self {
        self.policy.on_update = true;
        self
    }

    fn coerce(value: &Value) -> Option<NaiveDateTime> {
        match value {
            Value::DateTime(dt) => Some(*dt),
            Value::String(s) => NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).ok(),
            _ => None,
        }
    }
}

impl Field for DateTimeField {
    fn kind(&self) -> &'static str {
        "DateTimeField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn timestamp_policy(&self) -> TimestampPolicy {
        self.policy
    }

    fn validate_value(&self, value: &Value) -> bool {
        Self::coerce(value).is_some()
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        let dt = Self::coerce(value).ok_or_else(|| unsupported_value(self.kind(), value))?;
        Ok(Bson::DateTime(bson::DateTime::from_millis(
            dt.and_utc().timestamp_millis(),
        )))
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::DateTime(dt) => Ok(Value::DateTime(dt.to_chrono().naive_utc())),
            Bson::String(s) => NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
                .map(Value::DateTime)
                .map_err(|e| OdmError::Deserialization(format!("DateTimeField: {}", e))),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

field_options!(DateTimeField);
