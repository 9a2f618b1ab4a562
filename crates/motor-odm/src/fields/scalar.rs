//! Scalar field types.

use bson::oid::ObjectId;
use bson::spec::BinarySubtype;
use bson::{Binary, Bson};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use uuid::Uuid;

use super::formats::{validate_email, validate_object_id, validate_url};
use super::{field_options, unsupported_bson, unsupported_value, Field, FieldOptions};
use crate::value::Value;
use crate::{OdmError, Result};

// =====================
// Text
// =====================

/// Text field with an optional maximum length (in characters)
#[derive(Debug, Clone)]
pub struct StringField {
    options: FieldOptions,
    max_length: Option<usize>,
}

impl StringField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
            max_length: None,
        }
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }
}

impl Field for StringField {
    fn kind(&self) -> &'static str {
        "StringField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn validate_value(&self, value: &Value) -> bool {
        match (value, self.max_length) {
            (Value::String(s), Some(max)) => s.chars().count() <= max,
            (Value::String(_), None) => true,
            _ => false,
        }
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        match value {
            Value::String(s) => Ok(Bson::String(s.clone())),
            other => Err(unsupported_value(self.kind(), other)),
        }
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::String(s) => Ok(Value::String(s.clone())),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

/// Email address in `local@domain.tld` form
#[derive(Debug, Clone)]
pub struct EmailField {
    options: FieldOptions,
}

impl EmailField {
    pub fn new() -> Self {
        Self { options: FieldOptions::default() }
    }
}

impl Field for EmailField {
    fn kind(&self) -> &'static str {
        "EmailField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn validate_value(&self, value: &Value) -> bool {
        value.as_str().map(validate_email).unwrap_or(false)
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        match value {
            Value::String(s) => Ok(Bson::String(s.clone())),
            other => Err(unsupported_value(self.kind(), other)),
        }
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::String(s) => Ok(Value::String(s.clone())),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

/// URL with an http(s)/ftp(s) scheme
#[derive(Debug, Clone)]
pub struct UrlField {
    options: FieldOptions,
}

impl UrlField {
    pub fn new() -> Self {
        Self { options: FieldOptions::default() }
    }
}

impl Field for UrlField {
    fn kind(&self) -> &'static str {
        "URLField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn validate_value(&self, value: &Value) -> bool {
        value.as_str().map(validate_url).unwrap_or(false)
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        match value {
            Value::String(s) => Ok(Bson::String(s.clone())),
            other => Err(unsupported_value(self.kind(), other)),
        }
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::String(s) => Ok(Value::String(s.clone())),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

// =====================
// Numbers
// =====================

/// 64-bit integer with optional bounds
#[derive(Debug, Clone)]
pub struct IntField {
    options: FieldOptions,
    min_value: Option<i64>,
    max_value: Option<i64>,
}

impl IntField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
            min_value: None,
            max_value: None,
        }
    }

    pub fn min_value(mut self, min: i64) -> Self {
        self.min_value = Some(min);
        self
    }

    pub fn max_value(mut self, max: i64) -> Self {
        self.max_value = Some(max);
        self
    }

    fn coerce(value: &Value) -> Option<i64> {
        match value {
            Value::Int(i) => Some(*i),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }
}

impl Field for IntField {
    fn kind(&self) -> &'static str {
        "IntField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn validate_value(&self, value: &Value) -> bool {
        match Self::coerce(value) {
            Some(i) => {
                self.min_value.map_or(true, |min| i >= min)
                    && self.max_value.map_or(true, |max| i <= max)
            }
            None => false,
        }
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        Self::coerce(value)
            .map(Bson::Int64)
            .ok_or_else(|| unsupported_value(self.kind(), value))
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::Int32(i) => Ok(Value::Int(*i as i64)),
            Bson::Int64(i) => Ok(Value::Int(*i)),
            Bson::Double(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => {
                Ok(Value::Int(*f as i64))
            }
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

/// Double precision float with optional bounds
#[derive(Debug, Clone)]
pub struct FloatField {
    options: FieldOptions,
    min_value: Option<f64>,
    max_value: Option<f64>,
}

impl FloatField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
            min_value: None,
            max_value: None,
        }
    }

    pub fn min_value(mut self, min: f64) -> Self {
        self.min_value = Some(min);
        self
    }

    pub fn max_value(mut self, max: f64) -> Self {
        self.max_value = Some(max);
        self
    }

    fn coerce(value: &Value) -> Option<f64> {
        match value {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }
}

impl Field for FloatField {
    fn kind(&self) -> &'static str {
        "FloatField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn validate_value(&self, value: &Value) -> bool {
        match Self::coerce(value) {
            Some(f) => {
                self.min_value.map_or(true, |min| f >= min)
                    && self.max_value.map_or(true, |max| f <= max)
            }
            None => false,
        }
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        Self::coerce(value)
            .map(Bson::Double)
            .ok_or_else(|| unsupported_value(self.kind(), value))
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::Double(f) => Ok(Value::Float(*f)),
            Bson::Int32(i) => Ok(Value::Float(*i as f64)),
            Bson::Int64(i) => Ok(Value::Float(*i as f64)),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

/// Fixed-point decimal stored as text quantized to `precision` places.
///
/// Values with more decimal places than `precision` are rounded half away
/// from zero when stored.
#[derive(Debug, Clone)]
pub struct DecimalField {
    options: FieldOptions,
    precision: u32,
    min_value: Option<Decimal>,
    max_value: Option<Decimal>,
}

impl DecimalField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
            precision: 2,
            min_value: None,
            max_value: None,
        }
    }

    /// Number of decimal places kept in storage
    pub fn precision(mut self, places: u32) -> Self {
        self.precision = places;
        self
    }

    pub fn min_value(mut self, min: Decimal) -> Self {
        self.min_value = Some(min);
        self
    }

    pub fn max_value(mut self, max: Decimal) -> Self {
        self.max_value = Some(max);
        self
    }

    fn coerce(value: &Value) -> Option<Decimal> {
        match value {
            Value::Decimal(d) => Some(*d),
            Value::Int(i) => Some(Decimal::from(*i)),
            Value::Float(f) => Decimal::try_from(*f).ok(),
            Value::String(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        }
    }

    fn quantize(&self, value: Decimal) -> Decimal {
        let mut rounded =
            value.round_dp_with_strategy(self.precision, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(self.precision);
        rounded
    }
}

impl Field for DecimalField {
    fn kind(&self) -> &'static str {
        "DecimalField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn validate_value(&self, value: &Value) -> bool {
        match Self::coerce(value) {
            Some(d) => {
                self.min_value.map_or(true, |min| d >= min)
                    && self.max_value.map_or(true, |max| d <= max)
            }
            None => false,
        }
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        let decimal = Self::coerce(value).ok_or_else(|| unsupported_value(self.kind(), value))?;
        Ok(Bson::String(self.quantize(decimal).to_string()))
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        let parsed = match bson {
            Bson::String(s) => Decimal::from_str(s).ok(),
            Bson::Double(f) => Decimal::try_from(*f).ok(),
            Bson::Int32(i) => Some(Decimal::from(*i)),
            Bson::Int64(i) => Some(Decimal::from(*i)),
            Bson::Decimal128(d) => Decimal::from_str(&d.to_string()).ok(),
            other => return Err(unsupported_bson(self.kind(), other)),
        };
        parsed
            .map(Value::Decimal)
            .ok_or_else(|| OdmError::Deserialization(format!("DecimalField cannot parse {}", bson)))
    }
}

// =====================
// Other scalars
// =====================

#[derive(Debug, Clone)]
pub struct BooleanField {
    options: FieldOptions,
}

impl BooleanField {
    pub fn new() -> Self {
        Self { options: FieldOptions::default() }
    }
}

impl Field for BooleanField {
    fn kind(&self) -> &'static str {
        "BooleanField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn validate_value(&self, value: &Value) -> bool {
        matches!(value, Value::Bool(_))
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        match value {
            Value::Bool(b) => Ok(Bson::Boolean(*b)),
            other => Err(unsupported_value(self.kind(), other)),
        }
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::Boolean(b) => Ok(Value::Bool(*b)),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

/// Raw bytes with an optional size limit
#[derive(Debug, Clone)]
pub struct BinaryField {
    options: FieldOptions,
    max_bytes: Option<usize>,
}

impl BinaryField {
    pub fn new() -> Self {
        Self {
            options: FieldOptions::default(),
            max_bytes: None,
        }
    }

    pub fn max_bytes(mut self, max: usize) -> Self {
        self.max_bytes = Some(max);
        self
    }
}

impl Field for BinaryField {
    fn kind(&self) -> &'static str {
        "BinaryField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn validate_value(&self, value: &Value) -> bool {
        match value {
            Value::Binary(bytes) => self.max_bytes.map_or(true, |max| bytes.len() <= max),
            _ => false,
        }
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        match value {
            Value::Binary(bytes) => Ok(Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: bytes.clone(),
            })),
            other => Err(unsupported_value(self.kind(), other)),
        }
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::Binary(bin) => Ok(Value::Binary(bin.bytes.clone())),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

/// UUID stored as hyphenated text
#[derive(Debug, Clone)]
pub struct UuidField {
    options: FieldOptions,
}

impl UuidField {
    pub fn new() -> Self {
        Self { options: FieldOptions::default() }
    }

    fn coerce(value: &Value) -> Option<Uuid> {
        match value {
            Value::Uuid(u) => Some(*u),
            Value::String(s) => Uuid::parse_str(s).ok(),
            _ => None,
        }
    }
}

impl Field for UuidField {
    fn kind(&self) -> &'static str {
        "UUIDField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn validate_value(&self, value: &Value) -> bool {
        Self::coerce(value).is_some()
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        Self::coerce(value)
            .map(|u| Bson::String(u.hyphenated().to_string()))
            .ok_or_else(|| unsupported_value(self.kind(), value))
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::String(s) => Uuid::parse_str(s)
                .map(Value::Uuid)
                .map_err(|e| OdmError::Deserialization(format!("UUIDField: {}", e))),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

/// ObjectId, accepting 24-character hex text on input
#[derive(Debug, Clone)]
pub struct ObjectIdField {
    options: FieldOptions,
}

impl ObjectIdField {
    pub fn new() -> Self {
        Self { options: FieldOptions::default() }
    }

    fn coerce(value: &Value) -> Option<ObjectId> {
        match value {
            Value::ObjectId(oid) => Some(*oid),
            Value::String(s) if validate_object_id(s) => ObjectId::parse_str(s).ok(),
            _ => None,
        }
    }
}

impl Field for ObjectIdField {
    fn kind(&self) -> &'static str {
        "ObjectIdField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn validate_value(&self, value: &Value) -> bool {
        Self::coerce(value).is_some()
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        Self::coerce(value)
            .map(Bson::ObjectId)
            .ok_or_else(|| unsupported_value(self.kind(), value))
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::ObjectId(oid) => Ok(Value::ObjectId(*oid)),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

field_options!(
    StringField,
    EmailField,
    UrlField,
    IntField,
    FloatField,
    DecimalField,
    BooleanField,
    BinaryField,
    UuidField,
    ObjectIdField,
);
