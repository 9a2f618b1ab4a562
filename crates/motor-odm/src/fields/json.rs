//! JSON-object fields.
//!
//! Both fields hold a text-keyed JSON object. `JsonField` stores it as
//! canonical JSON text, `DictField` as a native embedded BSON document.

use bson::Bson;
use serde_json::{Map, Value as Json};

use super::{field_options, unsupported_bson, unsupported_value, Field, FieldOptions};
use crate::value::Value;
use crate::{OdmError, Result};

/// Rebuild `json` with every object's keys in sorted order
fn canonical(json: &Json) -> Json {
    match json {
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonical(&map[key.as_str()]));
            }
            Json::Object(sorted)
        }
        Json::Array(items) => Json::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

fn object_from_bson_document(kind: &str, bson: &Bson) -> Result<Value> {
    match bson.clone().into_relaxed_extjson() {
        json @ Json::Object(_) => Ok(Value::Json(json)),
        _ => Err(unsupported_bson(kind, bson)),
    }
}

/// JSON object stored as canonical text
#[derive(Debug, Clone)]
pub struct JsonField {
    options: FieldOptions,
}

impl JsonField {
    pub fn new() -> Self {
        Self { options: FieldOptions::default() }
    }
}

impl Field for JsonField {
    fn kind(&self) -> &'static str {
        "JsonField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn validate_value(&self, value: &Value) -> bool {
        matches!(value, Value::Json(Json::Object(_)))
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        match value {
            Value::Json(json @ Json::Object(_)) => {
                Ok(Bson::String(serde_json::to_string(&canonical(json))?))
            }
            other => Err(unsupported_value(self.kind(), other)),
        }
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::String(text) => match serde_json::from_str::<Json>(text) {
                Ok(json @ Json::Object(_)) => Ok(Value::Json(json)),
                Ok(_) => Err(OdmError::Deserialization(
                    "JsonField expects a JSON object".to_string(),
                )),
                Err(e) => Err(OdmError::Deserialization(format!("JsonField: {}", e))),
            },
            Bson::Document(_) => object_from_bson_document(self.kind(), bson),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

/// JSON object stored as an embedded BSON document.
///
/// Numbers must fit in a 64-bit signed integer or a double.
#[derive(Debug, Clone)]
pub struct DictField {
    options: FieldOptions,
}

impl DictField {
    pub fn new() -> Self {
        Self { options: FieldOptions::default() }
    }

    fn representable(json: &Json) -> bool {
        match json {
            Json::Number(n) => n.is_i64() || n.is_f64(),
            Json::Array(items) => items.iter().all(Self::representable),
            Json::Object(map) => map.values().all(Self::representable),
            _ => true,
        }
    }
}

impl Field for DictField {
    fn kind(&self) -> &'static str {
        "DictField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn validate_value(&self, value: &Value) -> bool {
        match value {
            Value::Json(json @ Json::Object(_)) => Self::representable(json),
            _ => false,
        }
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        match value {
            Value::Json(json @ Json::Object(_)) => Ok(bson::to_bson(json)?),
            other => Err(unsupported_value(self.kind(), other)),
        }
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::Document(_) => object_from_bson_document(self.kind(), bson),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

field_options!(JsonField, DictField);
