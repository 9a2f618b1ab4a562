//! List, embedded-document and reference fields.

use bson::Bson;
use std::sync::Arc;

use super::{field_options, unsupported_bson, unsupported_value, Field, FieldOptions, FieldShape};
use crate::document::Document;
use crate::schema::Schema;
use crate::value::{Reference, Value};
use crate::Result;

/// Ordered list whose items follow the contract of `item`
#[derive(Debug, Clone)]
pub struct ListField {
    options: FieldOptions,
    item: Arc<dyn Field>,
}

impl ListField {
    pub fn new(item: impl Field + 'static) -> Self {
        Self {
            options: FieldOptions::default(),
            item: Arc::new(item),
        }
    }

    pub fn item(&self) -> &dyn Field {
        self.item.as_ref()
    }
}

impl Field for ListField {
    fn kind(&self) -> &'static str {
        "ListField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn shape(&self) -> FieldShape<'_> {
        FieldShape::List(self.item.as_ref())
    }

    fn validate_value(&self, value: &Value) -> bool {
        match value {
            Value::List(items) => items.iter().all(|item| self.item.validate(item)),
            _ => false,
        }
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        match value {
            Value::List(items) => items
                .iter()
                .map(|item| self.item.to_storage(item))
                .collect::<Result<Vec<_>>>()
                .map(Bson::Array),
            other => Err(unsupported_value(self.kind(), other)),
        }
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::Array(items) => items
                .iter()
                .map(|item| self.item.from_storage(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

/// Nested document of a fixed schema, stored inline without identity
#[derive(Debug, Clone)]
pub struct EmbeddedDocumentField {
    options: FieldOptions,
    schema: Arc<Schema>,
}

impl EmbeddedDocumentField {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            options: FieldOptions::default(),
            schema,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

impl Field for EmbeddedDocumentField {
    fn kind(&self) -> &'static str {
        "EmbeddedDocumentField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn shape(&self) -> FieldShape<'_> {
        FieldShape::Embedded(&self.schema)
    }

    fn validate_value(&self, value: &Value) -> bool {
        match value {
            Value::Embedded(doc) => {
                doc.schema().name() == self.schema.name() && doc.validate().is_ok()
            }
            _ => false,
        }
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        match value {
            Value::Embedded(doc) => Ok(Bson::Document(doc.to_son()?)),
            other => Err(unsupported_value(self.kind(), other)),
        }
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::Document(son) => {
                Document::from_son(self.schema.clone(), son)
                    .map(|doc| Value::Embedded(Box::new(doc)))
            }
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

/// Identity of a document of the schema registered as `target`
#[derive(Debug, Clone)]
pub struct ReferenceField {
    options: FieldOptions,
    target: String,
}

impl ReferenceField {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            options: FieldOptions::default(),
            target: target.into(),
        }
    }

    /// Registered name of the referenced schema
    pub fn target(&self) -> &str {
        &self.target
    }

    fn identity(&self, value: &Value) -> Option<bson::oid::ObjectId> {
        match value {
            Value::Reference(Reference::Id(id)) => Some(*id),
            Value::Reference(Reference::Loaded(doc)) if doc.schema().name() == self.target => {
                doc.id()
            }
            Value::ObjectId(id) => Some(*id),
            _ => None,
        }
    }
}

impl Field for ReferenceField {
    fn kind(&self) -> &'static str {
        "ReferenceField"
    }

    fn options(&self) -> &FieldOptions {
        &self.options
    }

    fn shape(&self) -> FieldShape<'_> {
        FieldShape::Reference(&self.target)
    }

    fn validate_value(&self, value: &Value) -> bool {
        self.identity(value).is_some()
    }

    fn serialize(&self, value: &Value) -> Result<Bson> {
        self.identity(value)
            .map(Bson::ObjectId)
            .ok_or_else(|| unsupported_value(self.kind(), value))
    }

    fn deserialize(&self, bson: &Bson) -> Result<Value> {
        match bson {
            Bson::ObjectId(id) => Ok(Value::Reference(Reference::Id(*id))),
            other => Err(unsupported_bson(self.kind(), other)),
        }
    }
}

field_options!(ListField, EmbeddedDocumentField, ReferenceField);
