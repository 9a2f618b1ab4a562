//! Document instances.
//!
//! A [`Document`] is one instance of a [`Schema`]: a value per field, an
//! identity assigned on first insert and, for documents loaded with a
//! projection, the set of fields that were actually fetched.

use bson::oid::ObjectId;
use bson::{Bson, Document as BsonDocument};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::connection::Database;
use crate::fields::FieldShape;
use crate::queryset::QuerySet;
use crate::schema::Schema;
use crate::value::Value;
use crate::{OdmError, Result};

/// Instance of a schema
#[derive(Clone)]
pub struct Document {
    schema: Arc<Schema>,
    id: Option<ObjectId>,
    values: HashMap<String, Value>,
    partly_loaded: bool,
    loaded_fields: Option<Vec<String>>,
}

impl Document {
    /// New document with defaults applied to every field
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = schema
            .fields()
            .map(|(name, field)| {
                let value = field
                    .options()
                    .default
                    .as_ref()
                    .map(|default| default.produce())
                    .unwrap_or_default();
                (name.to_string(), value)
            })
            .collect();
        Self {
            schema,
            id: None,
            values,
            partly_loaded: false,
            loaded_fields: None,
        }
    }

    /// New document with defaults, then the given values
    pub fn with_values<K, V, I>(schema: Arc<Schema>, values: I) -> Result<Self>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut doc = Self::new(schema);
        for (name, value) in values {
            doc.set(name, value)?;
        }
        Ok(doc)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Identity; `None` until first saved
    pub fn id(&self) -> Option<ObjectId> {
        self.id
    }

    pub fn set_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }

    /// Value of a field, `None` for names the schema does not declare
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.values.get_mut(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let name = name.into();
        if !self.schema.has_field(&name) {
            return Err(OdmError::Validation(format!(
                "{} has no field '{}'",
                self.schema.name(),
                name
            )));
        }
        self.values.insert(name, value.into());
        Ok(())
    }

    /// True if loaded with `only`/`exclude`; such documents can't be saved
    pub fn is_partly_loaded(&self) -> bool {
        self.partly_loaded
    }

    /// Fields fetched by the projection of a partial load
    pub fn loaded_fields(&self) -> Option<&[String]> {
        self.loaded_fields.as_deref()
    }

    /// Checks every field, reporting the first failure
    pub fn validate(&self) -> Result<()> {
        for (name, field) in self.schema.fields() {
            let value = self.values.get(name).unwrap_or(&Value::Null);
            if field.validate(value) {
                continue;
            }
            let reason = if value.is_null() {
                "is required"
            } else {
                "failed validation"
            };
            return Err(OdmError::invalid_field(
                self.schema.name(),
                name,
                value.to_string(),
                reason,
            ));
        }
        Ok(())
    }

    /// Storage representation, keyed by storage keys
    pub fn to_son(&self) -> Result<BsonDocument> {
        let mut son = BsonDocument::new();
        if let Some(id) = self.id {
            son.insert("_id", id);
        }
        for (name, field) in self.schema.fields() {
            let value = self.values.get(name).unwrap_or(&Value::Null);
            if value.is_null() && field.options().sparse {
                continue;
            }
            let key = self.schema.storage_key(name).unwrap_or(name);
            son.insert(key, field.to_storage(value)?);
        }
        Ok(son)
    }

    /// Load a full document from its storage representation
    pub fn from_son(schema: Arc<Schema>, son: &BsonDocument) -> Result<Self> {
        let mut doc = Self::new(schema);
        doc.load(son)?;
        Ok(doc)
    }

    /// Load a document fetched with a projection over `loaded_fields`
    pub(crate) fn from_partial_son(
        schema: Arc<Schema>,
        son: &BsonDocument,
        loaded_fields: Vec<String>,
    ) -> Result<Self> {
        let values = schema
            .fields()
            .map(|(name, _)| (name.to_string(), Value::Null))
            .collect();
        let mut doc = Self {
            schema,
            id: None,
            values,
            partly_loaded: true,
            loaded_fields: Some(loaded_fields),
        };
        doc.load(son)?;
        Ok(doc)
    }

    fn load(&mut self, son: &BsonDocument) -> Result<()> {
        let schema = self.schema.clone();
        for (key, bson) in son {
            if key == "_id" {
                match bson {
                    Bson::ObjectId(id) => self.id = Some(*id),
                    other => debug!(
                        schema = schema.name(),
                        id = %other,
                        "ignoring non-ObjectId identity"
                    ),
                }
                continue;
            }
            match schema.field_by_storage_key(key) {
                Some((name, field)) => {
                    let value = field.from_storage(bson)?;
                    self.values.insert(name.to_string(), value);
                }
                None => debug!(schema = schema.name(), key = %key, "ignoring unknown stored key"),
            }
        }
        Ok(())
    }

    /// Apply automatic timestamps, recursing into embedded documents.
    ///
    /// Insert-time fields are set when `inserting`; in embedded documents
    /// they are also set while still empty. Update-time fields are always set.
    pub(crate) fn apply_timestamps(&mut self, inserting: bool, now: NaiveDateTime) {
        self.apply_timestamps_nested(inserting, false, now);
    }

    fn apply_timestamps_nested(&mut self, inserting: bool, embedded: bool, now: NaiveDateTime) {
        let schema = self.schema.clone();
        for (name, field) in schema.fields() {
            let Some(value) = self.values.get_mut(name) else {
                continue;
            };

            let policy = field.timestamp_policy();
            if policy.on_update
                || (policy.on_insert && (inserting || (embedded && value.is_null())))
            {
                *value = Value::DateTime(now);
                continue;
            }

            match (field.shape(), value) {
                (FieldShape::Embedded(_), Value::Embedded(doc)) => {
                    doc.apply_timestamps_nested(inserting, true, now)
                }
                (FieldShape::List(_), Value::List(items)) => {
                    for item in items {
                        if let Value::Embedded(doc) = item {
                            doc.apply_timestamps_nested(inserting, true, now);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Insert or replace this document
    pub async fn save(&mut self, db: &Database) -> Result<()> {
        QuerySet::new(self.schema.clone(), db.clone()).save(self).await
    }

    /// Delete this document by identity; returns the number deleted
    pub async fn delete(&self, db: &Database) -> Result<u64> {
        QuerySet::new(self.schema.clone(), db.clone())
            .remove(Some(self))
            .await
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name()
            && self.id == other.id
            && self.schema.fields().all(|(name, _)| {
                self.values.get(name).unwrap_or(&Value::Null)
                    == other.values.get(name).unwrap_or(&Value::Null)
            })
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct(self.schema.name());
        out.field("_id", &self.id);
        for (name, _) in self.schema.fields() {
            out.field(name, self.values.get(name).unwrap_or(&Value::Null));
        }
        if self.partly_loaded {
            out.field("loaded_fields", &self.loaded_fields);
        }
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{DateTimeField, EmbeddedDocumentField, IntField, StringField};
    use crate::schema::SchemaBuilder;
    use bson::doc;
    use chrono::NaiveDate;

    fn user_schema() -> Arc<Schema> {
        SchemaBuilder::new("DocUser")
            .field("name", StringField::new().required().db_field("n"))
            .field("age", IntField::new().default(18))
            .field("nick", StringField::new().sparse())
            .build()
            .unwrap()
    }

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let doc = Document::new(user_schema());
        assert_eq!(doc.get("age"), Some(&Value::Int(18)));
        assert_eq!(doc.get("name"), Some(&Value::Null));
        assert_eq!(doc.get("missing"), None);
        assert!(doc.id().is_none());
    }

    #[test]
    fn test_set_unknown_field_fails() {
        let mut doc = Document::new(user_schema());
        assert!(doc.set("missing", 1).is_err());
        assert!(doc.set("name", "Bernardo").is_ok());
    }

    #[test]
    fn test_validate_reports_field() {
        let doc = Document::new(user_schema());
        match doc.validate().unwrap_err() {
            OdmError::InvalidField { document, field, reason, .. } => {
                assert_eq!(document, "DocUser");
                assert_eq!(field, "name");
                assert_eq!(reason, "is required");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let doc = Document::with_values(user_schema(), [("name", Value::Int(3))]).unwrap();
        let err = doc.validate().unwrap_err();
        assert!(err.to_string().contains("failed validation"));
        assert!(err.to_string().contains("3"));
    }

    #[test]
    fn test_to_son_and_back() {
        let mut doc = Document::with_values(user_schema(), [("name", "Bernardo")]).unwrap();
        let id = ObjectId::new();
        doc.set_id(id);

        let son = doc.to_son().unwrap();
        assert_eq!(son, doc! { "_id": id, "n": "Bernardo", "age": 18_i64 });

        let loaded = Document::from_son(user_schema(), &son).unwrap();
        assert_eq!(loaded, doc);
        assert!(!loaded.is_partly_loaded());
    }

    #[test]
    fn test_from_son_ignores_unknown_keys() {
        let son = doc! { "n": "a", "legacy": true };
        let loaded = Document::from_son(user_schema(), &son).unwrap();
        assert_eq!(loaded.get("name"), Some(&Value::from("a")));
    }

    #[test]
    fn test_partial_load() {
        let son = doc! { "_id": ObjectId::new(), "n": "a" };
        let loaded = Document::from_partial_son(user_schema(), &son, vec!["name".into()]).unwrap();
        assert!(loaded.is_partly_loaded());
        assert_eq!(loaded.loaded_fields(), Some(&["name".to_string()][..]));
        assert_eq!(loaded.get("age"), Some(&Value::Null));
    }

    #[test]
    fn test_timestamps() {
        let inner = SchemaBuilder::new("DocStamped")
            .field("created", DateTimeField::new().auto_now_on_insert())
            .build()
            .unwrap();
        let outer = SchemaBuilder::new("DocOuter")
            .field("created", DateTimeField::new().auto_now_on_insert())
            .field("updated", DateTimeField::new().auto_now_on_update())
            .field("inner", EmbeddedDocumentField::new(inner.clone()))
            .build()
            .unwrap();

        let mut doc = Document::new(outer);
        doc.set("inner", Document::new(inner.clone())).unwrap();
        doc.apply_timestamps(true, stamp());
        assert_eq!(doc.get("created"), Some(&Value::DateTime(stamp())));
        assert_eq!(doc.get("updated"), Some(&Value::DateTime(stamp())));
        let nested = doc.get("inner").and_then(Value::as_document).unwrap();
        assert_eq!(nested.get("created"), Some(&Value::DateTime(stamp())));

        let later = stamp() + chrono::Duration::seconds(5);
        doc.apply_timestamps(false, later);
        assert_eq!(doc.get("created"), Some(&Value::DateTime(stamp())));
        assert_eq!(doc.get("updated"), Some(&Value::DateTime(later)));

        // newly attached embedded document on an existing parent
        doc.set("inner", Document::new(inner)).unwrap();
        doc.apply_timestamps(false, later);
        let nested = doc.get("inner").and_then(Value::as_document).unwrap();
        assert_eq!(nested.get("created"), Some(&Value::DateTime(later)));
    }
}
