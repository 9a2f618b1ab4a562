//! Document schemas and the schema registry.
//!
//! A [`Schema`] is the static description of a document type: its ordered
//! fields, collection and reference laziness. Schemas are assembled with
//! [`SchemaBuilder`]; registering one makes it resolvable by name, which is
//! how reference fields find their target collection.

use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::fields::Field;
use crate::validation::{ValidatedCollectionName, ValidatedFieldName};
use crate::{OdmError, Result};

/// Process-wide name → schema registry
static REGISTRY: Lazy<RwLock<HashMap<String, Arc<Schema>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Static description of a document type
pub struct Schema {
    name: String,
    collection: String,
    fields: Vec<(String, Arc<dyn Field>)>,
    lazy: bool,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Document type name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether references stay unresolved by default when loading
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    /// Fields in declaration order (inherited fields first)
    pub fn fields(&self) -> impl Iterator<Item = (&str, &dyn Field)> {
        self.fields
            .iter()
            .map(|(name, field)| (name.as_str(), field.as_ref()))
    }

    pub fn field(&self, name: &str) -> Option<&dyn Field> {
        self.fields
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, field)| field.as_ref())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Storage key of an attribute
    pub fn storage_key(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(name, field)| field.options().db_field.as_deref().unwrap_or(name))
    }

    /// Attribute stored under `key`
    pub fn field_by_storage_key(&self, key: &str) -> Option<(&str, &dyn Field)> {
        self.fields
            .iter()
            .find(|(name, field)| field.options().db_field.as_deref().unwrap_or(name) == key)
            .map(|(name, field)| (name.as_str(), field.as_ref()))
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field(
                "fields",
                &self.fields.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("lazy", &self.lazy)
            .finish()
    }
}

/// Builder for [`Schema`]
///
/// # Example
///
/// ```ignore
/// use motor_odm::fields::{IntField, StringField};
/// use motor_odm::schema::SchemaBuilder;
///
/// let base = SchemaBuilder::new("Person")
///     .field("name", StringField::new().required())
///     .build()?;
///
/// let employee = SchemaBuilder::new("Employee")
///     .inherit(&base)
///     .field("salary", IntField::new())
///     .register()?;
/// ```
pub struct SchemaBuilder {
    name: String,
    collection: Option<String>,
    fields: Vec<(String, Arc<dyn Field>)>,
    lazy: bool,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            fields: Vec::new(),
            lazy: true,
        }
    }

    /// Collection name; defaults to the type name
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Add a field; a field with the same name is replaced in place
    pub fn field(mut self, name: impl Into<String>, field: impl Field + 'static) -> Self {
        self.put(name.into(), Arc::new(field));
        self
    }

    /// Copy the parent's fields; they keep their position ahead of fields added later
    pub fn inherit(mut self, parent: &Schema) -> Self {
        for (name, field) in &parent.fields {
            self.put(name.clone(), field.clone());
        }
        self
    }

    /// Default reference laziness for documents of this schema
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    fn put(&mut self, name: String, field: Arc<dyn Field>) {
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = field,
            None => self.fields.push((name, field)),
        }
    }

    pub fn build(self) -> Result<Arc<Schema>> {
        if self.name.is_empty() {
            return Err(OdmError::Configuration(
                "Schema name cannot be empty".to_string(),
            ));
        }

        let collection = self.collection.unwrap_or_else(|| self.name.clone());
        let collection = ValidatedCollectionName::new(&collection)?.into_string();

        let mut keys = HashSet::new();
        for (name, field) in &self.fields {
            ValidatedFieldName::new(name)?;
            let key = field.options().db_field.as_deref().unwrap_or(name);
            ValidatedFieldName::new(key)?;
            if !keys.insert(key.to_string()) {
                return Err(OdmError::Configuration(format!(
                    "{} declares storage key '{}' more than once",
                    self.name, key
                )));
            }
        }

        Ok(Arc::new(Schema {
            name: self.name,
            collection,
            fields: self.fields,
            lazy: self.lazy,
        }))
    }

    /// Build and register under the schema name, replacing any previous entry
    pub fn register(self) -> Result<Arc<Schema>> {
        let schema = self.build()?;
        register(schema.clone())?;
        Ok(schema)
    }
}

/// Register a schema under its name
pub fn register(schema: Arc<Schema>) -> Result<()> {
    let mut registry = REGISTRY
        .write()
        .map_err(|e| OdmError::Internal(format!("Schema registry lock poisoned: {}", e)))?;
    debug!(schema = schema.name(), collection = schema.collection(), "registering schema");
    registry.insert(schema.name().to_string(), schema);
    Ok(())
}

/// Look up a registered schema by name
pub fn lookup(name: &str) -> Result<Arc<Schema>> {
    let registry = REGISTRY
        .read()
        .map_err(|e| OdmError::Internal(format!("Schema registry lock poisoned: {}", e)))?;
    registry
        .get(name)
        .cloned()
        .ok_or_else(|| OdmError::Configuration(format!("Schema '{}' is not registered", name)))
}
