//! Query sets: the persistence engine.
//!
//! A [`QuerySet`] binds a schema to a database handle, accumulates filters,
//! projection, ordering and paging, and executes CRUD operations through the
//! storage backend. Filters are translated to storage form once, right before
//! execution, and `find_all`, `count`, `update` and `remove` clear them
//! afterwards.

use bson::oid::ObjectId;
use bson::{doc, Bson, Document as BsonDocument};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::backend::{IndexSpec, UpdateOutcome};
use crate::config::get_config;
use crate::connection::{get_connection, Database};
use crate::document::Document;
use crate::fields::now;
use crate::query::{id_filter, plain_bson, resolve_path, Direction, FindQuery, Q};
use crate::schema::Schema;
use crate::validation::validate_query;
use crate::value::Value;
use crate::{OdmError, Result};

/// Field selection applied when loading documents
#[derive(Debug, Clone, PartialEq)]
enum Projection {
    Only(Vec<String>),
    Exclude(Vec<String>),
}

/// Query and persistence operations for one schema
#[derive(Debug, Clone)]
pub struct QuerySet {
    schema: Arc<Schema>,
    db: Database,
    filters: Option<Q>,
    projection: Option<Projection>,
    order: Vec<(String, Direction)>,
    skip: Option<u64>,
    limit: Option<i64>,
    depth: Option<usize>,
}

impl QuerySet {
    pub fn new(schema: Arc<Schema>, db: Database) -> Self {
        Self {
            schema,
            db,
            filters: None,
            projection: None,
            order: Vec::new(),
            skip: None,
            limit: None,
            depth: None,
        }
    }

    /// Query set on the default database of a registered alias
    pub fn for_alias(schema: Arc<Schema>, alias: &str) -> Result<Self> {
        Ok(Self::new(schema, get_connection(alias, None)?))
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // =====================
    // Builders
    // =====================

    /// Add a filter; successive filters are combined with AND
    pub fn filter(mut self, q: Q) -> Self {
        self.filters = Some(match self.filters.take() {
            Some(existing) => existing & q,
            None => q,
        });
        self
    }

    /// Load only the named fields; loaded documents are partial
    pub fn only<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(Projection::Only(fields.into_iter().map(Into::into).collect()));
        self
    }

    /// Load every field except the named ones; loaded documents are partial
    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(Projection::Exclude(fields.into_iter().map(Into::into).collect()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push((field.into(), direction));
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reference depth for eager loading
    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    // =====================
    // Writes
    // =====================

    /// Build a document from `values` and save it
    pub async fn create<K, V, I>(&self, values: I) -> Result<Document>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut doc = Document::with_values(self.schema.clone(), values)?;
        self.save(&mut doc).await?;
        Ok(doc)
    }

    /// Insert a new document or replace a stored one by identity
    #[instrument(skip(self, doc), fields(schema = self.schema.name()))]
    pub async fn save(&self, doc: &mut Document) -> Result<()> {
        if doc.is_partly_loaded() {
            return Err(OdmError::PartlyLoaded {
                document: self.schema.name().to_string(),
            });
        }

        let inserting = doc.id().is_none();
        doc.apply_timestamps(inserting, now());
        doc.validate()?;
        self.ensure_index().await?;

        let son = doc.to_son()?;
        let storage = self.db.storage();
        let collection = self.schema.collection();

        match doc.id() {
            None => {
                let id = storage
                    .insert_one(collection, son)
                    .await
                    .map_err(|e| e.into_unique_violation(self.schema.name()))?;
                doc.set_id(inserted_object_id(id)?);
                debug!(id = ?doc.id(), "inserted document");
            }
            Some(id) => {
                let matched = storage
                    .replace_one(collection, id, son)
                    .await
                    .map_err(|e| e.into_unique_violation(self.schema.name()))?;
                if matched == 0 {
                    debug!(%id, "no stored document to replace");
                }
            }
        }
        Ok(())
    }

    /// Insert many documents at once.
    ///
    /// Every document is validated before anything is written; the first
    /// failure aborts the whole batch.
    #[instrument(skip(self, docs), fields(schema = self.schema.name(), count = docs.len()))]
    pub async fn bulk_insert(&self, docs: &mut [Document]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        let stamp = now();
        let mut sons = Vec::with_capacity(docs.len());
        for (index, doc) in docs.iter_mut().enumerate() {
            let batch_error = |source: OdmError| OdmError::BatchValidation {
                index,
                source: Box::new(source),
            };
            if doc.is_partly_loaded() {
                return Err(batch_error(OdmError::PartlyLoaded {
                    document: self.schema.name().to_string(),
                }));
            }
            let inserting = doc.id().is_none();
            doc.apply_timestamps(inserting, stamp);
            doc.validate().map_err(batch_error)?;
            sons.push(doc.to_son().map_err(batch_error)?);
        }

        let ids = self
            .db
            .storage()
            .insert_many(self.schema.collection(), sons)
            .await
            .map_err(|e| e.into_unique_violation(self.schema.name()))?;

        for (doc, id) in docs.iter_mut().zip(ids) {
            doc.set_id(inserted_object_id(id)?);
        }
        Ok(())
    }

    /// `$set` the given field values on every document matching the filters
    #[instrument(skip(self, definition), fields(schema = self.schema.name()))]
    pub async fn update<K, V, I>(&mut self, definition: I) -> Result<UpdateOutcome>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let filter = self.take_filter()?;
        let mut set = BsonDocument::new();
        for (name, value) in definition {
            let (name, value) = (name.into(), value.into());
            let resolved = resolve_path(&self.schema, &name)?;
            let bson = match resolved.field {
                Some(field) => {
                    if !field.validate(&value) {
                        return Err(OdmError::invalid_field(
                            self.schema.name(),
                            name,
                            value.to_string(),
                            "failed validation",
                        ));
                    }
                    field.to_storage(&value)?
                }
                None => plain_bson(&value)?,
            };
            set.insert(resolved.key, bson);
        }

        let outcome = self
            .db
            .storage()
            .update_many(self.schema.collection(), filter, doc! { "$set": set })
            .await
            .map_err(|e| e.into_unique_violation(self.schema.name()))?;
        debug!(count = outcome.count, "updated documents");
        Ok(outcome)
    }

    /// Delete `instance` by identity, or everything matching the filters.
    ///
    /// Returns the number of documents deleted.
    #[instrument(skip(self, instance), fields(schema = self.schema.name()))]
    pub async fn remove(&mut self, instance: Option<&Document>) -> Result<u64> {
        match instance {
            Some(doc) => match doc.id() {
                Some(id) => {
                    self.db
                        .storage()
                        .delete_one(self.schema.collection(), id_filter(id))
                        .await
                }
                None => Ok(0),
            },
            None => {
                let filter = self.take_filter()?;
                self.db
                    .storage()
                    .delete_many(self.schema.collection(), filter)
                    .await
            }
        }
    }

    /// Ensure an index for every unique or sparse field; returns how many
    #[instrument(skip(self), fields(schema = self.schema.name()))]
    pub async fn ensure_index(&self) -> Result<usize> {
        let mut ensured = 0;
        for (name, field) in self.schema.fields() {
            let options = field.options();
            if !options.unique && !options.sparse {
                continue;
            }
            let index = IndexSpec {
                key: self.schema.storage_key(name).unwrap_or(name).to_string(),
                unique: options.unique,
                sparse: options.sparse,
            };
            self.db
                .storage()
                .create_index(self.schema.collection(), index)
                .await?;
            ensured += 1;
        }
        Ok(ensured)
    }

    // =====================
    // Reads
    // =====================

    /// Fetch one document by identity or by filter; exactly one must be given
    #[instrument(skip(self, filter), fields(schema = self.schema.name()))]
    pub async fn get(&self, id: Option<ObjectId>, filter: Option<Q>) -> Result<Option<Document>> {
        let filter = match (id, filter) {
            (Some(id), None) => id_filter(id),
            (None, Some(q)) => self.translate(&q)?,
            (None, None) => {
                return Err(OdmError::Runtime(
                    "Either an id or a filter must be provided to get".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(OdmError::Runtime(
                    "Only one of an id or a filter can be provided to get".to_string(),
                ))
            }
        };

        let (projection, loaded_fields) = self.projection_document()?;
        let found = self
            .db
            .storage()
            .find_one(self.schema.collection(), filter, projection)
            .await?;

        match found {
            Some(son) => {
                let mut doc = self.load_document(&son, loaded_fields)?;
                if !self.schema.is_lazy() {
                    doc.load_references(&self.db, self.reference_depth()).await?;
                }
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    pub async fn get_by_id(&self, id: ObjectId) -> Result<Option<Document>> {
        self.get(Some(id), None).await
    }

    /// Documents matching the filters, in order, up to the limit.
    ///
    /// References are loaded when `lazy` is `Some(false)` or the schema is
    /// not lazy.
    #[instrument(skip(self), fields(schema = self.schema.name()))]
    pub async fn find_all(&mut self, lazy: Option<bool>) -> Result<Vec<Document>> {
        let filter = self.take_filter()?;
        let (projection, loaded_fields) = self.projection_document()?;

        let limit = self.limit.unwrap_or_else(|| get_config().default_limit);
        let mut query = FindQuery::new(self.schema.collection())
            .filter(filter)
            .limit(limit);
        if let Some(projection) = projection {
            query = query.projection(projection);
        }
        if let Some(sort) = self.sort_document()? {
            query = query.sort(sort);
        }
        if let Some(skip) = self.skip {
            query = query.skip(skip);
        }

        let sons = self.db.storage().find(query).await?;
        let eager = lazy == Some(false) || !self.schema.is_lazy();
        let depth = self.reference_depth();

        let mut docs = Vec::with_capacity(sons.len());
        for son in &sons {
            let mut doc = self.load_document(son, loaded_fields.clone())?;
            if eager {
                doc.load_references(&self.db, depth).await?;
            }
            docs.push(doc);
        }
        debug!(found = docs.len(), "found documents");
        Ok(docs)
    }

    /// Number of documents matching the filters
    #[instrument(skip(self), fields(schema = self.schema.name()))]
    pub async fn count(&mut self) -> Result<u64> {
        let filter = self.take_filter()?;
        self.db
            .storage()
            .count(self.schema.collection(), filter)
            .await
    }

    // =====================
    // Helpers
    // =====================

    fn translate(&self, q: &Q) -> Result<BsonDocument> {
        let filter = q.to_query(&self.schema)?;
        if get_config().validate_queries {
            validate_query(&Bson::Document(filter.clone()))?;
        }
        Ok(filter)
    }

    /// Translate and clear the accumulated filters
    fn take_filter(&mut self) -> Result<BsonDocument> {
        match self.filters.take() {
            Some(q) => self.translate(&q),
            None => Ok(BsonDocument::new()),
        }
    }

    fn reference_depth(&self) -> usize {
        self.depth.unwrap_or_else(|| get_config().reference_depth)
    }

    /// Projection document and the attribute names it loads
    fn projection_document(&self) -> Result<(Option<BsonDocument>, Option<Vec<String>>)> {
        let Some(projection) = &self.projection else {
            return Ok((None, None));
        };

        let mut out = BsonDocument::new();
        let loaded = match projection {
            Projection::Only(names) => {
                for name in names {
                    out.insert(resolve_path(&self.schema, name)?.key, 1);
                }
                names.clone()
            }
            Projection::Exclude(names) => {
                for name in names {
                    out.insert(resolve_path(&self.schema, name)?.key, 0);
                }
                self.schema
                    .fields()
                    .map(|(name, _)| name.to_string())
                    .filter(|name| !names.contains(name))
                    .collect()
            }
        };
        Ok((Some(out), Some(loaded)))
    }

    fn sort_document(&self) -> Result<Option<BsonDocument>> {
        if self.order.is_empty() {
            return Ok(None);
        }
        let mut sort = BsonDocument::new();
        for (name, direction) in &self.order {
            sort.insert(resolve_path(&self.schema, name)?.key, direction.as_i32());
        }
        Ok(Some(sort))
    }

    fn load_document(
        &self,
        son: &BsonDocument,
        loaded_fields: Option<Vec<String>>,
    ) -> Result<Document> {
        match loaded_fields {
            Some(fields) => Document::from_partial_son(self.schema.clone(), son, fields),
            None => Document::from_son(self.schema.clone(), son),
        }
    }
}

fn inserted_object_id(id: Bson) -> Result<ObjectId> {
    match id {
        Bson::ObjectId(id) => Ok(id),
        other => Err(OdmError::Database(format!(
            "Invalid inserted ID: {}",
            other
        ))),
    }
}
