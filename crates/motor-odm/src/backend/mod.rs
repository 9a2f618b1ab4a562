//! Storage backends.
//!
//! The persistence core talks to storage only through [`StorageDatabase`].
//! [`mongo`] drives a MongoDB deployment through the official driver;
//! [`memory`] keeps collections in process and evaluates the same filter
//! syntax, for tests and local development.

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document as BsonDocument};
use std::sync::Arc;

use crate::connection::ConnectionSettings;
use crate::query::FindQuery;
use crate::Result;

pub mod memory;
pub mod mongo;

pub use memory::MemoryConnector;
pub use mongo::MongoConnector;

/// Result of an update-by-filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Number of documents matched by the filter
    pub count: u64,
    /// Whether any document matched before the update
    pub updated_existing: bool,
}

/// Single-field index request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub key: String,
    pub unique: bool,
    pub sparse: bool,
}

impl IndexSpec {
    /// Index name in MongoDB's default form (`key_1`)
    pub fn name(&self) -> String {
        format!("{}_1", self.key)
    }
}

/// Asynchronous operations on one database
#[async_trait]
pub trait StorageDatabase: Send + Sync {
    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        projection: Option<BsonDocument>,
    ) -> Result<Option<BsonDocument>>;

    async fn find(&self, query: FindQuery) -> Result<Vec<BsonDocument>>;

    /// Insert and return the stored identity
    async fn insert_one(&self, collection: &str, doc: BsonDocument) -> Result<Bson>;

    /// Ordered insert; returns identities in input order
    async fn insert_many(&self, collection: &str, docs: Vec<BsonDocument>) -> Result<Vec<Bson>>;

    /// Replace the document with identity `id`; returns the matched count
    async fn replace_one(&self, collection: &str, id: ObjectId, doc: BsonDocument) -> Result<u64>;

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> Result<UpdateOutcome>;

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> Result<u64>;

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> Result<u64>;

    async fn count(&self, collection: &str, filter: BsonDocument) -> Result<u64>;

    /// Create the index if missing; returns its name
    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<String>;

    async fn ping(&self) -> Result<()>;
}

/// An open client, handing out databases by name
pub trait StorageClient: Send + Sync {
    fn database(&self, name: &str) -> Arc<dyn StorageDatabase>;
}

/// Opens clients from connection settings
pub trait Connector: Send + Sync {
    fn open(&self, alias: &str, settings: &ConnectionSettings) -> Result<Arc<dyn StorageClient>>;
}
