//! MongoDB backend on the official driver

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::options::{
    ClientOptions, Credential, FindOneOptions, FindOptions, IndexOptions, ServerAddress,
};
use mongodb::{Client, Collection, IndexModel};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, instrument, warn};

use super::{Connector, IndexSpec, StorageClient, StorageDatabase, UpdateOutcome};
use crate::connection::{ConnectionSettings, PoolConfig};
use crate::query::FindQuery;
use crate::{OdmError, Result};

/// Opens MongoDB clients
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

impl MongoConnector {
    /// Driver options for `settings`
    pub fn client_options(alias: &str, settings: &ConnectionSettings) -> Result<ClientOptions> {
        let mut options = ClientOptions::default();

        options.hosts = settings
            .seeds()
            .iter()
            .map(|seed| ServerAddress::parse(seed).map_err(|e| OdmError::connection(alias, e)))
            .collect::<Result<Vec<_>>>()?;
        if options.hosts.is_empty() {
            return Err(OdmError::connection(alias, "no host given"));
        }

        options.repl_set_name = settings.replica_set.clone();

        if settings.username.is_some() || settings.password.is_some() {
            let mut credential = Credential::default();
            credential.username = settings.username.clone();
            credential.password = settings.password.clone();
            credential.source = settings.auth_source.clone();
            options.credential = Some(credential);
        }

        apply_pool_config(&mut options, &settings.pool);

        for key in settings.extra.keys() {
            warn!(alias, option = %key, "ignoring unsupported connection option");
        }

        Ok(options)
    }
}

fn apply_pool_config(options: &mut ClientOptions, config: &PoolConfig) {
    if let Some(min) = config.min_pool_size {
        options.min_pool_size = Some(min);
    }
    if let Some(max) = config.max_pool_size {
        options.max_pool_size = Some(max);
    }
    if let Some(idle) = config.max_idle_time {
        options.max_idle_time = Some(idle);
    }
    if let Some(connect) = config.connect_timeout {
        options.connect_timeout = Some(connect);
    }
    if let Some(selection) = config.server_selection_timeout {
        options.server_selection_timeout = Some(selection);
    }
    if let Some(app) = &config.app_name {
        options.app_name = Some(app.clone());
    }
}

impl Connector for MongoConnector {
    fn open(&self, alias: &str, settings: &ConnectionSettings) -> Result<Arc<dyn StorageClient>> {
        let options = Self::client_options(alias, settings)?;
        // The driver spawns its monitors on the current runtime.
        if Handle::try_current().is_err() {
            return Err(OdmError::connection(
                alias,
                "no tokio runtime is running; connect from async code or through BlockingRuntime",
            ));
        }
        let client = Client::with_options(options).map_err(|e| OdmError::connection(alias, e))?;
        debug!(alias, "created MongoDB client");
        Ok(Arc::new(MongoClient { client }))
    }
}

/// Open MongoDB client
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
}

impl MongoClient {
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl StorageClient for MongoClient {
    fn database(&self, name: &str) -> Arc<dyn StorageDatabase> {
        Arc::new(MongoDatabase {
            database: self.client.database(name),
        })
    }
}

/// One MongoDB database
#[derive(Clone)]
pub struct MongoDatabase {
    database: mongodb::Database,
}

impl MongoDatabase {
    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection(name)
    }
}

#[async_trait]
impl StorageDatabase for MongoDatabase {
    async fn find_one(
        &self,
        collection: &str,
        filter: BsonDocument,
        projection: Option<BsonDocument>,
    ) -> Result<Option<BsonDocument>> {
        let mut options = FindOneOptions::default();
        options.projection = projection;
        let found = self
            .collection(collection)
            .find_one(filter)
            .with_options(options)
            .await?;
        Ok(found)
    }

    #[instrument(skip(self, query), fields(collection = query.collection_name()))]
    async fn find(&self, query: FindQuery) -> Result<Vec<BsonDocument>> {
        let mut options = FindOptions::default();
        if let Some(sort) = query.get_sort() {
            options.sort = Some(sort.clone());
        }
        if let Some(skip) = query.get_skip() {
            options.skip = Some(skip);
        }
        if let Some(limit) = query.get_limit() {
            options.limit = Some(limit);
            if limit > 0 {
                options.batch_size = u32::try_from(limit).ok();
            }
        }
        if let Some(projection) = query.get_projection() {
            options.projection = Some(projection.clone());
        }

        let cursor = self
            .collection(query.collection_name())
            .find(query.get_filter().clone())
            .with_options(options)
            .await?;
        let docs: Vec<BsonDocument> = cursor.try_collect().await?;
        Ok(docs)
    }

    async fn insert_one(&self, collection: &str, doc: BsonDocument) -> Result<Bson> {
        let result = self.collection(collection).insert_one(doc).await?;
        Ok(result.inserted_id)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let result = self.collection(collection).insert_many(docs).await?;
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn replace_one(&self, collection: &str, id: ObjectId, doc: BsonDocument) -> Result<u64> {
        let result = self
            .collection(collection)
            .replace_one(doc! { "_id": id }, doc)
            .await?;
        Ok(result.matched_count)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: BsonDocument,
        update: BsonDocument,
    ) -> Result<UpdateOutcome> {
        let result = self
            .collection(collection)
            .update_many(filter, update)
            .await?;
        Ok(UpdateOutcome {
            count: result.matched_count,
            updated_existing: result.matched_count > 0,
        })
    }

    async fn delete_one(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let result = self.collection(collection).delete_one(filter).await?;
        Ok(result.deleted_count)
    }

    async fn delete_many(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let result = self.collection(collection).delete_many(filter).await?;
        Ok(result.deleted_count)
    }

    async fn count(&self, collection: &str, filter: BsonDocument) -> Result<u64> {
        let count = self.collection(collection).count_documents(filter).await?;
        Ok(count)
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<String> {
        let mut keys = BsonDocument::new();
        keys.insert(index.key.clone(), 1);
        let options = IndexOptions::builder()
            .name(index.name())
            .unique(index.unique)
            .sparse(index.sparse)
            .build();
        let model = IndexModel::builder().keys(keys).options(options).build();
        let result = self.collection(collection).create_index(model).await?;
        Ok(result.index_name)
    }

    async fn ping(&self) -> Result<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| OdmError::MongoDB(format!("Ping failed: {}", e)))?;
        Ok(())
    }
}
