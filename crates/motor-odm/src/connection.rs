//! Connection registry
//!
//! Maps aliases to connection settings, open clients and default database
//! names. Clients are opened lazily on the first [`ConnectionRegistry::get_connection`]
//! for an alias. One process-wide registry backs the free functions
//! [`connect`], [`get_connection`], [`disconnect`] and [`cleanup`]; it is
//! meant to be configured during startup.

use bson::{Bson, Document as BsonDocument};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::backend::{Connector, MongoConnector, StorageClient, StorageDatabase};
use crate::{OdmError, Result};

/// Alias used when none is given
pub const DEFAULT_CONNECTION_NAME: &str = "default";

pub const DEFAULT_HOST: &str = "localhost";

pub const DEFAULT_PORT: u16 = 27017;

/// Connection pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed
    pub max_idle_time: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: None,
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("motor-odm".to_string()),
        }
    }
}

/// Settings registered for an alias
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Host name, or a comma-separated seed list (`a:27017,b:27018`)
    pub host: String,
    /// Port for seeds without one; unused with a replica set
    pub port: Option<u16>,
    pub replica_set: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_source: Option<String>,
    pub pool: PoolConfig,
    /// Options not understood by the registry, handed to the connector
    pub extra: BsonDocument,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: Some(DEFAULT_PORT),
            replica_set: None,
            username: None,
            password: None,
            auth_source: None,
            pool: PoolConfig::default(),
            extra: BsonDocument::new(),
        }
    }
}

impl ConnectionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn replica_set(mut self, name: impl Into<String>) -> Self {
        self.replica_set = Some(name.into());
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Parse loosely typed options (`host`, `port`, `replicaSet`, `username`,
    /// `password`, `authSource`, `appName`, `connectTimeoutMS`,
    /// `serverSelectionTimeoutMS`, `maxPoolSize`, `minPoolSize`,
    /// `maxIdleTimeMS`). Anything else ends up in `extra`.
    ///
    /// When `replicaSet` is present the port is dropped; a `replicaSet` that
    /// is not text is dropped too, leaving single-node addressing.
    pub fn from_options(options: &BsonDocument) -> Result<Self> {
        let mut settings = Self::default();

        for (key, value) in options {
            match key.as_str() {
                "host" => settings.host = option_str(key, value)?,
                "port" => {
                    let port = option_u64(key, value)?;
                    settings.port = Some(u16::try_from(port).map_err(|_| {
                        OdmError::Configuration(format!("port out of range: {}", port))
                    })?);
                }
                "replicaSet" => match value {
                    Bson::String(name) => settings.replica_set = Some(name.clone()),
                    other => {
                        warn!(replica_set = %other, "ignoring replicaSet that is not a string");
                    }
                },
                "username" => settings.username = Some(option_str(key, value)?),
                "password" => settings.password = Some(option_str(key, value)?),
                "authSource" => settings.auth_source = Some(option_str(key, value)?),
                "appName" => settings.pool.app_name = Some(option_str(key, value)?),
                "connectTimeoutMS" => {
                    settings.pool.connect_timeout =
                        Some(Duration::from_millis(option_u64(key, value)?))
                }
                "serverSelectionTimeoutMS" => {
                    settings.pool.server_selection_timeout =
                        Some(Duration::from_millis(option_u64(key, value)?))
                }
                "maxIdleTimeMS" => {
                    settings.pool.max_idle_time =
                        Some(Duration::from_millis(option_u64(key, value)?))
                }
                "maxPoolSize" => settings.pool.max_pool_size = Some(option_u32(key, value)?),
                "minPoolSize" => settings.pool.min_pool_size = Some(option_u32(key, value)?),
                _ => {
                    settings.extra.insert(key.clone(), value.clone());
                }
            }
        }

        if options.contains_key("replicaSet") {
            settings.port = None;
        }

        Ok(settings)
    }

    /// Settings as used to open a client: no port alongside a replica set
    pub fn normalized(mut self) -> Self {
        if self.replica_set.is_some() {
            self.port = None;
        }
        self
    }

    /// Seed addresses (`host[:port]`)
    pub fn seeds(&self) -> Vec<String> {
        self.host
            .split(',')
            .map(str::trim)
            .filter(|seed| !seed.is_empty())
            .map(|seed| match self.port {
                Some(port) if !seed.contains(':') => format!("{}:{}", seed, port),
                _ => seed.to_string(),
            })
            .collect()
    }
}

fn option_str(key: &str, value: &Bson) -> Result<String> {
    match value {
        Bson::String(s) => Ok(s.clone()),
        other => Err(OdmError::Configuration(format!(
            "option '{}' must be a string, got {}",
            key, other
        ))),
    }
}

fn option_u64(key: &str, value: &Bson) -> Result<u64> {
    let parsed = match value {
        Bson::Int32(i) => u64::try_from(*i).ok(),
        Bson::Int64(i) => u64::try_from(*i).ok(),
        Bson::Double(f) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as u64),
        _ => None,
    };
    parsed.ok_or_else(|| {
        OdmError::Configuration(format!(
            "option '{}' must be a non-negative integer, got {}",
            key, value
        ))
    })
}

fn option_u32(key: &str, value: &Bson) -> Result<u32> {
    u32::try_from(option_u64(key, value)?)
        .map_err(|_| OdmError::Configuration(format!("option '{}' out of range", key)))
}

/// Handle to one database of a registered connection
#[derive(Clone)]
pub struct Database {
    alias: String,
    name: String,
    storage: Arc<dyn StorageDatabase>,
}

impl Database {
    pub fn new(
        alias: impl Into<String>,
        name: impl Into<String>,
        storage: Arc<dyn StorageDatabase>,
    ) -> Self {
        Self {
            alias: alias.into(),
            name: name.into(),
            storage,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &Arc<dyn StorageDatabase> {
        &self.storage
    }

    /// Check the server is reachable
    pub async fn ping(&self) -> Result<()> {
        self.storage
            .ping()
            .await
            .map_err(|e| OdmError::connection(&self.alias, e))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("alias", &self.alias)
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    settings: HashMap<String, ConnectionSettings>,
    clients: HashMap<String, Arc<dyn StorageClient>>,
    default_dbs: HashMap<String, String>,
}

/// Alias → settings, client and default database
pub struct ConnectionRegistry {
    connector: RwLock<Arc<dyn Connector>>,
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    /// Registry opening MongoDB clients
    pub fn new() -> Self {
        Self::with_connector(Arc::new(MongoConnector))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector: RwLock::new(connector),
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Replace the connector used for clients opened from now on
    pub fn set_connector(&self, connector: Arc<dyn Connector>) {
        *self.connector.write() = connector;
    }

    /// Register `settings` for `alias` and return a handle to `db`.
    ///
    /// Only the first call per alias registers settings; later calls reuse
    /// them and their settings are ignored.
    #[instrument(skip(self, settings))]
    pub fn connect(&self, db: &str, alias: &str, settings: ConnectionSettings) -> Result<Database> {
        if db.is_empty() {
            return Err(OdmError::Configuration(
                "Database name cannot be empty".to_string(),
            ));
        }

        {
            let mut state = self.state.write();
            if state.settings.contains_key(alias) || state.clients.contains_key(alias) {
                debug!(alias, "alias already registered; keeping existing settings");
            } else {
                state.settings.insert(alias.to_string(), settings.normalized());
                state.default_dbs.insert(alias.to_string(), db.to_string());
            }
        }

        self.get_connection(alias, Some(db))
    }

    /// Handle to `db` (or the alias's default database), opening the client if needed
    pub fn get_connection(&self, alias: &str, db: Option<&str>) -> Result<Database> {
        let existing = self.state.read().clients.get(alias).cloned();
        let client = match existing {
            Some(client) => client,
            None => self.open(alias)?,
        };

        let name = match db {
            Some(name) => name.to_string(),
            None => self
                .state
                .read()
                .default_dbs
                .get(alias)
                .cloned()
                .ok_or_else(|| not_registered(alias))?,
        };

        let storage = client.database(&name);
        Ok(Database::new(alias, name, storage))
    }

    fn open(&self, alias: &str) -> Result<Arc<dyn StorageClient>> {
        let mut state = self.state.write();
        if let Some(client) = state.clients.get(alias) {
            return Ok(client.clone());
        }

        let settings = state
            .settings
            .get(alias)
            .cloned()
            .ok_or_else(|| not_registered(alias))?;

        let connector = self.connector.read().clone();
        let client = connector.open(alias, &settings).map_err(|e| match e {
            OdmError::Connection { .. } => e,
            other => OdmError::connection(alias, other),
        })?;

        info!(alias, seeds = ?settings.seeds(), "opened connection");
        state.clients.insert(alias.to_string(), client.clone());
        Ok(client)
    }

    /// Forget one alias; returns true if it was registered
    pub fn disconnect(&self, alias: &str) -> bool {
        let mut state = self.state.write();
        let had_client = state.clients.remove(alias).is_some();
        let had_settings = state.settings.remove(alias).is_some();
        state.default_dbs.remove(alias);
        if had_client || had_settings {
            debug!(alias, "disconnected");
        }
        had_client || had_settings
    }

    /// Forget every alias
    pub fn cleanup(&self) {
        let mut state = self.state.write();
        state.clients.clear();
        state.settings.clear();
        state.default_dbs.clear();
    }

    pub fn is_registered(&self, alias: &str) -> bool {
        self.state.read().settings.contains_key(alias)
    }

    /// Settings registered for an alias
    pub fn settings(&self, alias: &str) -> Option<ConnectionSettings> {
        self.state.read().settings.get(alias).cloned()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn not_registered(alias: &str) -> OdmError {
    OdmError::Configuration(format!("No connection registered under alias '{}'", alias))
}

static REGISTRY: Lazy<ConnectionRegistry> = Lazy::new(ConnectionRegistry::new);

/// The process-wide registry
pub fn registry() -> &'static ConnectionRegistry {
    &REGISTRY
}

pub fn connect(db: &str, alias: &str, settings: ConnectionSettings) -> Result<Database> {
    REGISTRY.connect(db, alias, settings)
}

pub fn get_connection(alias: &str, db: Option<&str>) -> Result<Database> {
    REGISTRY.get_connection(alias, db)
}

pub fn disconnect(alias: &str) -> bool {
    REGISTRY.disconnect(alias)
}

pub fn cleanup() {
    REGISTRY.cleanup()
}
