//! motor-odm: asynchronous object-document mapper for MongoDB
//!
//! Schemas declare typed fields; documents are validated and converted to
//! and from BSON through those fields; query sets translate `Q` filter trees
//! into MongoDB filters and run CRUD operations through a storage backend.
//!
//! # Features
//! - Typed fields with defaults, validators, unique/sparse indexes
//! - Embedded documents, lists and references with depth-bounded loading
//! - Django-style filter lookups combined with `&`, `|` and `!`
//! - Automatic insert/update timestamps
//! - Connection registry keyed by alias
//! - Blocking/callback adapter over the async core
//!
//! # Usage
//! ```no_run
//! use motor_odm::{connect, ConnectionSettings, QuerySet, Q, SchemaBuilder};
//! use motor_odm::fields::{IntField, StringField};
//!
//! # async fn demo() -> motor_odm::Result<()> {
//! let user = SchemaBuilder::new("User")
//!     .collection("users")
//!     .field("name", StringField::new().required())
//!     .field("age", IntField::new())
//!     .register()?;
//!
//! let db = connect("app", "default", ConnectionSettings::new().host("localhost"))?;
//! let users = QuerySet::new(user, db);
//! users.create([("name", "Bernardo")]).await?;
//!
//! let adults = users.clone().filter(Q::lookup("age__gte", 18)).find_all(None).await?;
//! # let _ = adults;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod blocking;
pub mod config;
pub mod connection;
pub mod document;
pub mod fields;
pub mod query;
pub mod queryset;
pub mod reference;
pub mod schema;
pub mod validation;
pub mod value;

pub use backend::{IndexSpec, StorageDatabase, UpdateOutcome};
pub use blocking::BlockingRuntime;
pub use config::{configure, get_config, set_config, OdmConfig};
pub use connection::{
    cleanup, connect, disconnect, get_connection, ConnectionRegistry, ConnectionSettings, Database,
    PoolConfig,
};
pub use document::Document;
pub use motor_odm_common::{OdmError, Result};
pub use query::{Direction, FindQuery, Operator, Q};
pub use queryset::QuerySet;
pub use reference::{PathSegment, ReferenceSlot};
pub use schema::{Schema, SchemaBuilder};
pub use value::{Reference, Value};
