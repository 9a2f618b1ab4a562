//! Blocking and callback front end over the async core.
//!
//! [`BlockingRuntime`] owns a tokio runtime. `run` blocks the calling thread
//! on an operation; `submit` spawns it and hands the result to a callback
//! on a runtime worker. Neither may be called from inside an async context.
//!
//! Synchronous callers open connections through [`BlockingRuntime::connect`]
//! and [`BlockingRuntime::get_connection`] so the driver's background tasks
//! land on this runtime.

use std::future::Future;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::{self, ConnectionSettings, Database};
use crate::{OdmError, Result};

/// Runtime driving persistence operations for synchronous callers
#[derive(Debug)]
pub struct BlockingRuntime {
    runtime: Runtime,
}

impl BlockingRuntime {
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("motor-odm")
            .build()
            .map_err(|e| OdmError::Internal(format!("Failed to create tokio runtime: {}", e)))?;
        debug!("started blocking runtime");
        Ok(Self { runtime })
    }

    /// Block until `future` completes
    pub fn run<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Spawn `future` and pass its output to `callback` when done
    pub fn submit<F, C>(&self, future: F, callback: C) -> JoinHandle<()>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
        C: FnOnce(F::Output) + Send + 'static,
    {
        self.runtime.spawn(async move {
            callback(future.await);
        })
    }

    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// [`connection::connect`] with this runtime entered
    pub fn connect(&self, db: &str, alias: &str, settings: ConnectionSettings) -> Result<Database> {
        let _entered = self.runtime.enter();
        connection::connect(db, alias, settings)
    }

    /// [`connection::get_connection`] with this runtime entered
    pub fn get_connection(&self, alias: &str, db: Option<&str>) -> Result<Database> {
        let _entered = self.runtime.enter();
        connection::get_connection(alias, db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryDatabase;
    use crate::connection::Database;
    use crate::fields::StringField;
    use crate::queryset::QuerySet;
    use crate::schema::SchemaBuilder;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn queryset() -> QuerySet {
        let schema = SchemaBuilder::new("BlockingUser")
            .field("name", StringField::new().required())
            .build()
            .unwrap();
        let db = Database::new("test", "test", Arc::new(MemoryDatabase::new("test")));
        QuerySet::new(schema, db)
    }

    #[test]
    fn test_run_blocks_on_result() {
        let runtime = BlockingRuntime::new().unwrap();
        let mut qs = queryset();

        let doc = assert_ok!(runtime.run(qs.create([("name", "Bernardo")])));
        assert!(doc.id().is_some());
        assert_eq!(assert_ok!(runtime.run(qs.count())), 1);

        let missing_name: [(&str, &str); 0] = [];
        assert_err!(runtime.run(qs.create(missing_name)));
    }

    #[test]
    fn test_submit_invokes_callback() {
        let runtime = BlockingRuntime::new().unwrap();
        let qs = queryset();
        let (tx, rx) = mpsc::channel();

        runtime.submit(
            async move { qs.create([("name", "Heynemann")]).await },
            move |result| {
                let _ = tx.send(result.map(|doc| doc.id().is_some()));
            },
        );

        let saved = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(saved.unwrap());
    }
}
