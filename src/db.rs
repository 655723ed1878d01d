use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::aof::{self, Aof};
use crate::commands::executable::Executable;
use crate::commands::Registry;
use crate::frame::Frame;
use crate::store::Store;

/// Everything a connection needs to serve requests: the in-memory store, the append-only file
/// that backs it and the command registry. Cheap to clone.
#[derive(Clone)]
pub struct Db {
    pub store: Store,
    aof: Aof,
    registry: Arc<Registry>,
    // Held from log append until the store is updated, so concurrent writers hit the log in
    // the same order they hit the store.
    write_order: Arc<Mutex<()>>,
}

impl Db {
    /// Opens the append-only file and replays it into a fresh store.
    pub async fn open(aof_path: impl AsRef<Path>, sync_interval: Duration) -> Result<Db, aof::Error> {
        let aof = Aof::open(aof_path, sync_interval).await?;
        let db = Db {
            store: Store::new(),
            aof,
            registry: Arc::new(Registry::new()),
            write_order: Arc::new(Mutex::new(())),
        };

        db.replay().await?;

        Ok(db)
    }

    /// Re-executes every command recorded in the log against the store. Records naming an
    /// unknown command, or with the wrong number of arguments, are logged and skipped. Nothing
    /// is appended to the log while replaying.
    pub async fn replay(&self) -> Result<usize, aof::Error> {
        let mut applied = 0;
        let mut skipped = 0;

        self.aof
            .read(|frame| match self.registry.parse(frame) {
                Ok(cmd) => {
                    if let Frame::Error(e) = cmd.exec(&self.store) {
                        warn!("replayed command failed: {}", e);
                    }
                    applied += 1;
                }
                Err(e) => {
                    warn!("skipping invalid command in append-only file: {}", e);
                    skipped += 1;
                }
            })
            .await?;

        info!(applied, skipped, "append-only file replayed");
        Ok(applied)
    }

    /// Runs a single client request and returns the reply. Write commands are appended to the
    /// log before they are applied; if the append fails the store is left untouched.
    pub async fn execute(&self, request: Frame) -> Frame {
        let cmd = match self.registry.parse(request.clone()) {
            Ok(cmd) => cmd,
            Err(e) => {
                debug!("rejected request {}: {}", request, e);
                return e.into();
            }
        };

        if !cmd.is_write() {
            return cmd.exec(&self.store);
        }

        let _ordered = self.write_order.lock().await;
        if let Err(e) = self.aof.write(&request).await {
            error!("failed to append to append-only file: {}", e);
            return Frame::Error("ERR persistence failure".to_string());
        }

        cmd.exec(&self.store)
    }

    /// Flushes and closes the append-only file. Write commands fail afterwards.
    pub async fn close(&self) -> Result<(), aof::Error> {
        self.aof.close().await
    }
}
