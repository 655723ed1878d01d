//! Append-only file persistence.
//!
//! Every mutating request is appended to the file exactly as it was received, as a serialized
//! frame. On startup the whole file is decoded again from the first byte and fed back through the
//! command layer. The file is never rewritten. It is only ever truncated to drop a record that
//! was not written completely.

use futures::StreamExt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use thiserror::Error as ThisError;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::FrameCodec;
use crate::frame::{self, Frame};

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("append-only file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("append-only file is corrupt: {0}")]
    Frame(#[from] frame::Error),
    #[error("append-only file is closed")]
    Closed,
}

/// Handle to the append-only file. Clones share the same file, lock and background sync task.
#[derive(Clone)]
pub struct Aof {
    inner: Arc<AofInner>,
}

struct AofInner {
    path: PathBuf,
    // Writes, replay, periodic syncs and close are all serialized on this lock. `None` once
    // the file has been closed.
    file: Mutex<Option<File>>,
    shutdown: CancellationToken,
    syncer: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Aof {
    /// Opens the file at `path`, creating it if absent, and starts a task that forces its
    /// contents to stable storage every `sync_interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(path: impl AsRef<Path>, sync_interval: Duration) -> Result<Aof, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;

        let inner = Arc::new(AofInner {
            path,
            file: Mutex::new(Some(file)),
            shutdown: CancellationToken::new(),
            syncer: parking_lot::Mutex::new(None),
        });

        let handle = tokio::spawn(sync_periodically(
            Arc::downgrade(&inner),
            sync_interval,
            inner.shutdown.clone(),
        ));
        *inner.syncer.lock() = Some(handle);

        info!(path = %inner.path.display(), "append-only file opened");

        Ok(Aof { inner })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Appends the serialized `frame` to the end of the file. No retry is attempted on failure;
    /// whatever part of the record made it to the file is cut off again so later appends stay
    /// decodable.
    pub async fn write(&self, frame: &Frame) -> Result<(), Error> {
        let mut file = self.inner.file.lock().await;
        let file = file.as_mut().ok_or(Error::Closed)?;

        let end = file.metadata().await?.len();
        if let Err(e) = append(file, &frame.serialize()).await {
            if let Err(truncate) = file.set_len(end).await {
                error!(
                    "failed to drop partial record from append-only file: {}",
                    truncate
                );
            }
            return Err(e.into());
        }

        Ok(())
    }

    /// Decodes every frame in the file from the beginning and hands each one to `visit`, in
    /// append order. Returns the number of frames visited.
    ///
    /// A record cut short at the end of the file, as left by a crash in the middle of an append,
    /// is truncated away with a warning. Any other decode failure aborts the read.
    pub async fn read<F>(&self, mut visit: F) -> Result<usize, Error>
    where
        F: FnMut(Frame),
    {
        let mut file = self.inner.file.lock().await;
        let file = file.as_mut().ok_or(Error::Closed)?;

        file.seek(SeekFrom::Start(0)).await?;

        let mut frames = FramedRead::new(&mut *file, FrameCodec::unbounded());
        let mut count = 0;
        let torn = loop {
            match frames.next().await {
                Some(Ok(frame)) => {
                    visit(frame);
                    count += 1;
                }
                Some(Err(frame::Error::UnexpectedEof)) => {
                    break frames.read_buffer().len() as u64;
                }
                Some(Err(e)) => return Err(e.into()),
                None => break 0,
            }
        };
        drop(frames);

        if torn > 0 {
            let end = file.metadata().await?.len().saturating_sub(torn);
            warn!(
                path = %self.inner.path.display(),
                bytes = torn,
                "dropping incomplete record at the end of append-only file"
            );
            file.set_len(end).await?;
        }

        Ok(count)
    }

    /// Forces buffered contents to stable storage.
    pub async fn sync(&self) -> Result<(), Error> {
        self.inner.sync().await
    }

    /// Stops the background sync task, performs a final sync and closes the file. Every later
    /// operation on this log, through any clone, fails with [`Error::Closed`].
    pub async fn close(&self) -> Result<(), Error> {
        self.inner.shutdown.cancel();

        let syncer = self.inner.syncer.lock().take();
        if let Some(syncer) = syncer {
            if let Err(e) = syncer.await {
                warn!("append-only file sync task failed: {}", e);
            }
        }

        let file = self.inner.file.lock().await.take();
        let file = file.ok_or(Error::Closed)?;
        file.sync_all().await?;

        info!(path = %self.inner.path.display(), "append-only file closed");
        Ok(())
    }
}

async fn append(file: &mut File, record: &[u8]) -> std::io::Result<()> {
    file.write_all(record).await?;
    // Wait for the write to reach the OS so failures surface here and not on the next op.
    file.flush().await
}

impl AofInner {
    async fn sync(&self) -> Result<(), Error> {
        let file = self.file.lock().await;
        let file = file.as_ref().ok_or(Error::Closed)?;

        file.sync_all().await?;
        Ok(())
    }
}

async fn sync_periodically(inner: Weak<AofInner>, period: Duration, shutdown: CancellationToken) {
    // `interval` panics on a zero period.
    let mut interval = time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        // Every handle is gone, nothing left to flush.
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match inner.sync().await {
            Ok(()) => {}
            Err(Error::Closed) => break,
            Err(e) => warn!("periodic sync of append-only file failed: {}", e),
        }
    }

    debug!("append-only file sync task stopped");
}
