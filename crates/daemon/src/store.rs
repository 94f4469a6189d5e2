//! Transactional access to the on-disk interface document
//!
//! Every mutation is one read-modify-write cycle:
//! 1. take the single-writer lock
//! 2. read and parse the current document
//! 3. run the edit closure; any error aborts before anything is written
//! 4. write the result to a sibling temp file, fsync, rename over the document
//!
//! The lock is held by the write task itself, so a caller that is dropped
//! mid-write cannot let the next writer read a stale document.

use crate::document::{ConfigDocument, HookDefaults};
use crate::keys::KeyProvisioner;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use wgsync_common::{Error, Result};

/// Result of a committed transaction
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub revision: u64,
    pub document: ConfigDocument,
    pub value: T,
}

/// Settings used to create the document when it does not exist yet
#[derive(Debug, Clone)]
pub struct InterfaceSeed {
    pub address: String,
    pub listen_port: u16,
    pub hooks: HookDefaults,
}

/// Serialized read-modify-write access to one document
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    io_timeout: Duration,
    writer: Arc<Mutex<()>>,
    revision: AtomicU64,
}

async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::Io(std::io::Error::new(
            ErrorKind::TimedOut,
            format!("{} timed out after {}s", what, limit.as_secs()),
        ))),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

async fn write_atomic(path: &Path, contents: &str, limit: Duration) -> Result<()> {
    let tmp = temp_path(path);
    let write = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        // Keep the existing mode (wg0.conf is usually 0600)
        if let Ok(meta) = fs::metadata(path).await {
            fs::set_permissions(&tmp, meta.permissions()).await?;
        }
        fs::rename(&tmp, path).await
    };

    let result = with_timeout(limit, "document write", write).await;
    if result.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    result
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, io_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            io_timeout,
            writer: Arc::new(Mutex::new(())),
            revision: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of transactions committed by this store
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Read and parse the current document
    pub async fn load(&self) -> Result<ConfigDocument> {
        let text = with_timeout(self.io_timeout, "document read", fs::read_to_string(&self.path)).await?;
        ConfigDocument::parse(&text)
    }

    /// Run one read-modify-write transaction
    pub async fn apply<T, F>(&self, mutation: F) -> Result<Committed<T>>
    where
        F: FnOnce(&mut ConfigDocument) -> Result<T>,
    {
        let guard = self.writer.clone().lock_owned().await;

        let mut document = self.load().await?;
        let value = match mutation(&mut document) {
            Ok(value) => value,
            Err(e) => {
                debug!("Transaction on {:?} aborted: {}", self.path, e);
                return Err(e);
            }
        };

        let text = document.serialize();
        let path = self.path.clone();
        let limit = self.io_timeout;
        let write = tokio::spawn(async move {
            let _guard = guard;
            write_atomic(&path, &text, limit).await
        });
        write
            .await
            .map_err(|e| Error::Internal(format!("document write task failed: {}", e)))??;

        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Committed {:?} (revision {})", self.path, revision);

        Ok(Committed {
            revision,
            document,
            value,
        })
    }

    /// Create the document with fresh interface keys if it does not exist.
    /// Returns whether a document was written.
    pub async fn bootstrap(&self, keys: &dyn KeyProvisioner, seed: &InterfaceSeed) -> Result<bool> {
        let _guard = self.writer.lock().await;

        if fs::try_exists(&self.path).await? {
            debug!("Document {:?} already exists", self.path);
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let pair = keys.generate_key_pair().await?;
        let mut document = ConfigDocument::new(seed.address.clone());
        document.interface.private_key = Some(pair.private_key);
        document.interface.listen_port = Some(seed.listen_port);
        document.interface.post_up = seed.hooks.post_up();
        document.interface.post_down = seed.hooks.post_down();

        write_atomic(&self.path, &document.serialize(), self.io_timeout).await?;
        info!(
            "Created interface document {:?} (public key {})",
            self.path, pair.public_key
        );
        Ok(true)
    }
}
