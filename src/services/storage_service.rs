//! src/services/storage_service.rs
//!
//! LogStorage — on-disk life cycle of uploaded log files. A file is written
//! to `staging_dir/{id}` under an exclusive-create contract, promoted once to
//! `storage_dir/{id}`, served from there, and finally removed by the
//! retention sweep once its modification time falls behind the cutoff.

use crate::{
    models::ids::FileId,
    services::{
        partial_file::PartialFile,
        promotion::{PromoteError, PromoteStrategy, Promoter},
    },
};
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, DirBuilder, File, OpenOptions},
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, error, info, warn};

pub const DEFAULT_DIRECTORY_MODE: u32 = 0o770;
pub const DEFAULT_FILE_MODE: u32 = 0o660;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("log file `{id}` is already staged")]
    AlreadyExists { id: FileId },
    #[error("expected file size to be at most `{limit}` bytes but received `{actual}` bytes")]
    FileTooLarge { limit: u64, actual: u64 },
    #[error("failed to stage log file at `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("expected a directory at `{}` but found a file instead", .0.display())]
    NotADirectory(PathBuf),
    #[error("log file `{0}` not found")]
    FileNotFound(FileId),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to list `{}`: {source}", path.display())]
    ListFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of one retention pass over the storage directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Directory layout and permissions for [`LogStorage`].
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub staging_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub directory_mode: u32,
    pub file_mode: u32,
}

/// LogStorage owns the staging and storage directories.
///
/// Collisions between concurrent uploads are avoided by fresh ids, not by
/// locks; exclusive-create opens catch the impossible case anyway.
#[derive(Clone)]
pub struct LogStorage {
    layout: StorageLayout,
    promoter: Arc<dyn Promoter>,
}

impl LogStorage {
    /// Build the service and make sure both directories exist.
    pub async fn new(layout: StorageLayout, strategy: PromoteStrategy) -> StorageResult<Self> {
        let storage = Self {
            layout,
            promoter: strategy.promoter(),
        };
        storage.create_directory(&storage.layout.staging_dir).await?;
        storage.create_directory(&storage.layout.storage_dir).await?;
        info!(strategy = storage.promoter.name(), "log storage ready");
        Ok(storage)
    }

    pub fn staging_dir(&self) -> &Path {
        &self.layout.staging_dir
    }

    pub fn storage_dir(&self) -> &Path {
        &self.layout.storage_dir
    }

    fn staging_path(&self, id: FileId) -> PathBuf {
        self.layout.staging_dir.join(id.to_string())
    }

    fn storage_path(&self, id: FileId) -> PathBuf {
        self.layout.storage_dir.join(id.to_string())
    }

    async fn create_directory(&self, path: &Path) -> StorageResult<()> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {
                info!(path = %path.display(), "using existing directory");
                Ok(())
            }
            Ok(_) => Err(StorageError::NotADirectory(path.to_path_buf())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                DirBuilder::new()
                    .recursive(true)
                    .mode(self.layout.directory_mode)
                    .create(path)
                    .await?;
                info!(path = %path.display(), "created new directory");
                Ok(())
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Stream `source` into the staging file for `id`, accepting at most
    /// `limit` bytes. Returns the number of bytes written.
    ///
    /// Reads one byte past `limit` to tell an exact fit from an overflow;
    /// never buffers the payload. Any failure after the file was created
    /// removes it again. An id that is already staged is reported and its
    /// existing file is left alone.
    pub async fn stage<R>(&self, id: FileId, source: R, limit: u64) -> Result<u64, StageError>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.staging_path(id);
        debug!(file_id = %id, path = %path.display(), "begin staging log file");

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(self.layout.file_mode)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                error!(file_id = %id, path = %path.display(), "staging path already taken");
                return Err(StageError::AlreadyExists { id });
            }
            Err(source) => {
                error!(file_id = %id, path = %path.display(), error = %source, "failed to open file for writing");
                return Err(StageError::Io { path, source });
            }
        };
        let cleanup = PartialFile::new(&path);

        let mut limited = source.take(limit.saturating_add(1));
        let written = match tokio::io::copy(&mut limited, &mut file).await {
            Ok(n) => n,
            Err(source) => {
                error!(file_id = %id, error = %source, "unexpected error while writing to file");
                return Err(StageError::Io {
                    path: path.clone(),
                    source,
                });
            }
        };

        if written > limit {
            info!(file_id = %id, limit, bytes = written, "file too big to upload");
            return Err(StageError::FileTooLarge {
                limit,
                actual: written,
            });
        }

        let synced = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(source) = synced {
            return Err(StageError::Io {
                path: path.clone(),
                source,
            });
        }

        cleanup.disarm();
        info!(file_id = %id, bytes = written, "successfully staged log file");
        Ok(written)
    }

    /// Move a staged file into permanent storage with the configured
    /// strategy.
    pub async fn promote(&self, id: FileId) -> Result<(), PromoteError> {
        let staging = self.staging_path(id);
        let storage = self.storage_path(id);

        match self.promoter.promote(id, &staging, &storage).await {
            Ok(()) => {
                debug!(file_id = %id, path = %storage.display(), "promoted log file");
                Ok(())
            }
            Err(err) => {
                if err.is_conflict() {
                    error!(file_id = %id, "storage path already taken, refusing to overwrite");
                } else {
                    error!(
                        file_id = %id,
                        staging = %staging.display(),
                        storage = %storage.display(),
                        error = %err,
                        "failed to store log file"
                    );
                }
                Err(err)
            }
        }
    }

    /// Drop a staged file that will never be promoted. Best-effort and
    /// synchronous so it can run from `Drop`.
    pub fn discard_staged(&self, id: FileId) {
        let path = self.staging_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(file_id = %id, "discarded staged log file"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                file_id = %id,
                path = %path.display(),
                error = %err,
                "failed to discard staged log file"
            ),
        }
    }

    /// Open a promoted file for reading.
    pub async fn open_stored_file(&self, id: FileId) -> StorageResult<File> {
        let path = self.storage_path(id);
        File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::FileNotFound(id)
            } else {
                error!(path = %path.display(), error = %err, "failed to open log file for reading");
                StorageError::Io(err)
            }
        })
    }

    /// Delete every stored file last modified strictly before `before`.
    ///
    /// Entries that cannot be inspected or removed are logged and counted
    /// in the report; the pass always continues with the next entry. Only a
    /// listing failure that yields no entries at all aborts the pass.
    pub async fn remove_expired(&self, before: DateTime<Utc>) -> Result<SweepReport, SweepError> {
        let dir = self.storage_dir();
        info!(cutoff = %before, "begin removing old log files");

        let mut entries = Vec::new();
        let listed = async {
            let mut read_dir = fs::read_dir(dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                entries.push(entry);
            }
            Ok::<_, io::Error>(())
        }
        .await;
        if let Err(source) = listed {
            error!(path = %dir.display(), error = %source, "error while reading directory");
            if entries.is_empty() {
                return Err(SweepError::ListFailed {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        }

        let mut report = SweepReport {
            scanned: entries.len(),
            ..SweepReport::default()
        };
        for entry in entries {
            let path = entry.path();
            let modified = match entry.metadata().await.and_then(|meta| meta.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(err) => {
                    error!(path = %path.display(), error = %err, "failed to get info of file");
                    report.failed += 1;
                    continue;
                }
            };
            if modified >= before {
                continue;
            }

            info!(path = %path.display(), modified = %modified, "removing old log file");
            match fs::remove_file(&path).await {
                Ok(()) => report.removed += 1,
                Err(err) => {
                    error!(path = %path.display(), error = %err, "failed to remove old log file");
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            removed = report.removed,
            failed = report.failed,
            "finished removing old log files"
        );
        Ok(report)
    }
}
