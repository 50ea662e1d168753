//! Promotion of a staged file into permanent storage.
//!
//! The strategy is picked once when the storage service is built. Both
//! strategies leave the staging file in place when they fail, so a failed
//! promotion can be retried.

use crate::{models::ids::FileId, services::partial_file::PartialFile};
use async_trait::async_trait;
use std::{
    io::{self, ErrorKind},
    os::unix::fs::PermissionsExt,
    path::Path,
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncRead, AsyncWriteExt},
};

#[derive(Debug, Error)]
pub enum PromoteError {
    #[error("failed to hardlink log file `{id}` into storage: {source}")]
    LinkFailed {
        id: FileId,
        #[source]
        source: io::Error,
    },
    #[error("failed to copy log file `{id}` into storage: {source}")]
    CopyFailed {
        id: FileId,
        #[source]
        source: io::Error,
    },
}

#[async_trait]
pub trait Promoter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Move `staging` to `storage`. On success `storage` holds the staged
    /// bytes; removing `staging` afterwards is best-effort.
    async fn promote(&self, id: FileId, staging: &Path, storage: &Path) -> Result<(), PromoteError>;
}

/// Which [`Promoter`] the service uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteStrategy {
    /// Hardlink then unlink. Staging and storage must share a filesystem.
    Hardlink,
    /// Stream copy then delete. Works across filesystems.
    Copy,
}

impl PromoteStrategy {
    pub fn promoter(self) -> Arc<dyn Promoter> {
        match self {
            PromoteStrategy::Hardlink => Arc::new(HardlinkPromoter),
            PromoteStrategy::Copy => Arc::new(CopyPromoter),
        }
    }
}

async fn remove_staged_source(id: FileId, staging: &Path) {
    if let Err(err) = fs::remove_file(staging).await {
        tracing::warn!(
            file_id = %id,
            path = %staging.display(),
            error = %err,
            "promoted log file but could not remove the staging copy"
        );
    }
}

pub struct HardlinkPromoter;

#[async_trait]
impl Promoter for HardlinkPromoter {
    fn name(&self) -> &'static str {
        "hardlink"
    }

    async fn promote(&self, id: FileId, staging: &Path, storage: &Path) -> Result<(), PromoteError> {
        fs::hard_link(staging, storage)
            .await
            .map_err(|source| PromoteError::LinkFailed { id, source })?;
        remove_staged_source(id, staging).await;
        Ok(())
    }
}

pub struct CopyPromoter;

impl CopyPromoter {
    async fn copy_exclusive(staging: &Path, storage: &Path) -> io::Result<()> {
        let mode = fs::metadata(staging).await?.permissions().mode();
        let source = fs::File::open(staging).await?;
        write_exclusive(source, mode, storage).await
    }
}

/// Create `dest` exclusively with `mode` and stream `source` into it. The
/// new file is removed unless the bytes reach disk, including when the
/// returned future is dropped mid-copy.
async fn write_exclusive<R>(mut source: R, mode: u32, dest: &Path) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(dest)
        .await?;
    let partial = PartialFile::new(dest);

    tokio::io::copy(&mut source, &mut file).await?;
    file.flush().await?;
    file.sync_all().await?;

    partial.disarm();
    Ok(())
}

#[async_trait]
impl Promoter for CopyPromoter {
    fn name(&self) -> &'static str {
        "copy"
    }

    async fn promote(&self, id: FileId, staging: &Path, storage: &Path) -> Result<(), PromoteError> {
        Self::copy_exclusive(staging, storage)
            .await
            .map_err(|source| PromoteError::CopyFailed { id, source })?;
        remove_staged_source(id, staging).await;
        Ok(())
    }
}

impl PromoteError {
    pub fn is_conflict(&self) -> bool {
        let source = match self {
            PromoteError::LinkFailed { source, .. } | PromoteError::CopyFailed { source, .. } => {
                source
            }
        };
        source.kind() == ErrorKind::AlreadyExists
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream::{self, StreamExt};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio_util::io::StreamReader;

    #[tokio::test]
    async fn copy_refuses_to_overwrite_and_keeps_source() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staged");
        let storage = dir.path().join("stored");
        fs::write(&staging, b"new").await.unwrap();
        fs::write(&storage, b"old").await.unwrap();

        let err = CopyPromoter
            .promote(FileId::new(), &staging, &storage)
            .await
            .unwrap_err();
        assert!(matches!(err, PromoteError::CopyFailed { .. }));
        assert!(err.is_conflict());
        assert_eq!(fs::read(&storage).await.unwrap(), b"old");
        assert_eq!(fs::read(&staging).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn copy_preserves_permission_bits() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staged");
        let storage = dir.path().join("stored");
        fs::write(&staging, b"bytes").await.unwrap();
        fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o640))
            .await
            .unwrap();

        CopyPromoter
            .promote(FileId::new(), &staging, &storage)
            .await
            .unwrap();
        let mode = fs::metadata(&storage).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[tokio::test]
    async fn hardlink_failure_leaves_staging_untouched() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staged");
        let storage = dir.path().join("missing-dir").join("stored");
        fs::write(&staging, b"bytes").await.unwrap();

        let err = HardlinkPromoter
            .promote(FileId::new(), &staging, &storage)
            .await
            .unwrap_err();
        assert!(matches!(err, PromoteError::LinkFailed { .. }));
        assert_eq!(fs::read(&staging).await.unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn copy_failing_mid_stream_removes_destination_and_keeps_source() {
        let dir = tempdir().unwrap();
        // Opening a directory succeeds but reading from it fails, after the
        // destination has already been created.
        let staging = dir.path().join("staged");
        std::fs::create_dir(&staging).unwrap();
        let storage = dir.path().join("stored");

        let err = CopyPromoter
            .promote(FileId::new(), &staging, &storage)
            .await
            .unwrap_err();
        assert!(matches!(err, PromoteError::CopyFailed { .. }));
        assert!(!err.is_conflict());
        assert!(!storage.exists());
        assert!(staging.exists());
    }

    #[tokio::test]
    async fn write_error_removes_partial_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("stored");
        let failing = StreamReader::new(stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::UnexpectedEof, "source truncated")),
        ]));

        assert!(write_exclusive(failing, 0o640, &dest).await.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn cancelled_copy_leaves_nothing_in_storage_and_can_be_retried() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("stored");
        let stalled = StreamReader::new(
            stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"partial"))])
                .chain(stream::pending()),
        );

        let outcome =
            tokio::time::timeout(Duration::from_millis(50), write_exclusive(stalled, 0o640, &dest))
                .await;
        assert!(outcome.is_err());
        assert!(!dest.exists());

        write_exclusive(&b"complete"[..], 0o640, &dest).await.unwrap();
        assert_eq!(fs::read(&dest).await.unwrap(), b"complete");
    }
}
