//! Upload pipeline tying staging, promotion and the bundle index together.
//!
//! One [`UploadSession`] per request: parts are staged strictly in arrival
//! order and nothing reaches permanent storage until `commit`. A session
//! that fails or is dropped before committing removes everything it staged,
//! so a request either yields a bundle or leaves no staged files behind.

use crate::{
    models::ids::{BundleId, FileId},
    services::{
        bundle_index::{BundleIndex, IndexError},
        promotion::PromoteError,
        storage_service::{LogStorage, StageError},
    },
};
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("you're not allowed to upload more than `{limit}` file(s)")]
    TooManyFiles { limit: usize },
    #[error("upload contained no files")]
    EmptyUpload,
    #[error("invalid multipart body: {0}")]
    Multipart(String),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Promote(#[from] PromoteError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Per-request limits applied by every session.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub single_file_size_limit: u64,
    pub max_file_count: usize,
}

impl UploadLimits {
    /// Largest request body that could possibly be accepted.
    pub fn content_length_limit(&self) -> u64 {
        self.single_file_size_limit
            .saturating_mul(self.max_file_count as u64)
    }
}

/// Shared state handed to the HTTP layer.
#[derive(Clone)]
pub struct LogService {
    pub storage: LogStorage,
    pub index: BundleIndex,
    pub limits: UploadLimits,
}

impl LogService {
    pub fn new(storage: LogStorage, index: BundleIndex, limits: UploadLimits) -> Self {
        Self {
            storage,
            index,
            limits,
        }
    }

    pub fn begin_upload(&self) -> UploadSession<'_> {
        UploadSession {
            service: self,
            staged: Vec::new(),
        }
    }
}

pub struct UploadSession<'a> {
    service: &'a LogService,
    /// Ids whose staging files this session still owns, in arrival order.
    staged: Vec<FileId>,
}

impl UploadSession<'_> {
    /// Stage the next part under a fresh id.
    pub async fn stage_part<R>(&mut self, source: R) -> Result<FileId, UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let limits = self.service.limits;
        if self.staged.len() >= limits.max_file_count {
            return Err(UploadError::TooManyFiles {
                limit: limits.max_file_count,
            });
        }

        let id = FileId::new();
        self.service
            .storage
            .stage(id, source, limits.single_file_size_limit)
            .await?;
        self.staged.push(id);
        self.service.index.mark_staged(id).await?;
        Ok(id)
    }

    /// Promote every staged file in order, then record the bundle.
    ///
    /// Files promoted before a later failure stay in storage unreferenced
    /// until the retention sweep removes them.
    pub async fn commit(mut self) -> Result<BundleId, UploadError> {
        if self.staged.is_empty() {
            return Err(UploadError::EmptyUpload);
        }

        let ids = self.staged.clone();
        for (promoted, id) in ids.iter().enumerate() {
            if let Err(err) = self.service.storage.promote(*id).await {
                self.staged = self.staged.split_off(promoted);
                return Err(err.into());
            }
        }
        self.staged.clear();

        let bundle_id = self.service.index.create_bundle(&ids).await?;
        tracing::info!(bundle_id = %bundle_id, files = ids.len(), "stored log bundle");
        Ok(bundle_id)
    }
}

impl Drop for UploadSession<'_> {
    fn drop(&mut self) {
        if self.staged.is_empty() {
            return;
        }
        tracing::info!(files = self.staged.len(), "discarding uncommitted upload");
        for id in self.staged.drain(..) {
            self.service.storage.discard_staged(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        kv_store::MemoryKvStore, promotion::PromoteStrategy,
        storage_service::tests::storage_in,
    };
    use std::{sync::Arc, time::Duration};
    use tempfile::{TempDir, tempdir};
    use tokio::io::AsyncReadExt;

    const LIMITS: UploadLimits = UploadLimits {
        single_file_size_limit: 32,
        max_file_count: 3,
    };

    async fn service_in(dir: &TempDir, strategy: PromoteStrategy) -> LogService {
        let storage = storage_in(dir, strategy).await;
        let index = BundleIndex::new(Arc::new(MemoryKvStore::new()), Duration::from_secs(3600));
        LogService::new(storage, index, LIMITS)
    }

    fn dir_len(path: std::path::PathBuf) -> usize {
        std::fs::read_dir(path).unwrap().count()
    }

    async fn read_stored(service: &LogService, id: FileId) -> Vec<u8> {
        let mut out = Vec::new();
        service
            .storage
            .open_stored_file(id)
            .await
            .unwrap()
            .read_to_end(&mut out)
            .await
            .unwrap();
        out
    }

    #[tokio::test]
    async fn bundle_of_three_preserves_order() {
        for strategy in [PromoteStrategy::Hardlink, PromoteStrategy::Copy] {
            let dir = tempdir().unwrap();
            let service = service_in(&dir, strategy).await;
            let parts: [&[u8]; 3] = [b"first log", b"second log", b"third log"];

            let mut session = service.begin_upload();
            let mut ids = Vec::new();
            for part in parts {
                ids.push(session.stage_part(part).await.unwrap());
                assert!(service.index.staged_at(*ids.last().unwrap()).await.is_some());
            }
            let bundle_id = session.commit().await.unwrap();

            assert_eq!(service.index.get_bundle(bundle_id).await.unwrap(), ids);
            for (id, part) in ids.iter().zip(parts) {
                assert_eq!(read_stored(&service, *id).await, part);
            }
            assert_eq!(dir_len(dir.path().join("staging")), 0);
        }
    }

    #[tokio::test]
    async fn oversized_part_discards_the_whole_upload() {
        let dir = tempdir().unwrap();
        let service = service_in(&dir, PromoteStrategy::Copy).await;

        let mut session = service.begin_upload();
        session.stage_part(&b"fits"[..]).await.unwrap();
        let err = session.stage_part(&[b'x'; 33][..]).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::Stage(StageError::FileTooLarge { limit: 32, .. })
        ));
        drop(session);

        assert_eq!(dir_len(dir.path().join("staging")), 0);
        assert_eq!(dir_len(dir.path().join("logs")), 0);
    }

    #[tokio::test]
    async fn extra_part_is_rejected() {
        let dir = tempdir().unwrap();
        let service = service_in(&dir, PromoteStrategy::Copy).await;

        let mut session = service.begin_upload();
        for _ in 0..LIMITS.max_file_count {
            session.stage_part(&b"log"[..]).await.unwrap();
        }
        assert!(matches!(
            session.stage_part(&b"log"[..]).await,
            Err(UploadError::TooManyFiles { limit: 3 })
        ));
        assert_eq!(session.staged.len(), 3);
        drop(session);
        assert_eq!(dir_len(dir.path().join("staging")), 0);
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let dir = tempdir().unwrap();
        let service = service_in(&dir, PromoteStrategy::Copy).await;
        assert!(matches!(
            service.begin_upload().commit().await,
            Err(UploadError::EmptyUpload)
        ));
    }

    #[tokio::test]
    async fn failed_promotion_discards_remaining_staged_files() {
        let dir = tempdir().unwrap();
        let service = service_in(&dir, PromoteStrategy::Copy).await;

        let mut session = service.begin_upload();
        let first = session.stage_part(&b"one"[..]).await.unwrap();
        let second = session.stage_part(&b"two"[..]).await.unwrap();
        session.stage_part(&b"three"[..]).await.unwrap();
        std::fs::write(dir.path().join("logs").join(second.to_string()), b"squatter").unwrap();

        assert!(matches!(
            session.commit().await,
            Err(UploadError::Promote(PromoteError::CopyFailed { .. }))
        ));
        assert_eq!(dir_len(dir.path().join("staging")), 0);
        assert_eq!(read_stored(&service, first).await, b"one");
        assert_eq!(read_stored(&service, second).await, b"squatter");
    }
}
