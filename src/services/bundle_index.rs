//! Bundle index: staged-file markers and bundle records, both stored in the
//! key-value collaborator with a TTL equal to the retention window.

use crate::{
    models::{
        bundle_codec::{self, CodecError},
        ids::{BundleId, FileId},
    },
    services::kv_store::{KeyValueError, KeyValueStore},
};
use chrono::{SecondsFormat, Utc};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

/// Namespace of staged file markers; the value is the staging time in UTC.
const STAGED_LOGS_NAMESPACE: &str = "stagedLogs";

/// Namespace of bundle records; the value is the encoded member id list.
const LOG_BUNDLES_NAMESPACE: &str = "logBundles";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("log bundle `{0}` not found")]
    NotFound(BundleId),
    #[error("failed to encode bundle members: {0}")]
    EncodeFailed(#[source] CodecError),
    #[error("stored record for log bundle `{id}` is corrupt: {source}")]
    DecodeFailed {
        id: BundleId,
        #[source]
        source: CodecError,
    },
    #[error("failed to write to the index: {0}")]
    WriteFailed(#[source] KeyValueError),
    #[error("failed to read from the index: {0}")]
    ReadFailed(#[source] KeyValueError),
}

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Clone)]
pub struct BundleIndex {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

fn index_key(namespace: &str, id: impl std::fmt::Display) -> String {
    format!("{}:{}", namespace, id)
}

impl BundleIndex {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Record that `id` finished staging. Bookkeeping only; promotion does
    /// not consult it.
    pub async fn mark_staged(&self, id: FileId) -> IndexResult<()> {
        let key = index_key(STAGED_LOGS_NAMESPACE, id);
        let staged_at = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        self.store
            .set(&key, staged_at.as_bytes(), self.ttl)
            .await
            .map_err(|err| {
                tracing::error!(key = %key, value = %staged_at, error = %err, "failed to set value for key");
                IndexError::WriteFailed(err)
            })
    }

    /// Persist a new bundle holding `ids` in the given order.
    pub async fn create_bundle(&self, ids: &[FileId]) -> IndexResult<BundleId> {
        let encoded = bundle_codec::encode(ids).map_err(|err| {
            tracing::error!(error = %err, "failed to encode IDs");
            IndexError::EncodeFailed(err)
        })?;

        let bundle_id = BundleId::new();
        let key = index_key(LOG_BUNDLES_NAMESPACE, bundle_id);
        self.store
            .set(&key, &encoded, self.ttl)
            .await
            .map_err(|err| {
                tracing::error!(key = %key, error = %err, "failed to set value for key");
                IndexError::WriteFailed(err)
            })?;

        tracing::debug!(bundle_id = %bundle_id, files = ids.len(), "created log bundle");
        Ok(bundle_id)
    }

    pub async fn get_bundle(&self, id: BundleId) -> IndexResult<Vec<FileId>> {
        let key = index_key(LOG_BUNDLES_NAMESPACE, id);
        let raw = self
            .store
            .get(&key)
            .await
            .map_err(IndexError::ReadFailed)?
            .ok_or(IndexError::NotFound(id))?;

        bundle_codec::decode(&raw).map_err(|source| IndexError::DecodeFailed { id, source })
    }

    #[cfg(test)]
    pub(crate) async fn staged_at(&self, id: FileId) -> Option<String> {
        let key = index_key(STAGED_LOGS_NAMESPACE, id);
        self.store
            .get(&key)
            .await
            .unwrap()
            .map(|raw| String::from_utf8(raw).unwrap())
    }
}
