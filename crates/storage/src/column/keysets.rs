use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use mailmeta_core::model::{MailKey, RepositoryUrl};

use super::{ColumnStore, Consistency, Fields, Row, RowKey, Value};
use crate::config::{ConsistenciesConfig, StorageConfig};
use crate::{KeysetStorage, StorageError};

/// Partitioned by repository url, clustered by key.
pub const MAIL_REPOSITORY_KEYS_TABLE: &str = "mail_repository_keys";

/// How membership writes reach the store. Fixed for the lifetime of a
/// [`KeysetStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeysetMode {
    /// Conditional writes; the `applied` result tells whether this call
    /// changed membership.
    #[default]
    Strict,
    /// Plain writes; every accepted call reports `true`.
    Relaxed,
}

#[async_trait]
trait MembershipWrites: Send + Sync {
    async fn insert(&self, store: &dyn ColumnStore, key: RowKey) -> Result<bool, StorageError>;
    async fn remove(&self, store: &dyn ColumnStore, key: &RowKey) -> Result<bool, StorageError>;
}

struct ConditionalWrites {
    consistency: Consistency,
}

#[async_trait]
impl MembershipWrites for ConditionalWrites {
    async fn insert(&self, store: &dyn ColumnStore, key: RowKey) -> Result<bool, StorageError> {
        store
            .put_if_absent(MAIL_REPOSITORY_KEYS_TABLE, key, Fields::new(), self.consistency)
            .await
    }

    async fn remove(&self, store: &dyn ColumnStore, key: &RowKey) -> Result<bool, StorageError> {
        store
            .delete_if_exists(MAIL_REPOSITORY_KEYS_TABLE, key, self.consistency)
            .await
    }
}

struct PlainWrites {
    consistency: Consistency,
}

#[async_trait]
impl MembershipWrites for PlainWrites {
    async fn insert(&self, store: &dyn ColumnStore, key: RowKey) -> Result<bool, StorageError> {
        store
            .put(MAIL_REPOSITORY_KEYS_TABLE, key, Fields::new(), self.consistency)
            .await?;
        Ok(true)
    }

    async fn remove(&self, store: &dyn ColumnStore, key: &RowKey) -> Result<bool, StorageError> {
        store
            .delete(MAIL_REPOSITORY_KEYS_TABLE, key, self.consistency)
            .await?;
        Ok(true)
    }
}

fn membership_writes(
    mode: KeysetMode,
    consistencies: ConsistenciesConfig,
) -> Arc<dyn MembershipWrites> {
    match mode {
        KeysetMode::Strict => Arc::new(ConditionalWrites {
            consistency: consistencies.lightweight_transaction,
        }),
        KeysetMode::Relaxed => Arc::new(PlainWrites {
            consistency: consistencies.regular,
        }),
    }
}

#[derive(Clone)]
pub struct KeysetStore {
    store: Arc<dyn ColumnStore>,
    writes: Arc<dyn MembershipWrites>,
    mode: KeysetMode,
    regular: Consistency,
}

impl KeysetStore {
    pub fn new(
        store: Arc<dyn ColumnStore>,
        mode: KeysetMode,
        consistencies: ConsistenciesConfig,
    ) -> Self {
        Self {
            store,
            writes: membership_writes(mode, consistencies),
            mode,
            regular: consistencies.regular,
        }
    }

    pub fn from_config(store: Arc<dyn ColumnStore>, config: &StorageConfig) -> Self {
        Self::new(store, config.keyset_mode, config.consistencies)
    }

    #[must_use]
    pub fn mode(&self) -> KeysetMode {
        self.mode
    }
}

fn key_row(url: &RepositoryUrl, key: &MailKey) -> RowKey {
    RowKey::clustered(url.as_str(), key.as_str())
}

fn key_from_row(row: Row) -> Result<MailKey, StorageError> {
    let raw = row
        .key
        .clustering
        .as_ref()
        .and_then(Value::as_text)
        .ok_or_else(|| StorageError::Corrupted("keyset row without text key".to_owned()))?;
    MailKey::new(raw).map_err(|error| StorageError::Corrupted(format!("keyset row {error}")))
}

#[async_trait]
impl KeysetStorage for KeysetStore {
    async fn add(&self, url: &RepositoryUrl, key: &MailKey) -> Result<bool, StorageError> {
        let applied = self
            .writes
            .insert(self.store.as_ref(), key_row(url, key))
            .await?;
        if !applied {
            tracing::debug!(repository = %url, key = %key, "key already present");
        }
        Ok(applied)
    }

    async fn remove(&self, url: &RepositoryUrl, key: &MailKey) -> Result<bool, StorageError> {
        let applied = self
            .writes
            .remove(self.store.as_ref(), &key_row(url, key))
            .await?;
        if !applied {
            tracing::debug!(repository = %url, key = %key, "key already absent");
        }
        Ok(applied)
    }

    fn list(&self, url: &RepositoryUrl) -> BoxStream<'_, Result<MailKey, StorageError>> {
        self.store
            .scan(
                MAIL_REPOSITORY_KEYS_TABLE,
                Value::from(url.as_str()),
                self.regular,
            )
            .map(|row| row.and_then(key_from_row))
            .boxed()
    }
}
