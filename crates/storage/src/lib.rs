#![forbid(unsafe_code)]

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use mailmeta_core::model::{
    AccountId, ChangeEvent, ChangesPage, MailKey, MailboxPath, MailboxRecord, RepositoryUrl, State,
};
use mailmeta_core::validation::ValidationError;
use mailmeta_core::MailboxId;

pub mod column;
pub mod config;

pub use column::{
    detect_sentinel, filter_and_paginate, ChangeLogRepository, ColumnStore, Consistency, Fields,
    KeysetMode, KeysetStore, MailboxRecordStore, MemoryColumnStore, Row, RowKey, ValidityCheck,
    Value, WriteStats, DEFAULT_CONCURRENCY,
};
pub use config::{ConsistenciesConfig, StorageConfig};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The cursor is stale or unknown; the caller must restart from
    /// [`State::INITIAL`].
    #[error("state '{0}' could not be found")]
    CursorNotFound(State),
    #[error("state '{0}' already exists")]
    DuplicateState(State),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Transient engine failure. The outcome of a write is unknown.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("corrupted row: {0}")]
    Corrupted(String),
}

impl From<ValidationError> for StorageError {
    fn from(error: ValidationError) -> Self {
        Self::InvalidArgument(error.to_string())
    }
}

// ---------------------------------------------------------------------------
// Domain-specific storage traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MailboxStorage: Send + Sync {
    /// Upserts the whole record. Replaying a save has no further effect.
    async fn save(&self, mailbox: &MailboxRecord) -> Result<(), StorageError>;
    /// Rewrites namespace, owner and name only. Does not check that the
    /// mailbox exists.
    async fn update_path(&self, id: MailboxId, path: &MailboxPath) -> Result<(), StorageError>;
    async fn delete(&self, id: MailboxId) -> Result<(), StorageError>;
    async fn retrieve(&self, id: MailboxId) -> Result<Option<MailboxRecord>, StorageError>;
    fn retrieve_all(&self) -> BoxStream<'_, Result<MailboxRecord, StorageError>>;
}

#[async_trait]
pub trait ChangeStorage: Send + Sync {
    async fn append(&self, change: &ChangeEvent) -> Result<(), StorageError>;
    async fn latest_state(
        &self,
        account_id: &AccountId,
        include_delegated: bool,
    ) -> Result<State, StorageError>;
    /// Changes strictly after `since`, at most `max_changes` of them (the
    /// configured default when `None`).
    async fn changes_since(
        &self,
        account_id: &AccountId,
        since: State,
        max_changes: Option<usize>,
        include_delegated: bool,
    ) -> Result<ChangesPage, StorageError>;
}

#[async_trait]
pub trait KeysetStorage: Send + Sync {
    /// Returns whether the write was applied. Only meaningful in strict mode.
    async fn add(&self, url: &RepositoryUrl, key: &MailKey) -> Result<bool, StorageError>;
    async fn remove(&self, url: &RepositoryUrl, key: &MailKey) -> Result<bool, StorageError>;
    fn list(&self, url: &RepositoryUrl) -> BoxStream<'_, Result<MailKey, StorageError>>;
}
