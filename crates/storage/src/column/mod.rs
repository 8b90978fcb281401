//! Repositories over a partitioned column store.
//!
//! The store offers single-partition reads, plain writes, conditional
//! (lightweight transaction) writes and partition scans. Nothing spans
//! partitions atomically.

mod changes;
mod keysets;
mod mailboxes;
mod memory;

#[cfg(test)]
mod test_support;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use uuid::Uuid;

use crate::StorageError;

pub use changes::{filter_and_paginate, ChangeLogRepository, EMAIL_CHANGE_TABLE};
pub use keysets::{KeysetMode, KeysetStore, MAIL_REPOSITORY_KEYS_TABLE};
pub use mailboxes::{
    detect_sentinel, MailboxRecordStore, ValidityCheck, DEFAULT_CONCURRENCY, MAILBOX_TABLE,
};
pub use memory::{MemoryColumnStore, WriteStats};

/// Per-request consistency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consistency {
    One,
    Quorum,
    LocalQuorum,
    /// Linearizable; used by conditional writes.
    Serial,
    LocalSerial,
}

impl Consistency {
    #[must_use]
    pub fn is_serial(self) -> bool {
        matches!(self, Self::Serial | Self::LocalSerial)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::One => "ONE",
            Self::Quorum => "QUORUM",
            Self::LocalQuorum => "LOCAL_QUORUM",
            Self::Serial => "SERIAL",
            Self::LocalSerial => "LOCAL_SERIAL",
        }
    }
}

impl Display for Consistency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("unknown consistency level {0:?}")]
pub struct UnknownConsistency(pub String);

impl FromStr for Consistency {
    type Err = UnknownConsistency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONE" => Ok(Self::One),
            "QUORUM" => Ok(Self::Quorum),
            "LOCAL_QUORUM" => Ok(Self::LocalQuorum),
            "SERIAL" => Ok(Self::Serial),
            "LOCAL_SERIAL" => Ok(Self::LocalSerial),
            _ => Err(UnknownConsistency(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Bool(bool),
    BigInt(i64),
    Text(String),
    Uuid(Uuid),
}

impl Value {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(value) => Some(*value),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::BigInt(_) => "bigint",
            Self::Text(_) => "text",
            Self::Uuid(_) => "uuid",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::BigInt(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

/// Primary key of a row. Rows sharing a partition are kept in ascending
/// clustering order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub partition: Value,
    pub clustering: Option<Value>,
}

impl RowKey {
    pub fn partition(partition: impl Into<Value>) -> Self {
        Self {
            partition: partition.into(),
            clustering: None,
        }
    }

    pub fn clustered(partition: impl Into<Value>, clustering: impl Into<Value>) -> Self {
        Self {
            partition: partition.into(),
            clustering: Some(clustering.into()),
        }
    }
}

/// Non-key columns of a row. Writing a `Fields` set only touches the columns
/// it names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.0.insert(column.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn merge(&mut self, other: Fields) {
        self.0.extend(other.0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: RowKey,
    pub fields: Fields,
}

impl Row {
    pub fn optional_text(&self, column: &str) -> Result<Option<&str>, StorageError> {
        match self.fields.get(column) {
            None => Ok(None),
            Some(Value::Text(value)) => Ok(Some(value.as_str())),
            Some(other) => Err(wrong_type(column, "text", other)),
        }
    }

    pub fn text(&self, column: &str) -> Result<&str, StorageError> {
        self.optional_text(column)?
            .ok_or_else(|| missing_column(column))
    }

    pub fn optional_big_int(&self, column: &str) -> Result<Option<i64>, StorageError> {
        match self.fields.get(column) {
            None => Ok(None),
            Some(Value::BigInt(value)) => Ok(Some(*value)),
            Some(other) => Err(wrong_type(column, "bigint", other)),
        }
    }

    pub fn big_int(&self, column: &str) -> Result<i64, StorageError> {
        self.optional_big_int(column)?
            .ok_or_else(|| missing_column(column))
    }

    pub fn bool(&self, column: &str) -> Result<bool, StorageError> {
        match self.fields.get(column) {
            None => Err(missing_column(column)),
            Some(Value::Bool(value)) => Ok(*value),
            Some(other) => Err(wrong_type(column, "boolean", other)),
        }
    }
}

fn missing_column(column: &str) -> StorageError {
    StorageError::Corrupted(format!("missing column {column}"))
}

fn wrong_type(column: &str, expected: &str, found: &Value) -> StorageError {
    StorageError::Corrupted(format!(
        "column {column} should be {expected}, found {}",
        found.type_name()
    ))
}

/// The persistence engine. Every call names its table and consistency level;
/// every call touches a single partition except [`ColumnStore::scan_all`].
#[async_trait]
pub trait ColumnStore: Send + Sync {
    async fn get(
        &self,
        table: &'static str,
        key: &RowKey,
        consistency: Consistency,
    ) -> Result<Option<Row>, StorageError>;

    /// Unconditional upsert. Columns absent from `fields` keep their value.
    async fn put(
        &self,
        table: &'static str,
        key: RowKey,
        fields: Fields,
        consistency: Consistency,
    ) -> Result<(), StorageError>;

    /// Conditional insert. Returns `false` when the row already existed.
    async fn put_if_absent(
        &self,
        table: &'static str,
        key: RowKey,
        fields: Fields,
        consistency: Consistency,
    ) -> Result<bool, StorageError>;

    /// Unconditional delete; deleting a missing row succeeds.
    async fn delete(
        &self,
        table: &'static str,
        key: &RowKey,
        consistency: Consistency,
    ) -> Result<(), StorageError>;

    /// Conditional delete. Returns `false` when the row was already absent.
    async fn delete_if_exists(
        &self,
        table: &'static str,
        key: &RowKey,
        consistency: Consistency,
    ) -> Result<bool, StorageError>;

    /// Rows of one partition in ascending clustering order.
    fn scan(
        &self,
        table: &'static str,
        partition: Value,
        consistency: Consistency,
    ) -> BoxStream<'_, Result<Row, StorageError>>;

    /// Every row of the table, in no particular partition order.
    fn scan_all(
        &self,
        table: &'static str,
        consistency: Consistency,
    ) -> BoxStream<'_, Result<Row, StorageError>>;
}

pub(crate) fn system_time_to_unix_micros(value: SystemTime) -> Option<i64> {
    match value.duration_since(UNIX_EPOCH) {
        Ok(duration) => i64::try_from(duration.as_micros()).ok(),
        Err(error) => i64::try_from(error.duration().as_micros())
            .ok()
            .map(|micros| -micros),
    }
}

pub(crate) fn unix_micros_to_system_time(value: i64) -> Option<SystemTime> {
    let duration = Duration::from_micros(value.unsigned_abs());
    if value >= 0 {
        UNIX_EPOCH.checked_add(duration)
    } else {
        UNIX_EPOCH.checked_sub(duration)
    }
}
