use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;

use super::{ColumnStore, Consistency, Fields, Row, RowKey, Value};
use crate::StorageError;

type Table = BTreeMap<RowKey, Fields>;

/// Request counters, for checking which write primitives a repository used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub plain_writes: u64,
    pub conditional_writes: u64,
    pub serial_requests: u64,
}

/// In-process [`ColumnStore`]. Every request is linearizable, whatever
/// consistency level it names.
#[derive(Debug, Default)]
pub struct MemoryColumnStore {
    tables: RwLock<HashMap<&'static str, Table>>,
    unavailable: AtomicBool,
    plain_writes: AtomicU64,
    conditional_writes: AtomicU64,
    serial_requests: AtomicU64,
}

impl MemoryColumnStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every request fails with [`StorageError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn stats(&self) -> WriteStats {
        WriteStats {
            plain_writes: self.plain_writes.load(Ordering::Relaxed),
            conditional_writes: self.conditional_writes.load(Ordering::Relaxed),
            serial_requests: self.serial_requests.load(Ordering::Relaxed),
        }
    }

    fn begin(&self, consistency: Consistency) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!(
                "no replica answered at consistency {consistency}"
            )));
        }
        if consistency.is_serial() {
            self.serial_requests.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn snapshot(&self, table: &'static str, partition: Option<&Value>) -> Vec<Row> {
        let tables = self.tables.read().await;
        let Some(rows) = tables.get(table) else {
            return Vec::new();
        };
        let to_row = |(key, fields): (&RowKey, &Fields)| Row {
            key: key.clone(),
            fields: fields.clone(),
        };
        match partition {
            Some(partition) => rows
                .range(RowKey::partition(partition.clone())..)
                .take_while(|(key, _)| key.partition == *partition)
                .map(to_row)
                .collect(),
            None => rows.iter().map(to_row).collect(),
        }
    }
}

fn rows_stream(
    rows: Result<Vec<Row>, StorageError>,
) -> BoxStream<'static, Result<Row, StorageError>> {
    let items: Vec<Result<Row, StorageError>> = match rows {
        Ok(rows) => rows.into_iter().map(Ok).collect(),
        Err(error) => vec![Err(error)],
    };
    stream::iter(items).boxed()
}

#[async_trait]
impl ColumnStore for MemoryColumnStore {
    async fn get(
        &self,
        table: &'static str,
        key: &RowKey,
        consistency: Consistency,
    ) -> Result<Option<Row>, StorageError> {
        self.begin(consistency)?;
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .map(|fields| Row {
                key: key.clone(),
                fields: fields.clone(),
            }))
    }

    async fn put(
        &self,
        table: &'static str,
        key: RowKey,
        fields: Fields,
        consistency: Consistency,
    ) -> Result<(), StorageError> {
        self.begin(consistency)?;
        self.plain_writes.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write().await;
        tables
            .entry(table)
            .or_default()
            .entry(key)
            .or_default()
            .merge(fields);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        table: &'static str,
        key: RowKey,
        fields: Fields,
        consistency: Consistency,
    ) -> Result<bool, StorageError> {
        self.begin(consistency)?;
        self.conditional_writes.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write().await;
        match tables.entry(table).or_default().entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(fields);
                Ok(true)
            }
        }
    }

    async fn delete(
        &self,
        table: &'static str,
        key: &RowKey,
        consistency: Consistency,
    ) -> Result<(), StorageError> {
        self.begin(consistency)?;
        self.plain_writes.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write().await;
        if let Some(rows) = tables.get_mut(table) {
            rows.remove(key);
        }
        Ok(())
    }

    async fn delete_if_exists(
        &self,
        table: &'static str,
        key: &RowKey,
        consistency: Consistency,
    ) -> Result<bool, StorageError> {
        self.begin(consistency)?;
        self.conditional_writes.fetch_add(1, Ordering::Relaxed);
        let mut tables = self.tables.write().await;
        Ok(tables
            .get_mut(table)
            .and_then(|rows| rows.remove(key))
            .is_some())
    }

    fn scan(
        &self,
        table: &'static str,
        partition: Value,
        consistency: Consistency,
    ) -> BoxStream<'_, Result<Row, StorageError>> {
        stream::once(async move {
            self.begin(consistency)?;
            Ok::<_, StorageError>(self.snapshot(table, Some(&partition)).await)
        })
        .flat_map(rows_stream)
        .boxed()
    }

    fn scan_all(
        &self,
        table: &'static str,
        consistency: Consistency,
    ) -> BoxStream<'_, Result<Row, StorageError>> {
        stream::once(async move {
            self.begin(consistency)?;
            Ok::<_, StorageError>(self.snapshot(table, None).await)
        })
        .flat_map(rows_stream)
        .boxed()
    }
}
