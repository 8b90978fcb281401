use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use mailmeta_core::model::{MailboxPath, MailboxRecord, UidValidity, Username};
use mailmeta_core::MailboxId;

use super::{ColumnStore, Fields, Row, RowKey};
use crate::config::{ConsistenciesConfig, StorageConfig};
use crate::{MailboxStorage, StorageError};

pub const MAILBOX_TABLE: &str = "mailbox";

const NAMESPACE: &str = "namespace";
const OWNER: &str = "owner";
const NAME: &str = "name";
const UID_VALIDITY: &str = "uid_validity";

/// Upper bound on rows re-materialized at once by
/// [`MailboxStorage::retrieve_all`], heal writes included.
pub const DEFAULT_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidityCheck {
    Valid(UidValidity),
    Sentinel,
}

/// First step of the heal protocol. A missing column reads as the sentinel.
#[must_use]
pub fn detect_sentinel(stored: Option<i64>) -> ValidityCheck {
    match stored.and_then(UidValidity::from_stored) {
        Some(uid_validity) => ValidityCheck::Valid(uid_validity),
        None => ValidityCheck::Sentinel,
    }
}

#[derive(Clone)]
pub struct MailboxRecordStore {
    store: Arc<dyn ColumnStore>,
    consistencies: ConsistenciesConfig,
}

impl MailboxRecordStore {
    pub fn new(store: Arc<dyn ColumnStore>, consistencies: ConsistenciesConfig) -> Self {
        Self {
            store,
            consistencies,
        }
    }

    pub fn from_config(store: Arc<dyn ColumnStore>, config: &StorageConfig) -> Self {
        Self::new(store, config.consistencies)
    }

    /// Second step of the heal protocol: draw a fresh value and persist it
    /// with a plain write, without reading it back.
    ///
    /// This is not a lightweight transaction. Two readers healing the same
    /// mailbox may each persist a different value; the last write wins and
    /// each caller keeps the value it wrote for the record it returns.
    pub async fn regenerate_uid_validity(
        &self,
        id: MailboxId,
    ) -> Result<UidValidity, StorageError> {
        let uid_validity = UidValidity::generate();
        self.store
            .put(
                MAILBOX_TABLE,
                mailbox_key(id),
                Fields::new().with(UID_VALIDITY, uid_validity.as_stored()),
                self.consistencies.regular,
            )
            .await?;
        tracing::warn!(
            mailbox_id = %id,
            uid_validity = uid_validity.get(),
            "replaced invalid UID validity"
        );
        Ok(uid_validity)
    }

    /// `None` for a row without any path column: a heal write that raced a
    /// delete leaves such a row behind.
    async fn record_from_row(&self, row: Row) -> Result<Option<MailboxRecord>, StorageError> {
        let id = row
            .key
            .partition
            .as_uuid()
            .map(MailboxId)
            .ok_or_else(|| StorageError::Corrupted("mailbox row without uuid key".to_owned()))?;
        let Some(path) = path_from_row(&row)? else {
            return Ok(None);
        };
        let uid_validity = match detect_sentinel(row.optional_big_int(UID_VALIDITY)?) {
            ValidityCheck::Valid(uid_validity) => uid_validity,
            ValidityCheck::Sentinel => self.regenerate_uid_validity(id).await?,
        };
        Ok(Some(MailboxRecord {
            id,
            path,
            uid_validity,
        }))
    }
}

fn mailbox_key(id: MailboxId) -> RowKey {
    RowKey::partition(id.as_uuid())
}

fn path_fields(path: &MailboxPath) -> Fields {
    Fields::new()
        .with(NAMESPACE, path.namespace.as_str())
        .with(OWNER, path.owner.as_str())
        .with(NAME, path.name.as_str())
}

fn path_from_row(row: &Row) -> Result<Option<MailboxPath>, StorageError> {
    let namespace = row.optional_text(NAMESPACE)?;
    let owner = row.optional_text(OWNER)?;
    let name = row.optional_text(NAME)?;
    match (namespace, owner, name) {
        (None, None, None) => Ok(None),
        (Some(namespace), Some(owner), Some(name)) => {
            let owner = Username::new(owner)
                .map_err(|error| StorageError::Corrupted(format!("mailbox {error}")))?;
            Ok(Some(MailboxPath {
                namespace: namespace.to_owned(),
                owner,
                name: name.to_owned(),
            }))
        }
        _ => Err(StorageError::Corrupted(
            "mailbox row with a partial path".to_owned(),
        )),
    }
}

#[async_trait]
impl MailboxStorage for MailboxRecordStore {
    async fn save(&self, mailbox: &MailboxRecord) -> Result<(), StorageError> {
        mailbox.path.validate()?;
        let fields =
            path_fields(&mailbox.path).with(UID_VALIDITY, mailbox.uid_validity.as_stored());
        self.store
            .put(
                MAILBOX_TABLE,
                mailbox_key(mailbox.id),
                fields,
                self.consistencies.regular,
            )
            .await
    }

    async fn update_path(&self, id: MailboxId, path: &MailboxPath) -> Result<(), StorageError> {
        path.validate()?;
        self.store
            .put(
                MAILBOX_TABLE,
                mailbox_key(id),
                path_fields(path),
                self.consistencies.regular,
            )
            .await
    }

    async fn delete(&self, id: MailboxId) -> Result<(), StorageError> {
        self.store
            .delete(MAILBOX_TABLE, &mailbox_key(id), self.consistencies.regular)
            .await
    }

    async fn retrieve(&self, id: MailboxId) -> Result<Option<MailboxRecord>, StorageError> {
        let row = self
            .store
            .get(MAILBOX_TABLE, &mailbox_key(id), self.consistencies.regular)
            .await?;
        match row {
            Some(row) => self.record_from_row(row).await,
            None => Ok(None),
        }
    }

    fn retrieve_all(&self) -> BoxStream<'_, Result<MailboxRecord, StorageError>> {
        self.store
            .scan_all(MAILBOX_TABLE, self.consistencies.regular)
            .map(move |row| async move {
                match row {
                    Ok(row) => self.record_from_row(row).await,
                    Err(error) => Err(error),
                }
            })
            .buffer_unordered(DEFAULT_CONCURRENCY)
            .filter_map(|record| future::ready(record.transpose()))
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::super::test_support::*;
    use super::*;

    fn repository(store: Arc<crate::MemoryColumnStore>) -> MailboxRecordStore {
        MailboxRecordStore::new(store, ConsistenciesConfig::default())
    }

    async fn store_raw_uid_validity(store: &crate::MemoryColumnStore, id: MailboxId, raw: i64) {
        store
            .put(
                MAILBOX_TABLE,
                mailbox_key(id),
                Fields::new().with(UID_VALIDITY, raw),
                crate::Consistency::Quorum,
            )
            .await
            .expect("store raw uid validity");
    }

    #[test]
    fn detect_sentinel_cases() {
        assert_eq!(detect_sentinel(None), ValidityCheck::Sentinel);
        assert_eq!(detect_sentinel(Some(0)), ValidityCheck::Sentinel);
        assert_eq!(detect_sentinel(Some(-5)), ValidityCheck::Sentinel);
        assert_eq!(
            detect_sentinel(Some(i64::from(u32::MAX) + 1)),
            ValidityCheck::Sentinel
        );
        let valid = UidValidity::try_from(7_u32).expect("valid");
        assert_eq!(detect_sentinel(Some(7)), ValidityCheck::Valid(valid));
    }

    #[tokio::test]
    async fn save_then_retrieve_roundtrip() {
        let repository = repository(memory_store());
        let mailbox = mailbox("INBOX");

        repository.save(&mailbox).await.expect("save mailbox");
        let retrieved = repository
            .retrieve(mailbox.id)
            .await
            .expect("retrieve")
            .expect("mailbox exists");

        assert_eq!(retrieved, mailbox);

        // Replaying a save is a no-op in effect.
        repository.save(&mailbox).await.expect("save again");
        assert_eq!(
            repository.retrieve(mailbox.id).await.expect("retrieve"),
            Some(mailbox)
        );
    }

    #[tokio::test]
    async fn retrieve_missing_mailbox_is_none() {
        let repository = repository(memory_store());
        assert_eq!(
            repository.retrieve(MailboxId::new()).await.expect("retrieve"),
            None
        );
    }

    #[tokio::test]
    async fn delete_then_retrieve_is_none() {
        let repository = repository(memory_store());
        let mailbox = mailbox("Trash");
        repository.save(&mailbox).await.expect("save");

        repository.delete(mailbox.id).await.expect("delete");
        assert_eq!(repository.retrieve(mailbox.id).await.expect("retrieve"), None);

        // Deleting again is still a success.
        repository.delete(mailbox.id).await.expect("delete again");
    }

    #[tokio::test]
    async fn update_path_keeps_uid_validity() {
        let repository = repository(memory_store());
        let mailbox = mailbox("Drafts");
        repository.save(&mailbox).await.expect("save");

        let renamed = mailbox_path("alice@example.com", "Archive");
        repository
            .update_path(mailbox.id, &renamed)
            .await
            .expect("update path");

        let retrieved = repository
            .retrieve(mailbox.id)
            .await
            .expect("retrieve")
            .expect("mailbox exists");
        assert_eq!(retrieved.path, renamed);
        assert_eq!(retrieved.uid_validity, mailbox.uid_validity);
    }

    #[tokio::test]
    async fn update_path_on_missing_mailbox_creates_a_healed_record() {
        let store = memory_store();
        let repository = repository(store.clone());
        let id = MailboxId::new();
        let path = mailbox_path("bob@example.com", "Ghost");

        repository
            .update_path(id, &path)
            .await
            .expect("update path");

        let retrieved = repository
            .retrieve(id)
            .await
            .expect("retrieve")
            .expect("partial record is visible");
        assert_eq!(retrieved.path, path);
        // One write for the path, one for the heal.
        assert_eq!(store.stats().plain_writes, 2);
    }

    #[tokio::test]
    async fn retrieve_heals_sentinel_uid_validity() {
        let store = memory_store();
        let repository = repository(store.clone());
        let mailbox = mailbox("INBOX");
        repository.save(&mailbox).await.expect("save");
        store_raw_uid_validity(&store, mailbox.id, UidValidity::SENTINEL).await;

        let healed = repository
            .retrieve(mailbox.id)
            .await
            .expect("retrieve")
            .expect("mailbox exists");
        assert_eq!(healed.path, mailbox.path);
        assert_ne!(healed.uid_validity.as_stored(), UidValidity::SENTINEL);

        // The heal was persisted with a plain write, not a conditional one.
        let stats = store.stats();
        assert_eq!(stats.conditional_writes, 0);
        assert_eq!(stats.serial_requests, 0);

        let again = repository
            .retrieve(mailbox.id)
            .await
            .expect("retrieve")
            .expect("mailbox exists");
        assert_eq!(again.uid_validity, healed.uid_validity);
    }

    #[tokio::test]
    async fn concurrent_heals_never_return_the_sentinel() {
        let store = memory_store();
        let repository = repository(store.clone());
        let mailbox = mailbox("INBOX");
        repository.save(&mailbox).await.expect("save");
        store_raw_uid_validity(&store, mailbox.id, UidValidity::SENTINEL).await;

        let (first, second) = tokio::join!(
            repository.retrieve(mailbox.id),
            repository.retrieve(mailbox.id)
        );
        for record in [first, second] {
            let record = record.expect("retrieve").expect("mailbox exists");
            assert_ne!(record.uid_validity.as_stored(), UidValidity::SENTINEL);
        }

        let settled = repository
            .retrieve(mailbox.id)
            .await
            .expect("retrieve")
            .expect("mailbox exists");
        assert_ne!(settled.uid_validity.as_stored(), UidValidity::SENTINEL);
    }

    #[tokio::test]
    async fn orphan_uid_validity_row_reads_as_missing() {
        let store = memory_store();
        let repository = repository(store.clone());
        let id = MailboxId::new();
        store_raw_uid_validity(&store, id, 42).await;

        assert_eq!(repository.retrieve(id).await.expect("retrieve"), None);
    }

    #[tokio::test]
    async fn retrieve_all_heals_every_row() {
        let store = memory_store();
        let repository = repository(store.clone());
        let mut expected = HashMap::new();
        for index in 0..40 {
            let mailbox = mailbox(&format!("folder-{index}"));
            repository.save(&mailbox).await.expect("save");
            if index % 3 == 0 {
                store_raw_uid_validity(&store, mailbox.id, UidValidity::SENTINEL).await;
            }
            expected.insert(mailbox.id, mailbox);
        }

        let records = collect(repository.retrieve_all()).await;
        assert_eq!(records.len(), expected.len());
        for record in records {
            let original = expected.get(&record.id).expect("known mailbox");
            assert_eq!(record.path, original.path);
            assert_ne!(record.uid_validity.as_stored(), UidValidity::SENTINEL);
        }
    }

    /// Delegates to the memory engine; `put` lingers so overlapping heal
    /// writes become observable.
    struct SlowPutStore {
        inner: Arc<crate::MemoryColumnStore>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ColumnStore for SlowPutStore {
        async fn get(
            &self,
            table: &'static str,
            key: &RowKey,
            consistency: crate::Consistency,
        ) -> Result<Option<Row>, StorageError> {
            self.inner.get(table, key, consistency).await
        }

        async fn put(
            &self,
            table: &'static str,
            key: RowKey,
            fields: Fields,
            consistency: crate::Consistency,
        ) -> Result<(), StorageError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let result = self.inner.put(table, key, fields, consistency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn put_if_absent(
            &self,
            table: &'static str,
            key: RowKey,
            fields: Fields,
            consistency: crate::Consistency,
        ) -> Result<bool, StorageError> {
            self.inner.put_if_absent(table, key, fields, consistency).await
        }

        async fn delete(
            &self,
            table: &'static str,
            key: &RowKey,
            consistency: crate::Consistency,
        ) -> Result<(), StorageError> {
            self.inner.delete(table, key, consistency).await
        }

        async fn delete_if_exists(
            &self,
            table: &'static str,
            key: &RowKey,
            consistency: crate::Consistency,
        ) -> Result<bool, StorageError> {
            self.inner.delete_if_exists(table, key, consistency).await
        }

        fn scan(
            &self,
            table: &'static str,
            partition: crate::Value,
            consistency: crate::Consistency,
        ) -> BoxStream<'_, Result<Row, StorageError>> {
            self.inner.scan(table, partition, consistency)
        }

        fn scan_all(
            &self,
            table: &'static str,
            consistency: crate::Consistency,
        ) -> BoxStream<'_, Result<Row, StorageError>> {
            self.inner.scan_all(table, consistency)
        }
    }

    #[tokio::test]
    async fn retrieve_all_bounds_concurrent_heal_writes() {
        let inner = memory_store();
        let seeding = repository(inner.clone());
        let mut expected = HashMap::new();
        for index in 0..100 {
            // A path-only row carries no validity, so every row needs a heal.
            let id = MailboxId::new();
            let path = mailbox_path("bob@example.com", &format!("folder-{index}"));
            seeding.update_path(id, &path).await.expect("seed path");
            expected.insert(id, path);
        }

        let slow = Arc::new(SlowPutStore {
            inner,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let repository = MailboxRecordStore::new(slow.clone(), ConsistenciesConfig::default());

        let records = collect(repository.retrieve_all()).await;
        assert_eq!(records.len(), expected.len());
        for record in &records {
            assert_eq!(
                Some(&record.path),
                expected.get(&record.id),
                "path of {}",
                record.id
            );
            assert_ne!(record.uid_validity.as_stored(), UidValidity::SENTINEL);
        }

        let peak = slow.peak.load(Ordering::SeqCst);
        assert!(peak <= DEFAULT_CONCURRENCY, "peak heal writes {peak}");
        assert!(peak > 1, "heal writes never overlapped");
        assert_eq!(slow.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn save_rejects_invalid_paths() {
        let repository = repository(memory_store());
        let mut mailbox = mailbox("INBOX");
        mailbox.path.name = String::new();

        let error = repository.save(&mailbox).await.expect_err("empty name");
        assert_eq!(
            error,
            StorageError::InvalidArgument("name must not be empty".to_owned())
        );
    }

    #[tokio::test]
    async fn unavailable_store_propagates() {
        let store = memory_store();
        let repository = repository(store.clone());
        store.set_unavailable(true);

        let error = repository
            .retrieve(MailboxId::new())
            .await
            .expect_err("store is down");
        assert!(matches!(error, StorageError::Unavailable(_)));
        let error = repository
            .save(&mailbox("INBOX"))
            .await
            .expect_err("store is down");
        assert!(matches!(error, StorageError::Unavailable(_)));
    }
}
