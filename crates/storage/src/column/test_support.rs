use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use futures_util::stream::BoxStream;
use futures_util::TryStreamExt;
use mailmeta_core::model::{
    AccountId, ChangeEvent, ChangePayload, MailKey, MailboxPath, MailboxRecord, RepositoryUrl,
    State, Username,
};
use mailmeta_core::MailboxId;

use super::MemoryColumnStore;

// Re-export the domain traits so test modules can `use super::super::test_support::*`
// and call every trait method on the repositories.
#[allow(unused_imports)]
pub(super) use crate::{
    ChangeStorage, ColumnStore, ConsistenciesConfig, KeysetStorage, MailboxStorage, StorageError,
};

pub(super) fn memory_store() -> Arc<MemoryColumnStore> {
    Arc::new(MemoryColumnStore::new())
}

pub(super) fn mailbox_path(owner: &str, name: &str) -> MailboxPath {
    MailboxPath::private(Username::new(owner).expect("owner"), name).expect("mailbox path")
}

pub(super) fn mailbox(name: &str) -> MailboxRecord {
    MailboxRecord::new(MailboxId::new(), mailbox_path("bob@example.com", name))
}

pub(super) fn account(name: &str) -> AccountId {
    AccountId::new(name).expect("account id")
}

/// Deterministic state; `state(1) < state(2) < …`.
pub(super) fn state(n: u128) -> State {
    State::from_uuid(uuid::Uuid::from_u128(n))
}

pub(super) fn change(account_id: &AccountId, n: u128, delegated: bool) -> ChangeEvent {
    ChangeEvent {
        account_id: account_id.clone(),
        state: state(n),
        date: UNIX_EPOCH + Duration::from_secs(1_700_000_000 + n as u64),
        is_delegated: delegated,
        payload: ChangePayload {
            created: vec![format!("message-{n}")],
            ..ChangePayload::default()
        },
    }
}

pub(super) fn repository_url(value: &str) -> RepositoryUrl {
    RepositoryUrl::new(value).expect("repository url")
}

pub(super) fn mail_key(value: &str) -> MailKey {
    MailKey::new(value).expect("mail key")
}

pub(super) async fn collect<T>(stream: BoxStream<'_, Result<T, StorageError>>) -> Vec<T> {
    stream.try_collect().await.expect("collect stream")
}
