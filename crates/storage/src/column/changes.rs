use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
use mailmeta_core::model::{AccountId, ChangeEvent, ChangePayload, ChangesPage, Limit, State};
use mailmeta_core::validation::ValidationError;

use super::{
    system_time_to_unix_micros, unix_micros_to_system_time, ColumnStore, Fields, Row, RowKey,
    Value,
};
use crate::config::{ConsistenciesConfig, StorageConfig};
use crate::{ChangeStorage, StorageError};

/// Partitioned by account id, clustered by state.
pub const EMAIL_CHANGE_TABLE: &str = "email_change";

const DATE: &str = "date";
const IS_DELEGATED: &str = "is_delegated";
const PAYLOAD: &str = "payload";

/// Applies a cursor, the delegation filter and a batch size to the full
/// history of one account, given in ascending state order.
///
/// The cursor is exclusive. A cursor other than [`State::INITIAL`] must name
/// an event of the history, delegated or not, otherwise
/// [`StorageError::CursorNotFound`] is returned. When nothing newer
/// qualifies, `new_state` stays at the cursor.
pub fn filter_and_paginate(
    mut events: Vec<ChangeEvent>,
    since: State,
    limit: Limit,
    include_delegated: bool,
) -> Result<ChangesPage, StorageError> {
    let newer = if since.is_initial() {
        events
    } else {
        let position = events
            .iter()
            .position(|event| event.state == since)
            .ok_or(StorageError::CursorNotFound(since))?;
        events.split_off(position + 1)
    };

    let mut changes: Vec<ChangeEvent> = newer
        .into_iter()
        .filter(|event| include_delegated || !event.is_delegated)
        .collect();
    let has_more = changes.len() > limit.get();
    changes.truncate(limit.get());
    let new_state = changes.last().map_or(since, |event| event.state);

    Ok(ChangesPage {
        changes,
        new_state,
        has_more,
    })
}

#[derive(Clone)]
pub struct ChangeLogRepository {
    store: Arc<dyn ColumnStore>,
    default_limit: Limit,
    consistencies: ConsistenciesConfig,
}

impl ChangeLogRepository {
    pub fn new(
        store: Arc<dyn ColumnStore>,
        default_limit: Limit,
        consistencies: ConsistenciesConfig,
    ) -> Self {
        Self {
            store,
            default_limit,
            consistencies,
        }
    }

    pub fn from_config(store: Arc<dyn ColumnStore>, config: &StorageConfig) -> Self {
        Self::new(store, config.default_change_limit, config.consistencies)
    }

    async fn fetch_all(&self, account_id: &AccountId) -> Result<Vec<ChangeEvent>, StorageError> {
        self.store
            .scan(
                EMAIL_CHANGE_TABLE,
                Value::from(account_id.as_str()),
                self.consistencies.regular,
            )
            .and_then(|row| async move { event_from_row(&row) })
            .try_collect()
            .await
    }
}

fn event_fields(change: &ChangeEvent) -> Result<Fields, StorageError> {
    let date = system_time_to_unix_micros(change.date).ok_or_else(|| {
        StorageError::InvalidArgument("change date is out of range".to_owned())
    })?;
    let payload = serde_json::to_string(&change.payload)
        .map_err(|error| StorageError::InvalidArgument(format!("change payload: {error}")))?;
    Ok(Fields::new()
        .with(DATE, date)
        .with(IS_DELEGATED, change.is_delegated)
        .with(PAYLOAD, payload))
}

fn event_from_row(row: &Row) -> Result<ChangeEvent, StorageError> {
    let account_id = row
        .key
        .partition
        .as_text()
        .ok_or_else(|| StorageError::Corrupted("change row without text account key".to_owned()))
        .and_then(|account| {
            AccountId::new(account)
                .map_err(|error| StorageError::Corrupted(format!("change row {error}")))
        })?;
    let state = row
        .key
        .clustering
        .as_ref()
        .and_then(Value::as_uuid)
        .map(State::from_uuid)
        .ok_or_else(|| StorageError::Corrupted("change row without uuid state".to_owned()))?;
    let micros = row.big_int(DATE)?;
    let date = unix_micros_to_system_time(micros)
        .ok_or_else(|| StorageError::Corrupted(format!("change date {micros} is out of range")))?;
    let payload: ChangePayload = serde_json::from_str(row.text(PAYLOAD)?)
        .map_err(|error| StorageError::Corrupted(format!("change payload: {error}")))?;

    Ok(ChangeEvent {
        account_id,
        state,
        date,
        is_delegated: row.bool(IS_DELEGATED)?,
        payload,
    })
}

#[async_trait]
impl ChangeStorage for ChangeLogRepository {
    async fn append(&self, change: &ChangeEvent) -> Result<(), StorageError> {
        if change.state.is_initial() {
            return Err(ValidationError::InitialState.into());
        }
        let key = RowKey::clustered(change.account_id.as_str(), change.state.as_uuid());
        let applied = self
            .store
            .put_if_absent(
                EMAIL_CHANGE_TABLE,
                key,
                event_fields(change)?,
                self.consistencies.lightweight_transaction,
            )
            .await?;
        if !applied {
            tracing::debug!(
                account_id = %change.account_id,
                state = %change.state,
                "change already recorded"
            );
            return Err(StorageError::DuplicateState(change.state));
        }
        Ok(())
    }

    async fn latest_state(
        &self,
        account_id: &AccountId,
        include_delegated: bool,
    ) -> Result<State, StorageError> {
        let events = self.fetch_all(account_id).await?;
        Ok(events
            .iter()
            .rev()
            .find(|event| include_delegated || !event.is_delegated)
            .map_or(State::INITIAL, |event| event.state))
    }

    async fn changes_since(
        &self,
        account_id: &AccountId,
        since: State,
        max_changes: Option<usize>,
        include_delegated: bool,
    ) -> Result<ChangesPage, StorageError> {
        let limit = match max_changes {
            Some(value) => Limit::new(value)?,
            None => self.default_limit,
        };
        let events = self.fetch_all(account_id).await?;
        filter_and_paginate(events, since, limit, include_delegated).inspect_err(|error| {
            if matches!(error, StorageError::CursorNotFound(_)) {
                tracing::debug!(account_id = %account_id, state = %since, "unknown change cursor");
            }
        })
    }
}
