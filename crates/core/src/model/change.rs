use std::fmt::{Display, Formatter};
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{validate_name, ValidationError, DEFAULT_CHANGE_LIMIT};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_name("account id", &value)?;
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque position in an account's change log.
///
/// Generated states are UUIDv7 values, so byte order is creation order. The
/// nil UUID is reserved for [`State::INITIAL`] and sorts before all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(Uuid);

impl State {
    /// "Nothing observed yet"; never assigned to a stored change.
    pub const INITIAL: State = State(Uuid::nil());

    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub const fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    #[must_use]
    pub fn is_initial(&self) -> bool {
        *self == Self::INITIAL
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for State {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Ids touched by a change. The change log stores it without looking inside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destroyed: Vec<String>,
}

impl ChangePayload {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.destroyed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub account_id: AccountId,
    pub state: State,
    pub date: SystemTime,
    pub is_delegated: bool,
    pub payload: ChangePayload,
}

impl ChangeEvent {
    /// A change made by the account owner, stamped with a fresh state.
    pub fn new(account_id: AccountId, payload: ChangePayload) -> Self {
        Self {
            account_id,
            state: State::generate(),
            date: SystemTime::now(),
            is_delegated: false,
            payload,
        }
    }

    /// Marks the change as performed by someone acting for the owner.
    #[must_use]
    pub fn delegated(mut self) -> Self {
        self.is_delegated = true;
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }
}

/// Upper bound on the number of changes returned by one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Limit(NonZeroUsize);

impl Limit {
    pub const DEFAULT: Limit = match NonZeroUsize::new(DEFAULT_CHANGE_LIMIT) {
        Some(value) => Limit(value),
        None => panic!("default change limit must be positive"),
    };

    pub fn new(value: usize) -> Result<Self, ValidationError> {
        NonZeroUsize::new(value)
            .map(Self)
            .ok_or(ValidationError::NonPositiveLimit)
    }

    #[must_use]
    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for Limit {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One batch of changes read from a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesPage {
    pub changes: Vec<ChangeEvent>,
    /// Cursor to pass to the next read.
    pub new_state: State,
    pub has_more: bool,
}

impl ChangesPage {
    #[must_use]
    pub fn states(&self) -> Vec<State> {
        self.changes.iter().map(|change| change.state).collect()
    }
}
