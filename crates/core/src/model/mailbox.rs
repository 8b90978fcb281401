use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::validation::{validate_name, ValidationError};
use crate::MailboxId;

pub const PRIVATE_NAMESPACE: &str = "#private";

/// Principal owning a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_name("owner", &value)?;
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Username {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MailboxPath {
    pub namespace: String,
    pub owner: Username,
    pub name: String,
}

impl MailboxPath {
    pub fn new(
        namespace: impl Into<String>,
        owner: Username,
        name: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let path = Self {
            namespace: namespace.into(),
            owner,
            name: name.into(),
        };
        path.validate()?;
        Ok(path)
    }

    /// Path in the owner's private namespace.
    pub fn private(owner: Username, name: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(PRIVATE_NAMESPACE, owner, name)
    }

    /// Re-checks every component; fields are public so a path may have been
    /// assembled without going through [`MailboxPath::new`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name("namespace", &self.namespace)?;
        validate_name("owner", self.owner.as_str())?;
        validate_name("name", &self.name)
    }
}

impl Display for MailboxPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.owner, self.name)
    }
}

/// Generation marker of a mailbox's UID space. Zero is reserved as the
/// invalid sentinel and can never be held by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct UidValidity(NonZeroU32);

impl UidValidity {
    /// Raw stored value signalling "invalid".
    pub const SENTINEL: i64 = 0;

    /// Random non-zero value. A zero draw (one chance in 2^32) maps to 1.
    #[must_use]
    pub fn generate() -> Self {
        Self(NonZeroU32::new(OsRng.next_u32()).unwrap_or(NonZeroU32::MIN))
    }

    /// Interprets a raw stored column. Anything outside `1..=u32::MAX` is
    /// treated like the sentinel and yields `None`.
    #[must_use]
    pub fn from_stored(raw: i64) -> Option<Self> {
        u32::try_from(raw).ok().and_then(NonZeroU32::new).map(Self)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    #[must_use]
    pub fn as_stored(self) -> i64 {
        i64::from(self.0.get())
    }
}

impl TryFrom<u32> for UidValidity {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        NonZeroU32::new(value)
            .map(Self)
            .ok_or(ValidationError::InvalidUidValidity)
    }
}

impl From<UidValidity> for u32 {
    fn from(value: UidValidity) -> Self {
        value.get()
    }
}

impl Display for UidValidity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxRecord {
    pub id: MailboxId,
    pub path: MailboxPath,
    pub uid_validity: UidValidity,
}

impl MailboxRecord {
    /// New record with a freshly generated UID validity.
    pub fn new(id: MailboxId, path: MailboxPath) -> Self {
        Self {
            id,
            path,
            uid_validity: UidValidity::generate(),
        }
    }
}
