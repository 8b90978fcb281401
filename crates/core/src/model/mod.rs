mod change;
mod keyset;
mod mailbox;

pub use change::{AccountId, ChangeEvent, ChangePayload, ChangesPage, Limit, State};
pub use keyset::{MailKey, RepositoryUrl};
pub use mailbox::{MailboxPath, MailboxRecord, UidValidity, Username, PRIVATE_NAMESPACE};
