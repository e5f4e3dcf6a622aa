//! Message passing
//!
//! Per-thread mailboxes for targeted `send`/`receive` and anonymous
//! mailboxes for `deposit`/`withdraw`. Both share one message format.

pub mod mailbox;
pub mod message;

pub use mailbox::{Mailbox, MailboxCore, SharedMailbox};
pub use message::{Message, Payload, INLINE_CAPACITY};
