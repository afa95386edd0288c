//! Mail store abstraction
//!
//! The rule engine talks to the remote mailbox only through the [`Mailbox`]
//! trait. [`GmailClient`](crate::gmail::GmailClient) is the production
//! implementation; [`InMemoryMailbox`] backs tests.

mod memory;
mod traits;

pub use memory::{InMemoryMailbox, StoredMessage};
pub use traits::{Mailbox, labels};
