//! Domain models for mail entities

mod message;

pub use message::{AttachmentPart, HeaderMap, MessageDetail, MessageId};
