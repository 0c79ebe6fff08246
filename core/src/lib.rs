/// Threadline - Conversation Store Service
///
/// A document-oriented persistence layer for two-party chat: per-user
/// conversation indexes and per-conversation message logs, kept in sync
/// across both parties by explicit dual writes with per-document
/// atomicity only.

pub mod api;
pub mod auth;
pub mod blob;
pub mod codec;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod identity;
pub mod index;
pub mod log;
pub mod message;
pub mod store;
pub mod sync;

pub use config::Config;
pub use error::{Result, StoreError};
pub use identity::UserKey;
pub use message::{Message, MessageKind, MessageRecord};
pub use sync::Synchronizer;
