//! Data model and identity rules shared by the content ingestion services.

pub mod identity;
pub mod models;

pub use identity::{derive_identity, Identity, IdentityError};
pub use models::{ContentItem, InvalidItem, SourceKind, SourceRecord};
