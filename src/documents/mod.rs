pub mod api_types;
pub mod cache;
pub mod client;
#[cfg(test)]
pub mod memory;
pub mod types;

pub use client::{DocumentApi, RestDocumentClient};
pub use types::{Document, DocumentPatch, NewDocument, SyncState};
