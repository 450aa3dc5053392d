//! SQLite persistence for classified events.

mod error;
mod event_store;
mod schema;

pub use error::StoreError;
pub use event_store::{default_store_path, EventStore, StoredEvent};
pub use schema::{SCHEMA, SCHEMA_VERSION};
