//! # DataService - generic data access over an embedded store
//!
//! A thin, typed layer over SQLite for applications that describe their data
//! with a schema document and read it back as their own lightweight types.
//!
//! DataService provides:
//! - Schema documents (TOML or JSON) describing entities and attributes
//! - A `DataStore` with generic `insert` and `fetch` over a pending context
//! - Fallible conversion from raw records into caller types (`FromRecord`)
//! - Filter + ordering queries compiled to SQL
//! - Observable queries that re-fetch on every store change notification

pub mod uri;
pub mod value;
pub mod model;
pub mod record;
pub mod query;
pub mod convert;
pub mod storage;
pub mod store;
pub mod observe;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use uri::ObjectId;
pub use value::Value;
pub use model::{AttributeDescription, AttributeType, EntityDescription, Schema};
pub use record::Record;
pub use query::{Comparison, ComparisonOp, Predicate, Query, SortDescriptor};
pub use convert::{FetchOutcome, FromRecord};
pub use storage::{StoreDescription, StoreType};
pub use store::{ChangeNotification, DataStore, EventHandler, StoreEvent};
pub use observe::{ObservableQuery, Subscription};

/// Result type alias for DataService operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for DataService operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Unknown entity kind: {0}")]
    UnknownKind(String),

    #[error("Unknown attribute '{attribute}' on {kind}")]
    UnknownAttribute { kind: String, attribute: String },

    #[error("Type mismatch for '{attribute}': expected {expected}, found {found}")]
    TypeMismatch {
        attribute: String,
        expected: String,
        found: &'static str,
    },

    #[error("Missing required attribute '{attribute}' on {kind}")]
    MissingAttribute { kind: String, attribute: String },

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Store is not loaded")]
    StoreNotLoaded,

    #[error("Observable query already started")]
    AlreadyStarted,

    #[error("No tokio runtime available to run the observer")]
    NoRuntime,

    #[error("Configuration error: {0}")]
    Config(String),
}
