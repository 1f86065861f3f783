//! Storage Layer - SQLite-backed persistence
//!
//! Every entity kind in the schema gets one table:
//! - `_pk INTEGER PRIMARY KEY AUTOINCREMENT` (object identity)
//! - one column per attribute, typed from the attribute type
//!
//! The backend is either a SQLite file or a private in-memory database.

pub mod schema;
pub mod filter;
pub mod sqlite;

pub use sqlite::{SqliteBackend, StoreStats};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Storage medium selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// File-backed SQLite database
    Sqlite,
    /// In-memory SQLite database, gone when the store is dropped
    #[serde(alias = "in-memory", alias = "inmemory")]
    Memory,
}

impl StoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreType::Sqlite => "sqlite",
            StoreType::Memory => "memory",
        }
    }
}

impl FromStr for StoreType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" | "file" => Ok(StoreType::Sqlite),
            "memory" | "in-memory" | "inmemory" => Ok(StoreType::Memory),
            _ => Err(Error::Config(format!("Unknown store type: {}", s))),
        }
    }
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where and how a store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDescription {
    pub store_type: StoreType,
    /// Database file; required for `StoreType::Sqlite`
    pub path: Option<PathBuf>,
}

impl StoreDescription {
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            store_type: StoreType::Sqlite,
            path: Some(path.into()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            store_type: StoreType::Memory,
            path: None,
        }
    }
}
