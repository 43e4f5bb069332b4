//! Persistence layer for curfew
//!
//! Provides:
//! - Data model entities (categories, rules, users, used time)
//! - Per-tick read-only category view
//! - Atomic used-time commits and retention purges
//! - Administrative mutations with tree validation
//! - Audit log (append-only)

mod audit;
mod model;
mod sqlite;
mod traits;
mod view;

pub use audit::*;
pub use model::*;
pub use sqlite::*;
pub use traits::*;
pub use view::*;

use curfew_util::CurfewError;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    Model(#[from] ModelError),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for CurfewError {
    fn from(e: StoreError) -> Self {
        CurfewError::store(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
