//! Error types for curfew

use thiserror::Error;

/// Error shared by the curfew crates; each crate converts its own error
/// enum into it at the boundary
#[derive(Debug, Error)]
pub enum CurfewError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Permission missing: {0}")]
    PermissionMissing(String),
}

impl CurfewError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn host(msg: impl Into<String>) -> Self {
        Self::Host(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::PermissionMissing(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CurfewError>;
