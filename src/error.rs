//! Typed errors callers of the memory index may want to match on.
//!
//! Most internals return `anyhow::Result`; these variants are wrapped into
//! `anyhow::Error` and can be recovered with `downcast_ref::<IndexError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// The manager was stopped and its database connection closed.
    #[error("memory index is closed")]
    Closed,

    #[error("unsupported embedding provider: {0} (supported: openai)")]
    UnsupportedProvider(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("embedding dimension mismatch: index configured for {configured}, provider reports {reported}")]
    DimensionMismatch { configured: usize, reported: usize },

    #[error("environment variable {0} is not set (required for the embedding provider API key)")]
    MissingApiKey(String),

    #[error("not a memory source path: {0}")]
    NotAMemoryPath(String),
}
