//! Local semantic memory index over a directory of markdown notes.
//!
//! Memdex watches a workspace's memory sources (a root `MEMORY.md` plus every
//! note under `memory/`), splits them into overlapping line-aligned chunks,
//! embeds each chunk through a pluggable provider, and answers similarity
//! queries over the result. Indexing is incremental: a file is re-embedded
//! only when its content hash changes, and identical chunk text is served
//! from an embedding cache.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for nearest-neighbor search and FTS5 for keyword search. Either may be
//!   missing; the index degrades instead of failing.
//! - **Embeddings**: any [`embedding::EmbeddingProvider`]; an OpenAI-compatible
//!   HTTP provider is built in.
//! - **Sync**: hash-based diffing, one transaction per file, garbage collection
//!   of removed files, and an optional debounced filesystem watcher.
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, and health checks
//! - [`embedding`]: the embedding provider trait and implementations
//! - [`memory`]: discovery, chunking, storage, sync, and search
//! - [`error`]: typed errors for conditions callers handle

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod memory;

pub use error::IndexError;
pub use memory::manager::IndexManager;
