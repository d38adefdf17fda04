//! Index orchestration: sync, reindex, watch, and the query entry points.
//!
//! [`IndexManager`] owns the database connection, the embedding provider, and
//! the watcher. Every mutating operation (`sync`, `reindex`, `index_path`)
//! holds one async mutex for its whole duration, so a manual sync and a
//! watch-triggered sync never interleave. Reads (`search`, `stats`) only take
//! the connection lock for the duration of a query and may observe a sync in
//! progress.
//!
//! Database work runs on the blocking pool via [`tokio::task::spawn_blocking`];
//! provider calls are awaited directly.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::chunker::chunk_markdown;
use super::discover::{self, MEMORY_DIR};
use super::files::read_file_entry;
use super::search::{self, SearchOptions, SearchResult};
use super::stats::{self, IndexStats};
use super::store::{self, CacheKey};
use super::types::{Chunk, ChunkRecord, FileEntry, IndexMeta, SyncProgress, SyncReport, MEMORY_SOURCE};
use super::watch::{self, WatchHandle};
use super::now_ms;
use crate::config::MemdexConfig;
use crate::db::{self, migrations, Capabilities, HealthReport, StoreOptions};
use crate::embedding::EmbeddingProvider;
use crate::error::IndexError;

/// Callback invoked after each per-file decision during a sync.
pub type ProgressFn = dyn Fn(SyncProgress) + Send + Sync;

/// What [`IndexManager::index_path`] did with the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPathOutcome {
    Indexed { chunks: usize },
    Unchanged,
    Removed,
}

/// Point-in-time description of the index and its configuration.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub capabilities: Capabilities,
    pub schema_version: u32,
    /// Configuration the stored index was built with, if recorded.
    pub stored_meta: Option<IndexMeta>,
    /// Configuration the next sync will build with.
    pub expected_meta: IndexMeta,
    /// `true` when the next sync will discard the index and rebuild.
    pub drifted: bool,
    pub watching: bool,
    pub db_path: Option<PathBuf>,
}

/// Shared handle to one memory index. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct IndexManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: MemdexConfig,
    workspace: PathBuf,
    extra_paths: Vec<PathBuf>,
    provider: Arc<dyn EmbeddingProvider>,
    /// `None` once the manager has been stopped.
    conn: Arc<Mutex<Option<Connection>>>,
    caps: Capabilities,
    db_path: Option<PathBuf>,
    sync_lock: tokio::sync::Mutex<()>,
    watch: tokio::sync::Mutex<Option<WatchHandle>>,
}

enum FileOutcome {
    Indexed { chunks: usize },
    Unchanged,
}

impl IndexManager {
    /// Validate configuration, check the provider's width, and open the
    /// database at the configured path.
    pub fn open(config: MemdexConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        check_config(&config, provider.as_ref())?;
        let db_path = config.resolved_db_path();
        let (conn, caps) = db::open_database(&db_path, store_options(&config))?;
        Ok(Self::from_parts(config, provider, conn, caps, Some(db_path)))
    }

    /// Like [`open`](Self::open) but backed by an in-memory database.
    pub fn open_in_memory(config: MemdexConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        check_config(&config, provider.as_ref())?;
        let (conn, caps) = db::open_memory_database(store_options(&config))?;
        Ok(Self::from_parts(config, provider, conn, caps, None))
    }

    fn from_parts(
        config: MemdexConfig,
        provider: Arc<dyn EmbeddingProvider>,
        conn: Connection,
        caps: Capabilities,
        db_path: Option<PathBuf>,
    ) -> Self {
        let root = config.resolved_workspace();
        let workspace = std::fs::canonicalize(&root).unwrap_or(root);
        let extra_paths = config
            .workspace
            .extra_paths
            .iter()
            .map(|p| {
                let p = crate::config::expand_tilde(p);
                if p.is_absolute() {
                    p
                } else {
                    workspace.join(p)
                }
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                config,
                workspace,
                extra_paths,
                provider,
                conn: Arc::new(Mutex::new(Some(conn))),
                caps,
                db_path,
                sync_lock: tokio::sync::Mutex::new(()),
                watch: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner.caps
    }

    pub fn workspace(&self) -> &Path {
        &self.inner.workspace
    }

    pub fn config(&self) -> &MemdexConfig {
        &self.inner.config
    }

    /// Run the startup sync and enable watching, as configured.
    pub async fn start(&self) -> Result<()> {
        if self.is_closed().await? {
            return Err(IndexError::Closed.into());
        }
        if self.inner.config.sync.on_start {
            self.sync(None).await?;
        }
        if self.inner.config.sync.watch {
            self.enable_watch().await?;
        }
        Ok(())
    }

    /// Stop watching, wait for any in-flight mutation, and close the database.
    /// Later mutations fail with [`IndexError::Closed`]; reads return empty.
    /// Stopping twice is a no-op.
    pub async fn stop(&self) -> Result<()> {
        self.disable_watch().await;
        let _guard = self.inner.sync_lock.lock().await;

        let conn = Arc::clone(&self.inner.conn);
        let closed = tokio::task::spawn_blocking(move || -> Result<bool> {
            let mut guard = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
            match guard.take() {
                Some(conn) => {
                    conn.close()
                        .map_err(|(_, e)| e)
                        .context("failed to close index database")?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
        .await
        .context("close task failed")??;

        if closed {
            info!("memory index closed");
        }
        Ok(())
    }

    /// Bring the index in line with the files on disk.
    ///
    /// Unchanged files cost no provider calls. A file that cannot be read or
    /// embedded keeps its previous rows and is counted in
    /// [`SyncReport::files_failed`]; the pass continues with the rest.
    pub async fn sync(&self, progress: Option<&ProgressFn>) -> Result<SyncReport> {
        let _guard = self.inner.sync_lock.lock().await;
        self.run_sync(progress, false).await
    }

    /// Discard every memory row and re-embed all files from scratch.
    pub async fn reindex(&self, progress: Option<&ProgressFn>) -> Result<SyncReport> {
        let _guard = self.inner.sync_lock.lock().await;
        self.run_sync(progress, true).await
    }

    /// Reindex one file given as a workspace-relative or absolute path.
    /// A path that no longer exists has its rows removed.
    pub async fn index_path(&self, path: impl AsRef<Path>) -> Result<IndexPathOutcome> {
        let abs = self.resolve_source_path(path.as_ref())?;
        let _guard = self.inner.sync_lock.lock().await;

        let mut report = SyncReport::default();
        self.reconcile_meta(false, &mut report).await?;

        let rel = discover::relative_path(&self.inner.workspace, &abs);
        if !abs.exists() {
            let rel_owned = rel.clone();
            let removed = self
                .with_db(move |conn, caps| store::remove_file(conn, caps, &rel_owned))
                .await?;
            debug!(path = %rel, chunks = removed, "removed missing file from index");
            return Ok(IndexPathOutcome::Removed);
        }

        match self.sync_file(&abs, false, &mut report).await? {
            FileOutcome::Indexed { chunks } => Ok(IndexPathOutcome::Indexed { chunks }),
            FileOutcome::Unchanged => Ok(IndexPathOutcome::Unchanged),
        }
    }

    /// Semantic search: embed `query` and return the `top_k` nearest chunks.
    ///
    /// Never fails. An unavailable vector index, a closed manager, a provider
    /// error, or a query error all yield an empty list.
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        if !self.inner.caps.vector || query.trim().is_empty() || top_k == 0 {
            return Vec::new();
        }

        let embedding = match self.inner.provider.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to embed search query");
                return Vec::new();
            }
        };

        let opts = self.search_options(top_k);
        let result = self
            .with_db(move |conn, _| search::vector_search(conn, &embedding, opts))
            .await;
        self.results_or_empty(result, "vector search failed")
    }

    /// Full-text search over chunk text. Empty when full-text search is unavailable.
    pub async fn keyword_search(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        if !self.inner.caps.fts {
            return Vec::new();
        }
        let opts = self.search_options(top_k);
        let query = query.to_string();
        let result = self
            .with_db(move |conn, _| search::keyword_search(conn, &query, opts))
            .await;
        self.results_or_empty(result, "keyword search failed")
    }

    /// File, chunk, and byte counts. All zero when the manager is closed.
    pub async fn stats(&self) -> IndexStats {
        match self.with_db(|conn, _| stats::index_stats(conn)).await {
            Ok(stats) => stats,
            Err(e) => {
                if !is_closed_error(&e) {
                    warn!(error = %e, "failed to read index stats");
                }
                IndexStats::default()
            }
        }
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let expected = self.expected_meta();
        let (schema_version, stored_meta) = self
            .with_db(|conn, _| {
                Ok((
                    migrations::get_schema_version(conn)?,
                    migrations::get_index_meta(conn)?,
                ))
            })
            .await?;
        Ok(IndexStatus {
            capabilities: self.inner.caps,
            schema_version,
            drifted: stored_meta.as_ref().is_some_and(|m| *m != expected),
            stored_meta,
            expected_meta: expected,
            watching: self.is_watching().await,
            db_path: self.inner.db_path.clone(),
        })
    }

    /// Integrity check and row counts for the underlying database.
    pub async fn health(&self) -> Result<HealthReport> {
        self.with_db(|conn, _| db::check_database_health(conn)).await
    }

    /// Start watching the workspace. Each burst of changes triggers exactly
    /// one sync once no event has arrived for `sync.debounce_ms`.
    pub async fn enable_watch(&self) -> Result<()> {
        let mut slot = self.inner.watch.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        if self.is_closed().await? {
            return Err(IndexError::Closed.into());
        }

        let targets = watch::targets_for(
            &self.inner.workspace,
            &self.inner.workspace.join(MEMORY_DIR),
            &self.inner.extra_paths,
        );
        let debounce = Duration::from_millis(self.inner.config.sync.debounce_ms);

        // Weak so an abandoned manager is not kept alive by its own watcher.
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = watch::spawn(&targets, debounce, move || {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                let manager = IndexManager { inner };
                match manager.sync(None).await {
                    Ok(report) => {
                        debug!(?report, "watch-triggered sync finished");
                        true
                    }
                    Err(e) if is_closed_error(&e) => false,
                    Err(e) => {
                        warn!(error = %e, "watch-triggered sync failed");
                        true
                    }
                }
            }
        })?;

        *slot = Some(handle);
        info!(debounce_ms = debounce.as_millis() as u64, "memory watch enabled");
        Ok(())
    }

    /// Stop watching. Waits for a watch-triggered sync that is already running.
    pub async fn disable_watch(&self) {
        let handle = self.inner.watch.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            info!("memory watch disabled");
        }
    }

    pub async fn is_watching(&self) -> bool {
        self.inner.watch.lock().await.is_some()
    }

    // ── Sync internals ──────────────────────────────────────────────────────

    async fn run_sync(&self, progress: Option<&ProgressFn>, force_rebuild: bool) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();

        self.reconcile_meta(force_rebuild, &mut report).await?;

        let workspace = self.inner.workspace.clone();
        let extra_paths = self.inner.extra_paths.clone();
        let files = tokio::task::spawn_blocking(move || discover::list_memory_files(&workspace, &extra_paths))
            .await
            .context("discovery task failed")?;

        let total = files.len();
        let mut seen: HashSet<String> = HashSet::with_capacity(total);

        for (i, abs) in files.iter().enumerate() {
            let rel = discover::relative_path(&self.inner.workspace, abs);
            seen.insert(rel.clone());

            match self.sync_file(abs, force_rebuild, &mut report).await {
                Ok(FileOutcome::Indexed { chunks }) => {
                    debug!(path = %rel, chunks, "indexed file");
                    report.files_indexed += 1;
                }
                Ok(FileOutcome::Unchanged) => report.files_unchanged += 1,
                Err(e) if aborts_sync(&e) => return Err(e),
                Err(e) => {
                    warn!(path = %rel, error = %format!("{e:#}"), "failed to index file, keeping previous rows");
                    report.files_failed += 1;
                }
            }

            if let Some(cb) = progress {
                cb(SyncProgress {
                    completed: i + 1,
                    total,
                    label: Some(rel),
                });
            }
        }

        report.files_removed = self
            .with_db(move |conn, caps| {
                let mut removed = 0;
                for path in store::list_file_paths(conn)? {
                    if !seen.contains(&path) {
                        store::remove_file(conn, caps, &path)?;
                        debug!(path = %path, "removed stale file from index");
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .await?;

        if self.inner.config.index.cache_enabled {
            if let Some(max) = self.inner.config.index.cache_max_entries {
                let pruned = self
                    .with_db(move |conn, _| store::prune_embedding_cache(conn, max))
                    .await?;
                if pruned > 0 {
                    info!(pruned, "embedding cache: evicted old entries");
                }
            }
        }

        info!(
            indexed = report.files_indexed,
            unchanged = report.files_unchanged,
            removed = report.files_removed,
            failed = report.files_failed,
            embedded = report.chunks_embedded,
            cache_hits = report.cache_hits,
            rebuilt = report.rebuilt,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "memory sync complete"
        );
        Ok(report)
    }

    /// Reset the index if it was built with a different configuration (or if
    /// `force` is set), then record the current configuration.
    async fn reconcile_meta(&self, force: bool, report: &mut SyncReport) -> Result<()> {
        let expected = self.expected_meta();
        let (stored, chunk_count) = self
            .with_db(|conn, _| Ok((migrations::get_index_meta(conn)?, store::count_chunks(conn)?)))
            .await?;

        if !force && stored.as_ref() == Some(&expected) {
            return Ok(());
        }

        if force {
            info!("reindex requested, clearing memory index");
        } else if stored.is_some() || chunk_count > 0 {
            warn!(
                stored = ?stored,
                expected = ?expected,
                "index was built with a different configuration, rebuilding"
            );
        }
        report.rebuilt = force || stored.is_some() || chunk_count > 0;

        let dims = self.inner.config.embedding.dimensions;
        self.with_db(move |conn, caps| {
            store::reset_memory_index(conn, caps, dims)?;
            migrations::set_index_meta(conn, &expected)?;
            Ok(())
        })
        .await
    }

    /// Index one file if its content changed. `fresh` skips cache lookups so
    /// every chunk is re-embedded.
    async fn sync_file(&self, abs: &Path, fresh: bool, report: &mut SyncReport) -> Result<FileOutcome> {
        let workspace = self.inner.workspace.clone();
        let abs_owned = abs.to_path_buf();
        let (entry, content) = tokio::task::spawn_blocking(move || read_file_entry(&workspace, &abs_owned))
            .await
            .context("file read task failed")??;

        let path = entry.path.clone();
        let stored_hash = self
            .with_db(move |conn, _| store::get_file_hash(conn, &path))
            .await?;
        if stored_hash.as_deref() == Some(entry.hash.as_str()) {
            return Ok(FileOutcome::Unchanged);
        }

        let chunks = chunk_markdown(&content, &self.inner.config.chunking);
        let embeddings = self.embed_chunks(&chunks, !fresh, report).await?;
        let records = self.build_records(&entry, chunks, embeddings);
        let chunk_count = records.len();

        let cache_key = self.inner.config.index.cache_enabled.then(|| self.cache_key());
        let outcome = self
            .with_db(move |conn, caps| store::replace_file(conn, caps, &entry, &records, cache_key.as_ref()))
            .await?;
        if outcome.vectors_skipped > 0 {
            warn!(
                path = %abs.display(),
                skipped = outcome.vectors_skipped,
                "some chunks were stored without vectors"
            );
        }

        Ok(FileOutcome::Indexed { chunks: chunk_count })
    }

    /// Embeddings for `chunks` in order, reusing cached vectors and batching
    /// the misses through the provider.
    async fn embed_chunks(&self, chunks: &[Chunk], use_cache: bool, report: &mut SyncReport) -> Result<Vec<Vec<f32>>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let dims = self.inner.provider.dimensions();
        let mut cached: HashMap<String, Vec<f32>> = if use_cache && self.inner.config.index.cache_enabled {
            let key = self.cache_key();
            let hashes: Vec<String> = chunks.iter().map(|c| c.hash.clone()).collect();
            self.with_db(move |conn, _| store::get_cached_embeddings(conn, &key, &hashes))
                .await?
        } else {
            HashMap::new()
        };
        cached.retain(|_, v| v.len() == dims);

        let mut vectors: Vec<Option<Vec<f32>>> = chunks.iter().map(|c| cached.get(&c.hash).cloned()).collect();
        let misses: Vec<usize> = vectors
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| i)
            .collect();
        report.cache_hits += chunks.len() - misses.len();

        for batch in misses.chunks(self.inner.config.embedding.batch_size) {
            let texts: Vec<String> = batch.iter().map(|&i| chunks[i].text.clone()).collect();
            let embedded = self
                .inner
                .provider
                .embed_batch(&texts)
                .await
                .context("embedding provider failed")?;
            anyhow::ensure!(
                embedded.len() == texts.len(),
                "embedding provider returned {} vectors for {} inputs",
                embedded.len(),
                texts.len()
            );
            if let Some(bad) = embedded.iter().find(|v| v.len() != dims) {
                return Err(IndexError::DimensionMismatch {
                    configured: dims,
                    reported: bad.len(),
                }
                .into());
            }
            report.chunks_embedded += embedded.len();
            for (&i, v) in batch.iter().zip(embedded) {
                vectors[i] = Some(v);
            }
        }

        Ok(vectors.into_iter().map(Option::unwrap_or_default).collect())
    }

    fn build_records(&self, entry: &FileEntry, chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Vec<ChunkRecord> {
        let model = self.inner.provider.model_name().to_string();
        let now = now_ms();
        chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| ChunkRecord {
                id: uuid::Uuid::now_v7().to_string(),
                path: entry.path.clone(),
                source: MEMORY_SOURCE.to_string(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                hash: chunk.hash,
                model: model.clone(),
                text: chunk.text,
                embedding,
                updated_at: now,
            })
            .collect()
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    /// Run `f` against the open connection on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, Capabilities) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.inner.conn);
        let caps = self.inner.caps;
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
            let conn = guard.as_mut().ok_or(IndexError::Closed)?;
            f(conn, caps)
        })
        .await
        .context("database task failed")?
    }

    async fn is_closed(&self) -> Result<bool> {
        let conn = Arc::clone(&self.inner.conn);
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .map(|guard| guard.is_none())
                .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))
        })
        .await
        .context("database task failed")?
    }

    fn results_or_empty(&self, result: Result<Vec<SearchResult>>, what: &str) -> Vec<SearchResult> {
        match result {
            Ok(results) => results,
            Err(e) if is_closed_error(&e) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "{what}");
                Vec::new()
            }
        }
    }

    fn search_options(&self, top_k: usize) -> SearchOptions {
        let cfg = &self.inner.config.search;
        SearchOptions {
            limit: top_k,
            min_score: cfg.min_score,
            snippet_max_chars: cfg.snippet_max_chars,
        }
    }

    fn cache_key(&self) -> CacheKey {
        let p = &self.inner.provider;
        CacheKey {
            provider: p.provider_name().to_string(),
            model: p.model_name().to_string(),
            provider_key: p.provider_key().to_string(),
        }
    }

    fn expected_meta(&self) -> IndexMeta {
        let p = &self.inner.provider;
        let cfg = &self.inner.config;
        IndexMeta {
            provider: p.provider_name().to_string(),
            model: p.model_name().to_string(),
            provider_key: p.provider_key().to_string(),
            chunk_tokens: cfg.chunking.tokens,
            chunk_overlap: cfg.chunking.overlap,
            vector_dims: self.inner.caps.vector.then_some(cfg.embedding.dimensions),
            full_text: self.inner.caps.fts,
        }
    }

    /// Absolute path for a caller-supplied memory path, or
    /// [`IndexError::NotAMemoryPath`] if it is not a memory source.
    fn resolve_source_path(&self, path: &Path) -> Result<PathBuf> {
        let ws = &self.inner.workspace;
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            ws.join(discover::normalize_rel_path(&path.to_string_lossy()))
        };
        // The file may be gone; canonicalize its parent so symlinked roots still match.
        let abs = match (joined.parent(), joined.file_name()) {
            (Some(parent), Some(name)) => std::fs::canonicalize(parent)
                .map(|p| p.join(name))
                .unwrap_or_else(|_| joined.clone()),
            _ => joined.clone(),
        };

        let rel = discover::relative_path(ws, &abs);
        let in_extra = discover::has_note_extension(&abs)
            && self.inner.extra_paths.iter().any(|extra| abs.starts_with(extra));
        if discover::is_memory_path(&rel) || in_extra {
            Ok(abs)
        } else {
            Err(IndexError::NotAMemoryPath(path.display().to_string()).into())
        }
    }
}

fn check_config(config: &MemdexConfig, provider: &dyn EmbeddingProvider) -> Result<()> {
    config.validate()?;
    let reported = provider.dimensions();
    let configured = config.embedding.dimensions;
    if reported != configured {
        return Err(IndexError::DimensionMismatch { configured, reported }.into());
    }
    Ok(())
}

fn store_options(config: &MemdexConfig) -> StoreOptions {
    StoreOptions {
        vector_enabled: config.index.vector_enabled,
        fts_enabled: config.index.fts_enabled,
        vector_dims: config.embedding.dimensions,
    }
}

fn is_closed_error(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<IndexError>(), Some(IndexError::Closed))
}

/// Errors that end a sync pass instead of counting against one file: a closed
/// manager, a database failure, or vectors of the wrong width.
fn aborts_sync(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause.is::<rusqlite::Error>()
            || matches!(
                cause.downcast_ref::<IndexError>(),
                Some(IndexError::Closed | IndexError::DimensionMismatch { .. })
            )
    })
}
