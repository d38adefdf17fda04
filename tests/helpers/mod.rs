#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use memdex::config::{ChunkingConfig, MemdexConfig};
use memdex::db::{self, StoreOptions};
use memdex::embedding::EmbeddingProvider;
use memdex::memory::store;
use memdex::memory::types::ChunkRecord;
use memdex::IndexManager;
use tempfile::TempDir;

pub const DIMS: usize = 8;

/// Deterministic bag-of-words embedder. Each lowercase word lands in a
/// bucket; the vector is L2-normalized, so texts sharing words end up close.
/// Counts calls and embedded texts, and can be told to fail.
pub struct FakeEmbedder {
    dims: usize,
    output_dims: usize,
    calls: AtomicUsize,
    texts: AtomicUsize,
    fail_marker: Mutex<Option<String>>,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::with_dims(DIMS)
    }

    pub fn with_dims(dims: usize) -> Self {
        Self {
            dims,
            output_dims: dims,
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
            fail_marker: Mutex::new(None),
        }
    }

    /// Claims `DIMS` but returns vectors `output_dims` wide.
    pub fn misreporting(output_dims: usize) -> Self {
        Self {
            output_dims,
            ..Self::new()
        }
    }

    /// Provider calls so far (`embed` and `embed_batch` each count once).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts embedded so far.
    pub fn texts(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    /// Fail any request containing `marker`.
    pub fn fail_on(&self, marker: Option<&str>) {
        *self.fail_marker.lock().unwrap() = marker.map(str::to_string);
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.output_dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let h = word
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
            v[(h % self.output_dims as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            v[0] = 1.0;
        } else {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    fn check(&self, texts: &[String]) -> anyhow::Result<()> {
        if let Some(marker) = self.fail_marker.lock().unwrap().as_deref() {
            if texts.iter().any(|t| t.contains(marker)) {
                anyhow::bail!("fake provider failure");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.check(&[text.to_string()])?;
        self.texts.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.check(texts)?;
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn provider_name(&self) -> &str {
        "fake"
    }

    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_key(&self) -> &str {
        "fake-key"
    }
}

/// A workspace directory plus a separate directory for the database.
pub struct TestEnv {
    pub workspace: TempDir,
    pub data: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            workspace: TempDir::new().unwrap(),
            data: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.workspace.path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.data.path().join("index.db")
    }

    /// Write `content` to a workspace-relative path, creating directories.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.root().join(rel)).unwrap();
    }

    /// Small chunks, no watching, no startup sync.
    pub fn config(&self) -> MemdexConfig {
        let mut config = MemdexConfig::default();
        config.workspace.root = self.root().to_string_lossy().into_owned();
        config.storage.db_path = self.db_path().to_string_lossy().into_owned();
        config.chunking = ChunkingConfig {
            tokens: 20,
            overlap: 5,
        };
        config.embedding.dimensions = DIMS;
        config.sync.watch = false;
        config.sync.on_start = false;
        config.sync.debounce_ms = 200;
        config
    }

    pub fn open(&self) -> (IndexManager, Arc<FakeEmbedder>) {
        self.open_with(self.config())
    }

    pub fn open_with(&self, config: MemdexConfig) -> (IndexManager, Arc<FakeEmbedder>) {
        let fake = Arc::new(FakeEmbedder::new());
        let manager = IndexManager::open(config, fake.clone()).unwrap();
        (manager, fake)
    }

    /// Chunks stored for `rel`, read through a separate connection.
    pub fn chunks_for(&self, rel: &str) -> Vec<ChunkRecord> {
        let (conn, _) = db::open_database(
            self.db_path(),
            StoreOptions {
                vector_enabled: false,
                fts_enabled: false,
                vector_dims: DIMS,
            },
        )
        .unwrap();
        store::get_chunks_for_path(&conn, rel).unwrap()
    }
}

/// Numbered prose lines, long enough to need several chunks at test sizes.
pub fn long_note(topic: &str, lines: usize) -> String {
    (1..=lines)
        .map(|i| format!("{topic} note line {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check().await
}
