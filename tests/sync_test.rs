mod helpers;

use std::sync::Mutex;

use helpers::{long_note, FakeEmbedder, TestEnv};
use memdex::memory::manager::{IndexPathOutcome, ProgressFn};
use memdex::memory::types::SyncProgress;
use memdex::{IndexError, IndexManager};

#[tokio::test]
async fn sync_indexes_root_note_and_memory_subtree() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "# A\nAlpha");
    env.write("memory/2024-01-01.md", &long_note("deploy", 80));
    env.write("notes/elsewhere.md", "not a memory source");
    let (manager, _) = env.open();

    let report = manager.sync(None).await.unwrap();
    assert_eq!(report.files_indexed, 2);
    assert_eq!(report.files_failed, 0);

    let stats = manager.stats().await;
    assert_eq!(stats.file_count, 2);

    let root = env.chunks_for("MEMORY.md");
    assert_eq!(root.len(), 1);
    assert_eq!((root[0].start_line, root[0].end_line), (1, 2));
    assert_eq!(root[0].source, "memory");
    assert_eq!(root[0].model, "bag-of-words");

    let daily = env.chunks_for("memory/2024-01-01.md");
    assert!(daily.len() > 1, "long note should span several chunks");
    for pair in daily.windows(2) {
        assert!(
            pair[1].start_line <= pair[0].end_line,
            "consecutive chunks should overlap"
        );
    }
    assert_eq!(daily.last().unwrap().end_line, 80);
    assert_eq!(stats.chunk_count as usize, root.len() + daily.len());
}

#[tokio::test]
async fn second_sync_makes_no_provider_calls() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "# Root\nRemember the milk");
    env.write("memory/a.md", &long_note("alpha", 12));
    let (manager, fake) = env.open();

    manager.sync(None).await.unwrap();
    let calls = fake.calls();
    assert!(calls > 0);

    let report = manager.sync(None).await.unwrap();
    assert_eq!(report.files_indexed, 0);
    assert_eq!(report.files_unchanged, 2);
    assert_eq!(report.chunks_embedded, 0);
    assert_eq!(fake.calls(), calls);
}

#[tokio::test]
async fn touching_a_file_without_changing_it_is_not_a_change() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "same content");
    let (manager, fake) = env.open();
    manager.sync(None).await.unwrap();
    let texts = fake.texts();

    env.write("MEMORY.md", "same content");
    let report = manager.sync(None).await.unwrap();
    assert_eq!(report.files_unchanged, 1);
    assert_eq!(fake.texts(), texts);
}

#[tokio::test]
async fn changing_one_file_reembeds_only_that_file() {
    let env = TestEnv::new();
    env.write("memory/a.md", &long_note("alpha", 10));
    env.write("memory/b.md", &long_note("beta", 10));
    let mut config = env.config();
    config.index.cache_enabled = false;
    let (manager, fake) = env.open_with(config);

    manager.sync(None).await.unwrap();
    let b_before: Vec<String> = env.chunks_for("memory/b.md").into_iter().map(|c| c.id).collect();
    let texts_before = fake.texts();

    env.write("memory/a.md", &format!("{}!", long_note("alpha", 10)));
    let report = manager.sync(None).await.unwrap();

    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.files_unchanged, 1);
    let a_chunks = env.chunks_for("memory/a.md");
    assert_eq!(fake.texts() - texts_before, a_chunks.len());
    assert!(a_chunks.last().unwrap().text.ends_with('!'));

    let b_after: Vec<String> = env.chunks_for("memory/b.md").into_iter().map(|c| c.id).collect();
    assert_eq!(b_before, b_after, "unrelated file must not be rewritten");
}

#[tokio::test]
async fn removed_file_is_garbage_collected() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "root");
    env.write("memory/old.md", "obsolete coffee facts");
    let (manager, _) = env.open();
    manager.sync(None).await.unwrap();
    assert_eq!(manager.stats().await.file_count, 2);

    env.remove("memory/old.md");
    let report = manager.sync(None).await.unwrap();
    assert_eq!(report.files_removed, 1);

    let stats = manager.stats().await;
    assert_eq!(stats.file_count, 1);
    assert!(env.chunks_for("memory/old.md").is_empty());
    let hits = manager.search("obsolete coffee facts", 10).await;
    assert!(hits.iter().all(|h| h.path != "memory/old.md"));
}

#[tokio::test]
async fn identical_chunks_are_served_from_cache() {
    let env = TestEnv::new();
    env.write("memory/a.md", "shared sentence");
    env.write("memory/b.md", "shared sentence");
    let (manager, fake) = env.open();

    let report = manager.sync(None).await.unwrap();
    assert_eq!(report.files_indexed, 2);
    assert_eq!(report.chunks_embedded, 1);
    assert_eq!(report.cache_hits, 1);
    assert_eq!(fake.texts(), 1);
}

#[tokio::test]
async fn reindex_reembeds_everything() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "root note");
    env.write("memory/a.md", &long_note("alpha", 10));
    let (manager, fake) = env.open();

    manager.sync(None).await.unwrap();
    let chunks = manager.stats().await.chunk_count as usize;
    let texts = fake.texts();

    let report = manager.reindex(None).await.unwrap();
    assert!(report.rebuilt);
    assert_eq!(report.files_indexed, 2);
    assert_eq!(fake.texts() - texts, chunks);
    assert_eq!(manager.stats().await.chunk_count as usize, chunks);
}

#[tokio::test]
async fn provider_failure_keeps_previous_rows() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "stable root");
    env.write("memory/a.md", "first version");
    let (manager, fake) = env.open();
    manager.sync(None).await.unwrap();
    let before = env.chunks_for("memory/a.md");

    env.write("memory/a.md", "second version BOOM");
    fake.fail_on(Some("BOOM"));
    let report = manager.sync(None).await.unwrap();
    assert_eq!(report.files_failed, 1);
    assert_eq!(report.files_unchanged, 1);
    assert_eq!(env.chunks_for("memory/a.md"), before);

    fake.fail_on(None);
    let report = manager.sync(None).await.unwrap();
    assert_eq!(report.files_indexed, 1);
    assert_eq!(env.chunks_for("memory/a.md")[0].text, "second version BOOM");
}

#[tokio::test]
async fn progress_is_reported_per_file() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "root");
    env.write("memory/a.md", "a");
    env.write("memory/b.md", "b");
    let (manager, _) = env.open();

    let seen: std::sync::Arc<Mutex<Vec<SyncProgress>>> = std::sync::Arc::new(Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    let record = move |p: SyncProgress| sink.lock().unwrap().push(p);
    let progress: &ProgressFn = &record;
    manager.sync(Some(progress)).await.unwrap();

    let seen = std::mem::take(&mut *seen.lock().unwrap());
    assert_eq!(seen.len(), 3);
    for (i, p) in seen.iter().enumerate() {
        assert_eq!(p.completed, i + 1);
        assert_eq!(p.total, 3);
    }
    assert_eq!(seen[0].label.as_deref(), Some("MEMORY.md"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_syncs_are_serialized() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "root");
    env.write("memory/a.md", &long_note("alpha", 20));
    env.write("memory/b.md", &long_note("beta", 20));
    let (manager, fake) = env.open();
    let other = manager.clone();

    let (first, second) = tokio::join!(manager.sync(None), other.sync(None));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.files_indexed + second.files_indexed, 3);
    assert_eq!(first.files_unchanged + second.files_unchanged, 3);
    assert_eq!(fake.texts(), manager.stats().await.chunk_count as usize);
}

#[tokio::test]
async fn index_path_reindexes_a_single_file() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "root");
    env.write("memory/a.md", "first");
    let (manager, _) = env.open();
    manager.sync(None).await.unwrap();

    assert_eq!(
        manager.index_path("memory/a.md").await.unwrap(),
        IndexPathOutcome::Unchanged
    );

    env.write("memory/a.md", "second");
    assert_eq!(
        manager.index_path("./memory/a.md").await.unwrap(),
        IndexPathOutcome::Indexed { chunks: 1 }
    );
    assert_eq!(env.chunks_for("memory/a.md")[0].text, "second");

    let abs = env.root().join("memory/a.md");
    std::fs::remove_file(&abs).unwrap();
    assert_eq!(
        manager.index_path(&abs).await.unwrap(),
        IndexPathOutcome::Removed
    );
    assert_eq!(manager.stats().await.file_count, 1);
}

#[tokio::test]
async fn index_path_rejects_non_memory_files() {
    let env = TestEnv::new();
    env.write("README.md", "readme");
    let (manager, _) = env.open();

    let err = manager.index_path("README.md").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IndexError>(),
        Some(IndexError::NotAMemoryPath(_))
    ));
}

#[tokio::test]
async fn extra_paths_are_indexed() {
    let env = TestEnv::new();
    env.write("journal/day.md", "journal entry");
    env.write("journal/skip.txt", "not a note");
    let mut config = env.config();
    config.workspace.extra_paths = vec!["journal".into()];
    let (manager, _) = env.open_with(config);

    let report = manager.sync(None).await.unwrap();
    assert_eq!(report.files_indexed, 1);
    assert_eq!(env.chunks_for("journal/day.md").len(), 1);
}

#[tokio::test]
async fn empty_workspace_syncs_to_empty_index() {
    let env = TestEnv::new();
    let (manager, fake) = env.open();

    let report = manager.sync(None).await.unwrap();
    assert_eq!(report.files_indexed, 0);
    assert_eq!(manager.stats().await.file_count, 0);
    assert!(manager.search("anything", 5).await.is_empty());
    assert_eq!(fake.texts(), 1, "only the query was embedded");
}

#[tokio::test]
async fn unsynced_index_searches_empty() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "never synced");
    let (manager, _) = env.open();

    assert!(manager.search("never synced", 5).await.is_empty());
    assert!(manager.keyword_search("synced", 5).await.is_empty());
    assert_eq!(manager.stats().await.file_count, 0);
}

#[tokio::test]
async fn dimension_mismatch_fails_at_open() {
    let env = TestEnv::new();
    let provider = std::sync::Arc::new(FakeEmbedder::with_dims(4));
    let err = IndexManager::open(env.config(), provider).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<IndexError>(),
        Some(IndexError::DimensionMismatch { configured: 8, reported: 4 })
    ));
}

#[tokio::test]
async fn vectors_of_the_wrong_width_abort_sync() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "root note");
    env.write("memory/a.md", "another note");
    let provider = std::sync::Arc::new(FakeEmbedder::misreporting(4));
    let manager = IndexManager::open(env.config(), provider).unwrap();

    let err = manager.sync(None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<IndexError>(),
        Some(IndexError::DimensionMismatch { configured: 8, reported: 4 })
    ));
    assert_eq!(manager.stats().await.file_count, 0);
    assert!(env.chunks_for("MEMORY.md").is_empty());
}

#[tokio::test]
async fn invalid_config_fails_at_open() {
    let env = TestEnv::new();
    let mut config = env.config();
    config.chunking.overlap = config.chunking.tokens;
    let err = IndexManager::open(config, std::sync::Arc::new(FakeEmbedder::new()))
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<IndexError>(),
        Some(IndexError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn changed_chunking_rebuilds_on_next_sync() {
    let env = TestEnv::new();
    env.write("memory/a.md", &long_note("alpha", 20));
    {
        let (manager, _) = env.open();
        let report = manager.sync(None).await.unwrap();
        assert!(!report.rebuilt);
        manager.stop().await.unwrap();
    }

    let mut config = env.config();
    config.chunking.tokens = 40;
    let (manager, fake) = env.open_with(config);

    let status = manager.status().await.unwrap();
    assert!(status.drifted);
    assert_eq!(status.stored_meta.unwrap().chunk_tokens, 20);

    let report = manager.sync(None).await.unwrap();
    assert!(report.rebuilt);
    assert_eq!(report.files_indexed, 1);
    assert!(fake.texts() > 0);

    let status = manager.status().await.unwrap();
    assert!(!status.drifted);
    assert_eq!(status.stored_meta.unwrap().chunk_tokens, 40);
}

#[tokio::test]
async fn stopped_manager_rejects_mutations_and_reads_empty() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "root note about tea");
    let (manager, _) = env.open();
    manager.sync(None).await.unwrap();

    manager.stop().await.unwrap();
    manager.stop().await.unwrap();

    let err = manager.sync(None).await.unwrap_err();
    assert!(matches!(err.downcast_ref::<IndexError>(), Some(IndexError::Closed)));
    let err = manager.start().await.unwrap_err();
    assert!(matches!(err.downcast_ref::<IndexError>(), Some(IndexError::Closed)));
    assert!(manager.enable_watch().await.is_err());

    assert_eq!(manager.stats().await, Default::default());
    assert!(manager.search("tea", 5).await.is_empty());
    assert!(manager.keyword_search("tea", 5).await.is_empty());
}

#[tokio::test]
async fn degraded_mode_without_vector_search() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "espresso machine maintenance");
    let mut config = env.config();
    config.index.vector_enabled = false;
    let (manager, fake) = env.open_with(config);
    assert!(!manager.capabilities().vector);

    let report = manager.sync(None).await.unwrap();
    assert_eq!(report.files_indexed, 1);
    assert_eq!(manager.stats().await.chunk_count, 1);

    let texts = fake.texts();
    assert!(manager.search("espresso", 5).await.is_empty());
    assert_eq!(fake.texts(), texts, "no query embedding without a vector index");

    let hits = manager.keyword_search("espresso", 5).await;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "MEMORY.md");
}

#[tokio::test]
async fn start_runs_initial_sync() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "root");
    let mut config = env.config();
    config.sync.on_start = true;
    let (manager, _) = env.open_with(config);

    manager.start().await.unwrap();
    assert_eq!(manager.stats().await.file_count, 1);
    assert!(!manager.is_watching().await);
    manager.stop().await.unwrap();
}
