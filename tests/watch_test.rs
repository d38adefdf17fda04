mod helpers;

use std::time::Duration;

use helpers::{wait_for, TestEnv};
use memdex::IndexManager;

const SETTLE: Duration = Duration::from_secs(10);

async fn file_count_is(manager: &IndexManager, expected: u64) -> bool {
    let manager = manager.clone();
    wait_for(SETTLE, move || {
        let manager = manager.clone();
        async move { manager.stats().await.file_count == expected }
    })
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_of_writes_is_indexed() {
    let env = TestEnv::new();
    env.write("memory/.keep.md", "placeholder");
    let (manager, _) = env.open();
    manager.enable_watch().await.unwrap();
    assert!(manager.is_watching().await);

    env.write("MEMORY.md", "root note");
    for i in 0..5 {
        env.write(&format!("memory/day-{i}.md"), &format!("entry number {i}"));
    }

    assert!(file_count_is(&manager, 7).await, "watcher never caught up");
    let hits = manager.keyword_search("entry", 10).await;
    assert_eq!(hits.len(), 5);

    manager.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deletions_are_picked_up() {
    let env = TestEnv::new();
    env.write("memory/a.md", "to be deleted");
    env.write("memory/b.md", "to be kept");
    let (manager, _) = env.open();
    manager.sync(None).await.unwrap();
    manager.enable_watch().await.unwrap();

    env.remove("memory/a.md");
    assert!(file_count_is(&manager, 1).await);
    assert!(env.chunks_for("memory/a.md").is_empty());

    manager.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disabled_watch_stops_updates() {
    let env = TestEnv::new();
    env.write("memory/a.md", "first");
    let (manager, _) = env.open();
    manager.enable_watch().await.unwrap();
    manager.enable_watch().await.unwrap();
    manager.disable_watch().await;
    assert!(!manager.is_watching().await);

    env.write("memory/b.md", "written after disable");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.stats().await.file_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_ends_watching() {
    let env = TestEnv::new();
    let mut config = env.config();
    config.sync.watch = true;
    config.sync.on_start = true;
    env.write("MEMORY.md", "root");
    let (manager, _) = env.open_with(config);

    manager.start().await.unwrap();
    assert!(manager.is_watching().await);
    assert_eq!(manager.stats().await.file_count, 1);

    manager.stop().await.unwrap();
    assert!(!manager.is_watching().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn memory_dir_created_after_watch_starts_is_indexed() {
    let env = TestEnv::new();
    env.write("MEMORY.md", "root only");
    let (manager, _) = env.open();
    manager.sync(None).await.unwrap();
    manager.enable_watch().await.unwrap();

    env.write("memory/new.md", "note in a fresh directory");
    assert!(file_count_is(&manager, 2).await, "new memory directory was never picked up");

    env.write("memory/later.md", "written once the directory is watched");
    assert!(file_count_is(&manager, 3).await, "directory was not armed after it appeared");

    manager.stop().await.unwrap();
}
