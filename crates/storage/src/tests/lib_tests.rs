use super::*;

async fn memory_storage() -> Storage {
    Storage::new("sqlite::memory:").await.expect("db")
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = memory_storage().await;
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn uninitialized_entries_read_as_defaults() {
    let storage = memory_storage().await;
    let node = NodeId::new("12");

    let counter = storage.get(&node, StateKey::Counter).await.expect("counter");
    assert_eq!(counter.value, StateValue::Counter(0));
    assert_eq!(counter.version, 0);

    let text = storage.get(&node, StateKey::CacheText).await.expect("text");
    assert_eq!(text.value, StateValue::Text(String::new()));
    assert_eq!(text.version, 0);
}

#[tokio::test]
async fn set_increments_version_and_is_read_back() {
    let storage = memory_storage().await;
    let node = NodeId::new("4");

    let first = storage
        .set(&node, StateValue::Counter(7))
        .await
        .expect("first write");
    let second = storage
        .set(&node, StateValue::Counter(9))
        .await
        .expect("second write");
    assert_eq!(first, 1);
    assert_eq!(second, 2);

    let entry = storage.get(&node, StateKey::Counter).await.expect("read");
    assert_eq!(entry.value, StateValue::Counter(9));
    assert_eq!(entry.version, 2);
}

#[tokio::test]
async fn keys_of_one_node_are_versioned_independently() {
    let storage = memory_storage().await;
    let node = NodeId::new("4");

    storage
        .set(&node, StateValue::Counter(1))
        .await
        .expect("counter");
    let text_version = storage
        .set(&node, StateValue::Text("cached".into()))
        .await
        .expect("text");
    assert_eq!(text_version, 1);

    let counter = storage.get(&node, StateKey::Counter).await.expect("counter");
    assert_eq!(counter.value, StateValue::Counter(1));
}

#[tokio::test]
async fn update_counter_applies_step_once() {
    let storage = memory_storage().await;
    let node = NodeId::new("8");
    storage
        .set(&node, StateValue::Counter(3))
        .await
        .expect("seed");

    let mut calls = 0;
    let entry = storage
        .update_counter(&node, |current| {
            calls += 1;
            current + 10
        })
        .await
        .expect("update");
    assert_eq!(calls, 1);
    assert_eq!(entry.value, StateValue::Counter(13));
    assert_eq!(entry.version, 2);
}

#[tokio::test]
async fn concurrent_updates_do_not_lose_increments() {
    let storage = memory_storage().await;
    let node = NodeId::new("shared-counter");

    let mut handles = Vec::new();
    for _ in 0..20 {
        let storage = storage.clone();
        let node = node.clone();
        handles.push(tokio::spawn(async move {
            storage
                .update_counter(&node, |current| current + 1)
                .await
                .expect("update")
        }));
    }
    for handle in handles {
        handle.await.expect("join");
    }

    let entry = storage.get(&node, StateKey::Counter).await.expect("read");
    assert_eq!(entry.value, StateValue::Counter(20));
    assert_eq!(entry.version, 20);
}

#[tokio::test]
async fn remove_node_drops_all_keys() {
    let storage = memory_storage().await;
    let node = NodeId::new("gone");
    let other = NodeId::new("kept");
    storage
        .set(&node, StateValue::Counter(5))
        .await
        .expect("counter");
    storage
        .set(&node, StateValue::Text("x".into()))
        .await
        .expect("text");
    storage
        .set(&other, StateValue::Counter(2))
        .await
        .expect("other");

    let removed = storage.remove_node(&node).await.expect("remove");
    assert_eq!(removed.len(), 2);
    assert!(removed.iter().all(|entry| entry.version == 2));

    let counter = storage.get(&node, StateKey::Counter).await.expect("read");
    assert_eq!(counter.value, StateValue::Counter(0));
    assert_eq!(counter.version, 2);
    assert!(storage.list_node_entries(&node).await.expect("list").is_empty());
    assert_eq!(
        storage.get(&other, StateKey::Counter).await.expect("read").value,
        StateValue::Counter(2)
    );
}

#[tokio::test]
async fn versions_keep_increasing_across_removal() {
    let storage = memory_storage().await;
    let node = NodeId::new("reused");
    storage
        .set(&node, StateValue::Counter(5))
        .await
        .expect("write");
    storage.remove_node(&node).await.expect("remove");

    let version = storage
        .set(&node, StateValue::Counter(1))
        .await
        .expect("rewrite");
    assert_eq!(version, 3);

    let removed = storage.remove_node(&node).await.expect("remove again");
    assert_eq!(removed[0].version, 4);
    assert!(storage.remove_node(&node).await.expect("noop").is_empty());
    assert_eq!(
        storage.get(&node, StateKey::Counter).await.expect("read").version,
        4
    );
}

#[tokio::test]
async fn removal_waits_behind_queued_writes() {
    let storage = memory_storage().await;
    let node = NodeId::new("busy");
    storage
        .set(&node, StateValue::Counter(1))
        .await
        .expect("seed");

    let held = storage.locks.acquire(&node, StateKey::Counter).await;
    let writer = {
        let storage = storage.clone();
        let node = node.clone();
        tokio::spawn(async move { storage.set(&node, StateValue::Counter(7)).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let remover = {
        let storage = storage.clone();
        let node = node.clone();
        tokio::spawn(async move { storage.remove_node(&node).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert!(!remover.is_finished());
    assert_eq!(
        storage.get(&node, StateKey::Counter).await.expect("read").value,
        StateValue::Counter(1)
    );

    drop(held);
    assert_eq!(writer.await.expect("join").expect("write"), 2);
    let removed = remover.await.expect("join").expect("remove");
    assert_eq!(removed[0].version, 3);

    let entry = storage.get(&node, StateKey::Counter).await.expect("read");
    assert_eq!(entry.value, StateValue::Counter(0));
    assert_eq!(entry.version, 3);

    let locks = storage.locks.inner.lock().expect("locks");
    assert!(locks.keys().all(|(id, _)| id != &node));
}

#[tokio::test]
async fn lists_entries_with_timestamps() {
    let storage = memory_storage().await;
    let node = NodeId::new("listed");
    storage
        .set(&node, StateValue::Text("hello".into()))
        .await
        .expect("text");
    storage
        .set(&node, StateValue::Counter(1))
        .await
        .expect("counter");

    let entries = storage.list_node_entries(&node).await.expect("list");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].entry.state_key, StateKey::CacheText);
    assert_eq!(entries[1].entry.state_key, StateKey::Counter);
    assert!(entries[0].updated_at <= Utc::now());
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("state.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    storage
        .set(&NodeId::new("1"), StateValue::Counter(1))
        .await
        .expect("write");
    storage.pool().close().await;
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[test]
fn memory_urls_have_no_file_path() {
    assert!(sqlite_path("sqlite::memory:").is_none());
    assert_eq!(
        sqlite_path("sqlite://./data/state.db?mode=rwc"),
        Some(PathBuf::from("./data/state.db"))
    );
}
