use super::*;

#[tokio::test]
async fn store_then_load_round_trips_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
    store.store("aggregator", b"hello".to_vec()).await.unwrap();

    // A fresh instance over the same directory observes the write.
    let reopened = DiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
    assert_eq!(
        reopened.load("aggregator").await.unwrap(),
        Some(b"hello".to_vec())
    );
}

#[tokio::test]
async fn load_of_absent_key_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
    assert_eq!(store.load("missing").await.unwrap(), None);
}

#[tokio::test]
async fn store_does_not_leave_a_temp_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
    store.store("k", b"v".to_vec()).await.unwrap();

    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    assert_eq!(names, vec!["k.json".to_string()]);
}

#[tokio::test]
async fn remove_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
    store.store("k", b"v".to_vec()).await.unwrap();
    store.remove("k").await.unwrap();
    store.remove("k").await.unwrap();
    assert_eq!(store.load("k").await.unwrap(), None);
}

#[tokio::test]
async fn keys_discovers_namespaced_sender_queues() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
    store.store("aggregator", b"a".to_vec()).await.unwrap();
    store.store("sender/disk", b"b".to_vec()).await.unwrap();
    store
        .store("sender/service-control", b"c".to_vec())
        .await
        .unwrap();

    let mut keys = store.keys().await.unwrap();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "aggregator".to_string(),
            "sender/disk".to_string(),
            "sender/service-control".to_string(),
        ]
    );
}

#[tokio::test]
async fn rejects_unsafe_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskPersistence::new(dir.path().to_path_buf()).await.unwrap();
    assert!(store.store("../escape", b"x".to_vec()).await.is_err());
    assert!(store.store("/abs", b"x".to_vec()).await.is_err());
}
