use super::*;

#[tokio::test]
async fn store_then_load_round_trips() {
    let store = MemoryPersistence::new();
    assert_eq!(store.load("aggregator").await.unwrap(), None);

    store
        .store("aggregator", b"hello".to_vec())
        .await
        .unwrap();
    assert_eq!(
        store.load("aggregator").await.unwrap(),
        Some(b"hello".to_vec())
    );
}

#[tokio::test]
async fn store_overwrites_previous_value() {
    let store = MemoryPersistence::new();
    store.store("k", b"one".to_vec()).await.unwrap();
    store.store("k", b"two".to_vec()).await.unwrap();
    assert_eq!(store.load("k").await.unwrap(), Some(b"two".to_vec()));
}

#[tokio::test]
async fn remove_clears_the_key() {
    let store = MemoryPersistence::new();
    store.store("k", b"one".to_vec()).await.unwrap();
    store.remove("k").await.unwrap();
    assert_eq!(store.load("k").await.unwrap(), None);
}

#[tokio::test]
async fn keys_lists_all_stored_keys() {
    let store = MemoryPersistence::new();
    store.store("aggregator", b"a".to_vec()).await.unwrap();
    store.store("sender/disk", b"b".to_vec()).await.unwrap();

    let mut keys = store.keys().await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["aggregator".to_string(), "sender/disk".to_string()]);
}

#[tokio::test]
async fn rejects_unsafe_keys() {
    let store = MemoryPersistence::new();
    assert!(store.store("", b"x".to_vec()).await.is_err());
    assert!(store.store("../escape", b"x".to_vec()).await.is_err());
    assert!(store.store("/abs", b"x".to_vec()).await.is_err());
    assert!(store.store("a//b", b"x".to_vec()).await.is_err());
}
