use brambles_stream::models::checkpoint::{Checkpoint, DedupPolicy};
use brambles_stream::persistence::memory::MemoryCheckpointStore;
use brambles_stream::persistence::CheckpointStore;

fn sample() -> Checkpoint {
    let mut cp = Checkpoint::new("t1".into(), "hello".into());
    cp.apply_word("Hi", 1, DedupPolicy::Word);
    cp
}

#[tokio::test]
async fn empty_store_loads_nothing() {
    let store = MemoryCheckpointStore::new();

    assert!(store.load().await.expect("load").is_none());
}

#[tokio::test]
async fn save_then_load_returns_same_checkpoint() {
    let store = MemoryCheckpointStore::new();
    let cp = sample();

    store.save(&cp).await.expect("save");

    assert_eq!(store.load().await.expect("load"), Some(cp));
}

#[tokio::test]
async fn save_replaces_previous_checkpoint() {
    let store = MemoryCheckpointStore::with_checkpoint(sample());
    let replacement = Checkpoint::new("t2".into(), "again".into());

    store.save(&replacement).await.expect("save");

    let loaded = store.load().await.expect("load").expect("present");
    assert_eq!(loaded.task_id, "t2");
    assert!(loaded.words.is_empty());
}

#[tokio::test]
async fn clear_is_idempotent() {
    let store = MemoryCheckpointStore::with_checkpoint(sample());

    store.clear().await.expect("first clear");
    store.clear().await.expect("second clear");

    assert!(store.load().await.expect("load").is_none());
}
