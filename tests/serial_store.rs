//! Durability and contention behavior of the file-backed serial store.

use std::collections::HashSet;
use std::sync::Arc;

use kamini::logging::NopLogger;
use kamini::service::SerialStore;
use kamini::storage::FileSerialStore;
use tempfile::TempDir;

#[tokio::test]
async fn concurrent_allocations_then_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("serial");
    let store = Arc::new(FileSerialStore::new(&path, Arc::new(NopLogger)).unwrap());

    let mut handles = Vec::new();
    for _ in 0..50 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            // The lock file makes contending allocators fail fast rather
            // than block, so retry until this task gets its turn.
            loop {
                match store.next().await {
                    Ok(serial) => return serial,
                    Err(err) => {
                        assert!(err.to_string().contains("locked") || err.to_string().contains("lock"));
                        tokio::task::yield_now().await;
                    }
                }
            }
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let serial = handle.await.unwrap();
        assert!(
            (1..=50).contains(&serial),
            "serial {} out of range",
            serial
        );
        assert!(seen.insert(serial), "duplicate serial {}", serial);
    }
    assert_eq!(seen.len(), 50);

    // A fresh store over the same file continues the sequence.
    drop(store);
    let store = FileSerialStore::new(&path, Arc::new(NopLogger)).unwrap();
    assert_eq!(store.next().await.unwrap(), 51);
}

#[tokio::test]
async fn zero_is_never_returned() {
    let dir = TempDir::new().unwrap();
    let store =
        FileSerialStore::new(dir.path().join("serial"), Arc::new(NopLogger)).unwrap();
    for _ in 0..10 {
        assert_ne!(store.next().await.unwrap(), 0);
    }
}
