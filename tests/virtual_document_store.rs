use std::sync::Arc;

use tokio::sync::mpsc::error::TryRecvError;
use url::Url;

use mdsvex_language_server::language_regions::{RegionTag, VirtualDocumentStore, VirtualDocumentUri};

fn svelte_uri(path: &str) -> VirtualDocumentUri {
    VirtualDocumentUri::new(Url::parse(&format!("file://{}", path)).unwrap(), RegionTag::Embedded)
}

#[tokio::test]
async fn test_update_update_remove_notifies_three_times() {
    let store = VirtualDocumentStore::new();
    let mut changes = store.subscribe();
    let uri = svelte_uri("/site/index.svx");

    store.update(uri.clone(), "<A />");
    store.update(uri.clone(), "<B />");
    store.remove(&uri);

    assert!(store.get(&uri).is_none());
    let mut seen = Vec::new();
    while let Ok(change) = changes.try_recv() {
        assert_eq!(change.uri, uri);
        seen.push((change.version, change.removed));
    }
    assert_eq!(seen, vec![(1, false), (2, false), (2, true)]);
    assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_every_subscriber_sees_every_change() {
    let store = VirtualDocumentStore::new();
    let mut first = store.subscribe();
    let mut second = store.subscribe();
    let uri = svelte_uri("/a.svx");

    store.update(uri.clone(), "x");
    let received = second.recv().await.unwrap();
    assert_eq!(received.version, 1);
    drop(second);

    store.update(uri.clone(), "y");
    assert_eq!(first.recv().await.unwrap().version, 1);
    assert_eq!(first.recv().await.unwrap().version, 2);
}

#[tokio::test]
async fn test_concurrent_updates_get_distinct_versions() {
    let store = Arc::new(VirtualDocumentStore::new());
    let uri = svelte_uri("/busy.svx");

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let store = Arc::clone(&store);
            let uri = uri.clone();
            tokio::spawn(async move { store.update(uri, format!("text {}", i)) })
        })
        .collect();

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap());
    }
    versions.sort_unstable();
    assert_eq!(versions, (1..=32).collect::<Vec<u64>>());
    assert_eq!(store.get(&uri).unwrap().version, 32);
}

#[tokio::test]
async fn test_documents_of_different_sources_are_independent() {
    let store = VirtualDocumentStore::new();
    let a = svelte_uri("/a.svx");
    let b = svelte_uri("/b.svx");

    store.update(a.clone(), "a");
    store.update(b.clone(), "b");
    store.remove(&a);

    assert!(!store.contains(&a));
    assert_eq!(&*store.get(&b).unwrap().text, "b");
    assert_eq!(store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_are_delivered_in_version_order() {
    let store = Arc::new(VirtualDocumentStore::new());
    let mut changes = store.subscribe();
    let uri = svelte_uri("/ordered.svx");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            let uri = uri.clone();
            tokio::spawn(async move {
                for j in 0..50 {
                    store.update(uri.clone(), format!("{} {}", i, j));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
    store.remove(&uri);

    let mut versions = Vec::new();
    while let Ok(change) = changes.try_recv() {
        versions.push((change.version, change.removed));
    }
    let mut expected: Vec<(u64, bool)> = (1..=400).map(|v| (v, false)).collect();
    expected.push((400, true));
    assert_eq!(versions, expected);
}
