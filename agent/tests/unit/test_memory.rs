//! In-memory coordination store tests

use std::sync::Arc;
use std::time::{Duration, Instant};

use cdagent::consul::kv::{get_json, put_json, KeyValueStore};
use cdagent::consul::memory::MemoryConsul;
use serde_json::json;

#[tokio::test]
async fn test_cas_conflict_on_stale_index() {
    let store = MemoryConsul::default();
    assert!(store.put("deployments/D1/nodes/i-1", "a", Some(0)).await.unwrap());
    let entry = store.get("deployments/D1/nodes/i-1").await.unwrap().unwrap();

    // Someone else writes in between
    store.put("deployments/D1/nodes/i-1", "b", None).await.unwrap();

    assert!(!store
        .put("deployments/D1/nodes/i-1", "c", Some(entry.modify_index))
        .await
        .unwrap());
    assert_eq!(
        store.value("deployments/D1/nodes/i-1").await.as_deref(),
        Some("b")
    );
}

#[tokio::test]
async fn test_json_helpers() {
    let store = MemoryConsul::default();
    assert!(get_json::<serde_json::Value>(&store, "missing").await.unwrap().is_none());

    put_json(&store, "instances/i-1/quarantine", &vec!["D1", "D2"], None)
        .await
        .unwrap();
    let (ids, index) = get_json::<Vec<String>>(&store, "instances/i-1/quarantine")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ids, vec!["D1", "D2"]);
    assert!(index > 0);
}

#[tokio::test]
async fn test_find_keys_by_prefix() {
    let store = MemoryConsul::default();
    store.seed_json("environments/e1/roles/web/services/a", &json!({})).await;
    store.seed_json("environments/e1/roles/web/services/b", &json!({})).await;
    store.seed_json("environments/e1/roles/api/services/c", &json!({})).await;

    let keys = store
        .find_keys("environments/e1/roles/web/services")
        .await
        .unwrap();
    assert_eq!(
        keys,
        vec![
            "environments/e1/roles/web/services/a",
            "environments/e1/roles/web/services/b"
        ]
    );
}

#[tokio::test]
async fn test_blocking_wait_wakes_on_change() {
    let store = Arc::new(MemoryConsul::new(Duration::from_secs(10)));
    store.seed_json("roles/web/a", &json!(1)).await;
    let index = store.current_index("roles/web").await.unwrap().unwrap();

    let writer = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.seed_json("roles/web/b", &json!(2)).await;
    });

    let started = Instant::now();
    let observed = store.blocking_wait("roles/web", index).await.unwrap();
    assert!(observed > index);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_unrelated_change_does_not_wake() {
    let store = Arc::new(MemoryConsul::new(Duration::from_millis(200)));
    store.seed_json("roles/web/a", &json!(1)).await;
    let index = store.current_index("roles/web").await.unwrap().unwrap();

    let writer = store.clone();
    tokio::spawn(async move {
        writer.seed_json("roles/api/a", &json!(2)).await;
    });

    let observed = store.blocking_wait("roles/web", index).await.unwrap();
    assert_eq!(observed, index);
}
