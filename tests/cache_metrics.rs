use std::collections::HashSet;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use serial_test::serial;
use stash::cache::{CacheConfig, CacheKey, CacheStore, FixedClock};
use stash::domain::entities::CacheEntryRecord;
use stash::domain::types::{DEFAULT_BUNDLE_ID, STATIC_BUNDLE_ID};
use stash::infra::memory::InMemoryRepositories;

const T: i64 = 1_700_000_000;

fn expired_row(key_name: &str) -> CacheEntryRecord {
    CacheEntryRecord {
        id: 0,
        key_name: key_name.to_string(),
        bundle_id: DEFAULT_BUNDLE_ID,
        session_id: None,
        site_id: 1,
        created: T - 100,
        expire: T - 10,
        parameters: "stale".to_string(),
        key_label: String::new(),
    }
}

#[tokio::test]
#[serial]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debugging recorder installs once per test binary");
    stash::infra::telemetry::describe_metrics();

    let dir = tempfile::tempdir().expect("tempdir");
    let config = CacheConfig {
        static_cache_enabled: true,
        static_basepath: dir.path().to_path_buf(),
        ..Default::default()
    };
    let repos = Arc::new(InMemoryRepositories::new());
    let store = CacheStore::new(config, repos.clone()).with_clock(Arc::new(FixedClock::new(T)));

    repos.seed_entry(CacheEntryRecord {
        expire: 0,
        parameters: "stored".to_string(),
        ..expired_row("persisted")
    });
    repos.seed_entry(expired_row("stale"));

    let mut work = store.begin();
    let missing = CacheKey::new("missing", DEFAULT_BUNDLE_ID, 1);
    let persisted = CacheKey::new("persisted", DEFAULT_BUNDLE_ID, 1);
    let fresh = CacheKey::new("fresh", DEFAULT_BUNDLE_ID, 1);

    // store miss, then memo miss
    assert_eq!(store.get(&mut work, &missing).await.expect("get"), None);
    assert_eq!(store.get(&mut work, &missing).await.expect("get"), None);
    // store hit
    assert_eq!(
        store.get(&mut work, &persisted).await.expect("get").as_deref(),
        Some("stored")
    );
    // memo hit and a rejected duplicate
    store.insert(&mut work, fresh.clone(), 0, "v", "").expect("insert");
    assert!(store.insert(&mut work, fresh.clone(), 0, "v", "").is_err());
    assert_eq!(store.get(&mut work, &fresh).await.expect("get").as_deref(), Some("v"));

    // a blacklisted character in a static URI fails the mirror write
    store
        .insert(&mut work, CacheKey::new("bad*uri", STATIC_BUNDLE_ID, 1), 0, "x", "")
        .expect("insert");
    store.flush(&mut work).await.expect("flush");

    assert_eq!(store.prune().await.expect("prune"), 1);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for expected in [
        "stash_read_hit_total",
        "stash_read_miss_total",
        "stash_queue_rejected_total",
        "stash_flush_ms",
        "stash_pruned_total",
        "stash_mirror_failure_total",
    ] {
        assert!(names.contains(expected), "missing metric {expected}: {names:?}");
    }
}
