use std::sync::Arc;

use stash::application::repos::ExpiryChange;
use stash::cache::{CacheConfig, CacheError, CacheKey, CacheStore, FixedClock, spread_expiries};
use stash::domain::entities::CacheEntryRecord;
use stash::domain::types::{
    DEFAULT_BUNDLE_ID, EntryColumn, GLOBAL_SESSION, SessionScope, TEMPLATE_BUNDLE_ID,
};
use stash::infra::memory::InMemoryRepositories;

const T: i64 = 1_700_000_000;

fn setup() -> (CacheStore, Arc<InMemoryRepositories>, Arc<FixedClock>) {
    let repos = Arc::new(InMemoryRepositories::new());
    let clock = Arc::new(FixedClock::new(T));
    let store = CacheStore::new(CacheConfig::default(), repos.clone()).with_clock(clock.clone());
    (store, repos, clock)
}

fn row(key_name: &str, session_id: Option<&str>, created: i64, expire: i64) -> CacheEntryRecord {
    CacheEntryRecord {
        id: 0,
        key_name: key_name.to_string(),
        bundle_id: DEFAULT_BUNDLE_ID,
        session_id: session_id.map(str::to_string),
        site_id: 1,
        created,
        expire,
        parameters: format!("{key_name}-value"),
        key_label: String::new(),
    }
}

#[tokio::test]
async fn inserted_value_is_readable_after_flush() {
    let (store, repos, _) = setup();
    let key = CacheKey::new("menu", TEMPLATE_BUNDLE_ID, 1);

    let mut work = store.begin();
    store
        .insert(&mut work, key.clone(), store.expires_in(300), "<ul></ul>", "Menu")
        .expect("insert");
    let summary = store.flush(&mut work).await.expect("flush");
    assert_eq!(summary.inserted, 1);
    assert_eq!(work.pending_writes(), 0);

    let stored = &repos.entries_snapshot()[0];
    assert_eq!(stored.expire, T + 300);
    assert_eq!(stored.created, T);
    assert_eq!(stored.key_label, "Menu");

    let mut next = store.begin();
    assert_eq!(
        store.get(&mut next, &key).await.expect("get").as_deref(),
        Some("<ul></ul>")
    );
}

#[tokio::test]
async fn second_insert_in_one_unit_is_refused_and_first_value_wins() {
    let (store, repos, _) = setup();
    let key = CacheKey::new("k", DEFAULT_BUNDLE_ID, 1);

    let mut work = store.begin();
    store.insert(&mut work, key.clone(), 0, "first", "").expect("insert");
    let err = store
        .insert(&mut work, key.clone(), 0, "second", "")
        .expect_err("duplicate insert");
    assert!(matches!(err, CacheError::AlreadyQueued { key: rejected } if rejected == key));
    assert!(work.is_inserted_key(&key));

    store.flush(&mut work).await.expect("flush");
    assert_eq!(repos.entries_snapshot()[0].parameters, "first");
}

#[tokio::test]
async fn insert_for_existing_address_is_ignored_by_the_store() {
    let (store, repos, _) = setup();
    repos.seed_entry(row("k", None, T, 0));

    let mut work = store.begin();
    store
        .insert(&mut work, CacheKey::new("k", DEFAULT_BUNDLE_ID, 1), 0, "new", "")
        .expect("insert");
    let summary = store.flush(&mut work).await.expect("flush");

    assert_eq!(summary.inserted, 0);
    assert_eq!(repos.entry_count(), 1);
    assert_eq!(repos.entries_snapshot()[0].parameters, "k-value");
}

#[tokio::test]
async fn last_queued_update_wins() {
    let (store, repos, _) = setup();
    repos.seed_entry(row("k", None, T, 0));
    let key = CacheKey::new("k", DEFAULT_BUNDLE_ID, 1);

    let mut work = store.begin();
    store.update(&mut work, key.clone(), T + 10, Some("one"));
    store.update(&mut work, key.clone(), T + 20, Some("two"));
    assert_eq!(work.pending_writes(), 1);
    assert_eq!(store.get(&mut work, &key).await.expect("get").as_deref(), Some("two"));

    let summary = store.flush(&mut work).await.expect("flush");
    assert_eq!(summary.updated, 1);

    let stored = &repos.entries_snapshot()[0];
    assert_eq!(stored.parameters, "two");
    assert_eq!(stored.expire, T + 20);
}

#[tokio::test]
async fn scoped_read_past_half_life_refreshes_ahead() {
    let (store, repos, _) = setup();
    repos.seed_entry(row("profile", Some("u1"), T - 60, T + 30));
    repos.seed_entry(row("banner", None, T - 60, T + 30));

    let mut work = store.begin();
    let scoped = CacheKey::new("profile", DEFAULT_BUNDLE_ID, 1).with_session("u1");
    let unscoped = CacheKey::new("banner", DEFAULT_BUNDLE_ID, 1);

    assert!(store.get(&mut work, &unscoped).await.expect("get").is_some());
    assert_eq!(work.pending_writes(), 0);

    assert_eq!(
        store.get(&mut work, &scoped).await.expect("get").as_deref(),
        Some("profile-value")
    );
    assert_eq!(work.pending_writes(), 1);

    store.flush(&mut work).await.expect("flush");
    let refreshed = repos
        .entries_snapshot()
        .into_iter()
        .find(|entry| entry.key_name == "profile")
        .expect("profile row");
    assert_eq!(refreshed.expire, T + 90);
    assert_eq!(refreshed.parameters, "profile-value");
}

#[tokio::test]
async fn refresh_ahead_keeps_a_value_queued_earlier_in_the_unit() {
    let (store, repos, _) = setup();
    repos.seed_entry(row("profile", Some("u1"), T - 60, T + 30));
    let key = CacheKey::new("profile", DEFAULT_BUNDLE_ID, 1).with_session("u1");

    let mut work = store.begin();
    store.update(&mut work, key.clone(), T + 30, Some("v2"));
    assert_eq!(
        store
            .get_column(&mut work, &key, EntryColumn::Expire)
            .await
            .expect("get expire")
            .as_deref(),
        Some((T + 30).to_string().as_str())
    );
    assert_eq!(work.pending_writes(), 1);
    assert_eq!(store.get(&mut work, &key).await.expect("get").as_deref(), Some("v2"));

    store.flush(&mut work).await.expect("flush");
    let stored = &repos.entries_snapshot()[0];
    assert_eq!(stored.parameters, "v2");
    assert_eq!(stored.expire, T + 90);
}

#[tokio::test]
async fn explicit_refresh_after_update_keeps_the_value() {
    let (store, repos, _) = setup();
    repos.seed_entry(row("k", None, T, T + 10));
    let key = CacheKey::new("k", DEFAULT_BUNDLE_ID, 1);

    let mut work = store.begin();
    store.update(&mut work, key.clone(), T + 10, Some("fresh"));
    store.refresh(&mut work, key, 600);
    store.flush(&mut work).await.expect("flush");

    let stored = &repos.entries_snapshot()[0];
    assert_eq!(stored.parameters, "fresh");
    assert_eq!(stored.expire, T + 600);
}

#[tokio::test]
async fn read_at_expiry_misses() {
    let (store, repos, clock) = setup();
    repos.seed_entry(row("k", None, T - 10, T + 5));
    let key = CacheKey::new("k", DEFAULT_BUNDLE_ID, 1);

    clock.advance(5);
    let mut work = store.begin();
    assert_eq!(store.get(&mut work, &key).await.expect("get"), None);
}

#[tokio::test]
async fn prune_removes_only_rows_strictly_past_expiry() {
    let (store, repos, _) = setup();
    repos.seed_entry(row("forever", None, T - 100, 0));
    repos.seed_entry(row("now", None, T - 100, T));
    repos.seed_entry(row("past", None, T - 100, T - 1));

    assert_eq!(store.prune().await.expect("prune"), 1);

    let mut left: Vec<String> = repos
        .entries_snapshot()
        .into_iter()
        .map(|entry| entry.key_name)
        .collect();
    left.sort();
    assert_eq!(left, vec!["forever".to_string(), "now".to_string()]);
}

#[tokio::test]
async fn flushed_then_deleted_entry_is_gone() {
    let (store, repos, _) = setup();
    let key = CacheKey::new("gone", DEFAULT_BUNDLE_ID, 1);

    let mut work = store.begin();
    store.insert(&mut work, key.clone(), 0, "v", "").expect("insert");
    store.flush(&mut work).await.expect("flush");

    let deleted = store
        .delete(&mut work, "gone", Some(DEFAULT_BUNDLE_ID), None, 1, 0)
        .await
        .expect("delete");
    assert_eq!(deleted, 1);
    assert_eq!(repos.entry_count(), 0);

    let mut next = store.begin();
    assert_eq!(store.get(&mut next, &key).await.expect("get"), None);
}

#[tokio::test]
async fn delete_discards_writes_still_queued() {
    let (store, repos, _) = setup();
    let key = CacheKey::new("pending", DEFAULT_BUNDLE_ID, 1);

    let mut work = store.begin();
    store.insert(&mut work, key.clone(), 0, "v", "").expect("insert");
    store
        .delete(&mut work, "pending", None, None, 1, 0)
        .await
        .expect("delete");

    assert!(!work.is_inserted_key(&key));
    assert!(store.flush(&mut work).await.expect("flush").is_empty());
    assert_eq!(repos.entry_count(), 0);
}

#[tokio::test]
async fn session_scopes_select_user_and_site_rows() {
    let (store, repos, _) = setup();
    repos.seed_entry(row("a", None, T, 0));
    repos.seed_entry(row("b", Some(""), T, 0));
    repos.seed_entry(row("c", Some(GLOBAL_SESSION), T, 0));
    repos.seed_entry(row("d", Some("u1"), T, 0));
    repos.seed_entry(row("e", Some("u2"), T, 0));

    let mut work = store.begin();
    let users = store
        .delete_matching(&mut work, None, Some(&SessionScope::User), 1, None, 0)
        .await
        .expect("user scope");
    assert_eq!(users, 2);

    let site = store
        .delete_matching(&mut work, None, Some(&SessionScope::Site), 1, None, 0)
        .await
        .expect("site scope");
    assert_eq!(site, 1);

    let mut left: Vec<String> = repos
        .entries_snapshot()
        .into_iter()
        .map(|entry| entry.key_name)
        .collect();
    left.sort();
    assert_eq!(left, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn invalid_pattern_is_rejected() {
    let (store, _, _) = setup();
    let mut work = store.begin();
    let err = store
        .delete_matching(&mut work, None, None, 1, Some("(unclosed"), 0)
        .await
        .expect_err("invalid regex");
    assert!(matches!(err, CacheError::InvalidPattern { .. }));
}

#[tokio::test]
async fn delayed_bulk_delete_staggers_expiry() {
    let (store, repos, _) = setup();
    for name in ["x", "y", "z"] {
        repos.seed_entry(row(name, None, T, 0));
    }

    let mut work = store.begin();
    store
        .delete_matching(&mut work, Some(DEFAULT_BUNDLE_ID), None, 1, None, 60)
        .await
        .expect("soft delete");

    let mut expiries: Vec<i64> = repos
        .entries_snapshot()
        .into_iter()
        .map(|entry| entry.expire)
        .collect();
    expiries.sort();
    assert_eq!(expiries, vec![T, T + 30, T + 60]);
}

#[test]
fn spread_covers_the_window_linearly() {
    assert_eq!(
        spread_expiries(&[3, 1, 2], T, 60),
        vec![
            ExpiryChange { id: 1, expire: T },
            ExpiryChange { id: 2, expire: T + 30 },
            ExpiryChange { id: 3, expire: T + 60 },
        ]
    );
}

#[tokio::test]
async fn bundles_resolve_by_name_and_new_ones_register() {
    let (store, _, _) = setup();

    assert_eq!(store.bundle_id("default").await.expect("default"), DEFAULT_BUNDLE_ID);
    assert!(matches!(
        store.bundle_id("fragments").await,
        Err(CacheError::UnknownBundle { name }) if name == "fragments"
    ));

    let created = store
        .bundles()
        .create("fragments", "Fragments")
        .await
        .expect("create");
    assert!(created > 3);
    assert_eq!(store.bundle_id("fragments").await.expect("fragments"), created);
    assert_eq!(
        store.bundles().create("fragments", "Again").await.expect("create"),
        created
    );
}

#[tokio::test]
async fn counting_helpers_read_the_store() {
    let (store, repos, _) = setup();
    repos.seed_entry(row("a", None, T, 0));
    repos.seed_entry(row("b", None, T, 0));

    assert_eq!(
        store.bundle_entry_count(DEFAULT_BUNDLE_ID, 1).await.expect("count"),
        2
    );
    assert!(store.bundle_entry_exists(DEFAULT_BUNDLE_ID, 1).await.expect("exists"));
    assert!(!store.bundle_entry_exists(TEMPLATE_BUNDLE_ID, 1).await.expect("exists"));
    assert!(!store.bundle_entry_exists(DEFAULT_BUNDLE_ID, 2).await.expect("exists"));
}

#[tokio::test]
async fn reset_discards_unflushed_state() {
    let (store, repos, _) = setup();
    let key = CacheKey::new("k", DEFAULT_BUNDLE_ID, 1);

    let mut work = store.begin();
    store.insert(&mut work, key.clone(), 0, "v", "").expect("insert");
    assert_eq!(work.memoized_reads(), 1);

    work.reset();
    assert_eq!(work.pending_writes(), 0);
    assert_eq!(work.memoized_reads(), 0);
    assert!(!work.is_inserted_key(&key));

    store.insert(&mut work, key, 0, "again", "").expect("insert after reset");
    store.flush(&mut work).await.expect("flush");
    assert_eq!(repos.entries_snapshot()[0].parameters, "again");
}

#[tokio::test]
async fn store_failures_surface_as_errors() {
    let (store, repos, _) = setup();
    repos.set_unavailable(true);

    let mut work = store.begin();
    let err = store
        .get(&mut work, &CacheKey::new("k", DEFAULT_BUNDLE_ID, 1))
        .await
        .expect_err("store down");
    assert!(matches!(err, CacheError::Store(_)));
}
