//! Lifecycle guarantees: exactly-once, ordered, atomic migration; collapse
//! of concurrent initialization; reset; drift detection.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use stowage::migrate::{Migration, MigrationId, MigrationSet};
use stowage::{
    Environment, Filter, LifecycleState, StoreConfig, StoreError, StoreManager, StowageError,
    Value,
};
use stowage_testkit::fixtures::create_table;
use stowage_testkit::{
    demo_migrations, failing_migrations, init_tracing, numbered_migrations, FaultyMedium,
    TestStore,
};

fn ids(entries: &[stowage::LedgerEntry]) -> Vec<u64> {
    entries.iter().map(|e| e.id.get()).collect()
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

#[tokio::test]
async fn test_get_store_twice_migrates_once() {
    init_tracing();
    let store = TestStore::new(numbered_migrations(3));

    let first = store.manager.get_store("x").await.unwrap();
    let second = store.manager.get_store("x").await.unwrap();

    assert!(first.same_store(&second));
    let stats = store.manager.executor_stats();
    assert_eq!(stats.runs, 1);
    assert_eq!(stats.scripts_applied, 3);
    assert_eq!(ids(&store.manager.ledger("x").await.unwrap()), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_scripts_apply_in_id_order() {
    let set = MigrationSet::new([create_table(30), create_table(10), create_table(20)]).unwrap();
    let store = TestStore::new(set);

    store.manager.get_store("x").await.unwrap();

    let ledger = store.manager.ledger("x").await.unwrap();
    assert_eq!(ids(&ledger), vec![10, 20, 30]);
    assert!(ledger.windows(2).all(|w| w[0].applied_at <= w[1].applied_at));

    let report = store.manager.last_report("x").unwrap().unwrap();
    assert_eq!(
        report.applied,
        vec![MigrationId(10), MigrationId(20), MigrationId(30)]
    );
}

#[tokio::test]
async fn test_failure_in_third_script_keeps_first_two() {
    let store = TestStore::new(failing_migrations(4, 3));

    let err = store.manager.get_store("x").await.unwrap_err();
    assert!(matches!(
        err,
        StowageError::Store(StoreError::MigrationApply { id, .. }) if id == MigrationId(3)
    ));
    assert_eq!(store.manager.state("x").unwrap(), LifecycleState::Failed);
    assert!(store.manager.last_error("x").unwrap().is_some());
    assert_eq!(ids(&store.manager.ledger("x").await.unwrap()), vec![1, 2]);

    // Retrying with the same scripts attempts script 3 again and nothing else.
    let err = store.manager.get_store("x").await.unwrap_err();
    assert!(matches!(
        err,
        StowageError::Store(StoreError::MigrationApply { id, .. }) if id == MigrationId(3)
    ));
    assert_eq!(store.manager.executor_stats().runs, 2);
    assert_eq!(store.manager.executor_stats().scripts_applied, 2);
    assert_eq!(ids(&store.manager.ledger("x").await.unwrap()), vec![1, 2]);

    // With script 3 fixed, only 3 and 4 run. Creating t3 succeeds, so the
    // failed attempt left nothing behind.
    let fixed = store.reopen(numbered_migrations(4));
    fixed.get_store("x").await.unwrap();
    let report = fixed.last_report("x").unwrap().unwrap();
    assert_eq!(report.applied, vec![MigrationId(3), MigrationId(4)]);
    assert_eq!(report.skipped, vec![MigrationId(1), MigrationId(2)]);
    assert_eq!(ids(&fixed.ledger("x").await.unwrap()), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_pass() {
    let medium = Arc::new(FaultyMedium::in_memory().with_open_delay(Duration::from_millis(50)));
    let manager = StoreManager::with_medium(
        StoreConfig::in_memory(),
        numbered_migrations(3),
        medium.clone(),
    );

    let (a, b, c, d, e) = tokio::join!(
        manager.get_store("x"),
        manager.get_store("x"),
        manager.get_store("x"),
        manager.get_store("x"),
        manager.get_store("x"),
    );
    let sessions = [a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap(), e.unwrap()];

    assert!(sessions.iter().all(|s| s.same_store(&sessions[0])));
    assert_eq!(manager.executor_stats().runs, 1);
    assert_eq!(medium.opens(), 1);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_failure() {
    let medium = Arc::new(FaultyMedium::in_memory().with_open_delay(Duration::from_millis(50)));
    let manager = StoreManager::with_medium(
        StoreConfig::in_memory(),
        failing_migrations(3, 2),
        medium.clone(),
    );

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_store("x").await })
        })
        .collect();

    let mut messages = Vec::new();
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            StowageError::Store(StoreError::MigrationApply { id, .. }) if id == MigrationId(2)
        ));
        messages.push(err.to_string());
    }

    assert!(messages.iter().all(|m| m == &messages[0]));
    assert_eq!(manager.executor_stats().runs, 1);
    assert_eq!(medium.opens(), 1);
}

#[tokio::test]
async fn test_reset_then_get_store_reapplies_everything() {
    let store = TestStore::new(numbered_migrations(3));
    let session = store.manager.get_store("x").await.unwrap();
    session.insert("t1", &[("v", text("kept?"))]).await.unwrap();

    store.manager.reset("x").await.unwrap();

    assert_eq!(store.manager.state("x").unwrap(), LifecycleState::Uninitialized);
    assert!(store.manager.ledger("x").await.unwrap().is_empty());
    assert!(store.manager.last_report("x").unwrap().is_none());
    assert!(session.is_stale());
    assert!(matches!(
        session.select("t1", &Filter::all()).await,
        Err(StowageError::Store(StoreError::StaleHandle { .. }))
    ));

    let fresh = store.manager.get_store("x").await.unwrap();
    assert!(!fresh.same_store(&session));
    assert_eq!(ids(&store.manager.ledger("x").await.unwrap()), vec![1, 2, 3]);
    assert_eq!(fresh.count("t1", &Filter::all()).await.unwrap(), 0);

    let stats = store.manager.executor_stats();
    assert_eq!(stats.runs, 2);
    assert_eq!(stats.scripts_applied, 6);
}

#[tokio::test]
async fn test_reset_is_idempotent() {
    let store = TestStore::new(numbered_migrations(2));

    store.manager.reset("never-opened").await.unwrap();
    assert_eq!(
        store.manager.state("never-opened").unwrap(),
        LifecycleState::Uninitialized
    );

    store.manager.get_store("x").await.unwrap();
    let (a, b) = tokio::join!(store.manager.reset("x"), store.manager.reset("x"));
    a.unwrap();
    b.unwrap();
    store.manager.reset("x").await.unwrap();

    assert!(!store.path().join("x.sqlite3").exists());
}

#[tokio::test]
async fn test_reset_waits_for_in_flight_open() {
    let medium = Arc::new(FaultyMedium::in_memory().with_open_delay(Duration::from_millis(50)));
    let manager = StoreManager::with_medium(
        StoreConfig::in_memory(),
        numbered_migrations(2),
        medium.clone(),
    );

    let (session, reset) = tokio::join!(manager.get_store("x"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.reset("x").await
    });

    reset.unwrap();
    assert!(session.unwrap().is_stale());
    assert_eq!(manager.executor_stats().runs, 1);
    assert_eq!(manager.state("x").unwrap(), LifecycleState::Uninitialized);
}

#[tokio::test]
async fn test_get_store_waits_for_in_flight_reset() {
    let medium = Arc::new(FaultyMedium::in_memory().with_destroy_delay(Duration::from_millis(50)));
    let manager = StoreManager::with_medium(
        StoreConfig::in_memory(),
        numbered_migrations(2),
        medium.clone(),
    );
    let before = manager.get_store("x").await.unwrap();

    let (reset, after) = tokio::join!(manager.reset("x"), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.state("x").unwrap(), LifecycleState::Resetting);
        manager.get_store("x").await
    });

    reset.unwrap();
    let after = after.unwrap();
    assert!(before.is_stale());
    assert!(!after.is_stale());
    assert!(!before.same_store(&after));
    assert_eq!(medium.destroys(), 1);
    assert_eq!(manager.executor_stats().runs, 2);
    assert_eq!(ids(&manager.ledger("x").await.unwrap()), vec![1, 2]);
}

#[tokio::test]
async fn test_panicked_open_settles_as_failed() {
    let medium = Arc::new(FaultyMedium::in_memory());
    let manager = StoreManager::with_medium(
        StoreConfig::in_memory(),
        numbered_migrations(2),
        medium.clone(),
    );

    medium.panic_next_open();
    assert!(matches!(
        manager.get_store("x").await,
        Err(StowageError::TransitionAborted { .. })
    ));
    assert_eq!(manager.state("x").unwrap(), LifecycleState::Failed);
    assert!(matches!(
        manager.last_error("x").unwrap(),
        Some(StowageError::TransitionAborted { .. })
    ));

    let session = manager.get_store("x").await.unwrap();
    assert_eq!(session.collections().await.unwrap(), vec!["t1", "t2"]);

    tokio::time::timeout(Duration::from_secs(2), manager.reset("x"))
        .await
        .expect("reset settles")
        .unwrap();
    assert_eq!(manager.state("x").unwrap(), LifecycleState::Uninitialized);
}

#[tokio::test]
async fn test_reset_after_panicked_open_does_not_spin() {
    let medium = Arc::new(FaultyMedium::in_memory());
    let manager = StoreManager::with_medium(
        StoreConfig::in_memory(),
        numbered_migrations(1),
        medium.clone(),
    );

    medium.panic_next_open();
    let _ = manager.get_store("x").await;

    tokio::time::timeout(Duration::from_secs(2), manager.reset("x"))
        .await
        .expect("reset settles")
        .unwrap();
    assert_eq!(medium.destroys(), 1);
    manager.get_store("x").await.unwrap();
}

#[tokio::test]
async fn test_edited_script_is_drift() {
    let original = MigrationSet::new([
        create_table(1),
        Migration::new(5, "widgets", "CREATE TABLE widgets (id INTEGER PRIMARY KEY);"),
    ])
    .unwrap();
    let store = TestStore::new(original);
    store.manager.get_store("x").await.unwrap();

    let edited = MigrationSet::new([
        create_table(1),
        Migration::new(
            5,
            "widgets",
            "CREATE TABLE widgets (id INTEGER PRIMARY KEY, label TEXT);",
        ),
    ])
    .unwrap();
    let restarted = store.reopen(edited);

    let err = restarted.get_store("x").await.unwrap_err();
    assert!(matches!(
        err,
        StowageError::Store(StoreError::MigrationDrift { id, .. }) if id == MigrationId(5)
    ));
    assert_eq!(restarted.executor_stats().scripts_applied, 0);
    assert_eq!(ids(&restarted.ledger("x").await.unwrap()), vec![1, 5]);
}

#[tokio::test]
async fn test_removed_script_is_orphaned() {
    let store = TestStore::new(numbered_migrations(3));
    store.manager.get_store("x").await.unwrap();

    let restarted = store.reopen(numbered_migrations(2));
    let err = restarted.get_store("x").await.unwrap_err();
    assert!(matches!(
        err,
        StowageError::Store(StoreError::OrphanedMigration { id }) if id == MigrationId(3)
    ));
}

#[tokio::test]
async fn test_restart_skips_applied_scripts() {
    let store = TestStore::new(numbered_migrations(2));
    store.manager.get_store("x").await.unwrap();

    let restarted = store.reopen(numbered_migrations(3));
    restarted.get_store("x").await.unwrap();

    let report = restarted.last_report("x").unwrap().unwrap();
    assert_eq!(report.applied, vec![MigrationId(3)]);
    assert_eq!(restarted.executor_stats().scripts_applied, 1);
}

#[tokio::test]
async fn test_demo_scenario() {
    let store = TestStore::new(demo_migrations());
    let manager = &store.manager;

    let session = manager.get_store("demo").await.unwrap();
    assert_eq!(manager.state("demo").unwrap(), LifecycleState::Ready);
    assert_eq!(manager.ledger("demo").await.unwrap().len(), 3);

    session
        .insert("contact", &[("first", text("Ada")), ("last", text("Lovelace"))])
        .await
        .unwrap();
    let org = session
        .insert("organizations", &[("name", text("Analytical Engines"))])
        .await
        .unwrap();
    session
        .insert(
            "branches",
            &[("organization_id", Value::Integer(org)), ("city", text("London"))],
        )
        .await
        .unwrap();
    for table in ["contact", "organizations", "branches"] {
        assert_eq!(session.select(table, &Filter::all()).await.unwrap().len(), 1);
    }

    manager.reset("demo").await.unwrap();
    assert!(manager.ledger("demo").await.unwrap().is_empty());
    assert_eq!(manager.state("demo").unwrap(), LifecycleState::Uninitialized);

    manager.get_store("demo").await.unwrap();
    assert_eq!(manager.ledger("demo").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_timeout_leaves_transition_running() {
    let medium = Arc::new(FaultyMedium::in_memory().with_open_delay(Duration::from_millis(300)));
    let manager = StoreManager::with_medium(
        StoreConfig::in_memory().with_init_timeout(Duration::from_millis(20)),
        numbered_migrations(2),
        medium.clone(),
    );

    let err = manager.get_store("x").await.unwrap_err();
    assert!(matches!(err, StowageError::Timeout { .. }));
    assert_ne!(manager.state("x").unwrap(), LifecycleState::Ready);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(manager.state("x").unwrap(), LifecycleState::Ready);

    manager.get_store("x").await.unwrap();
    assert_eq!(manager.executor_stats().runs, 1);
    assert_eq!(medium.opens(), 1);
}

#[tokio::test]
async fn test_failed_reset_blocks_get_store_until_retried() {
    let medium = Arc::new(FaultyMedium::in_memory());
    let manager = StoreManager::with_medium(
        StoreConfig::in_memory(),
        numbered_migrations(2),
        medium.clone(),
    );
    let session = manager.get_store("x").await.unwrap();

    medium.fail_destroy(true);
    let err = manager.reset("x").await.unwrap_err();
    assert!(matches!(err, StowageError::Store(StoreError::Reset { .. })));
    assert_eq!(manager.state("x").unwrap(), LifecycleState::Failed);
    assert!(session.is_stale());
    assert!(matches!(
        manager.get_store("x").await,
        Err(StowageError::ResetIncomplete { .. })
    ));

    medium.fail_destroy(false);
    manager.reset("x").await.unwrap();
    manager.get_store("x").await.unwrap();
    assert_eq!(medium.destroys(), 2);
    assert_eq!(manager.executor_stats().runs, 2);
}

#[tokio::test]
async fn test_open_failure_is_storage_open() {
    let store = TestStore::new(numbered_migrations(2));
    fs::write(store.path().join("broken.sqlite3"), vec![0xab; 4096]).unwrap();

    let err = store.manager.get_store("broken").await.unwrap_err();
    assert!(matches!(
        err,
        StowageError::Store(StoreError::StorageOpen { .. })
    ));
    assert_eq!(store.manager.state("broken").unwrap(), LifecycleState::Failed);
    assert_eq!(store.manager.executor_stats().runs, 0);

    // Reset clears the corrupt file.
    store.manager.reset("broken").await.unwrap();
    store.manager.get_store("broken").await.unwrap();
}

#[tokio::test]
async fn test_environments_do_not_share_storage() {
    let store = TestStore::new(demo_migrations());
    let dev = StoreManager::new(
        StoreConfig::persistent(store.path()).with_environment(Environment::Development),
        demo_migrations(),
    );

    let prod_session = store.manager.get_store("contacts").await.unwrap();
    let dev_session = dev.get_store("contacts").await.unwrap();
    assert_eq!(dev_session.name(), "contacts-dev");

    dev_session
        .insert("contact", &[("first", text("Grace"))])
        .await
        .unwrap();
    assert_eq!(prod_session.count("contact", &Filter::all()).await.unwrap(), 0);
    assert_eq!(dev_session.count("contact", &Filter::all()).await.unwrap(), 1);

    assert!(store.path().join("contacts.sqlite3").exists());
    assert!(store.path().join("contacts-dev.sqlite3").exists());
}

#[tokio::test]
async fn test_stores_are_independent() {
    let store = TestStore::new(numbered_migrations(2));
    let a = store.manager.get_store("a").await.unwrap();
    let b = store.manager.get_store("b").await.unwrap();
    assert!(!a.same_store(&b));

    store.manager.reset("a").await.unwrap();
    assert!(a.is_stale());
    assert!(!b.is_stale());
    assert_eq!(store.manager.state("b").unwrap(), LifecycleState::Ready);
    assert_eq!(store.manager.executor_stats().runs, 2);
}

#[tokio::test]
async fn test_scripts_loaded_from_directory() {
    let scripts = tempfile::tempdir().unwrap();
    fs::write(
        scripts.path().join("20240101000000_contact.sql"),
        "CREATE TABLE contact (id INTEGER PRIMARY KEY, first TEXT);",
    )
    .unwrap();
    fs::write(
        scripts.path().join("20240102000000_index.sql"),
        "CREATE INDEX contact_first ON contact (first);\n--> statement-breakpoint\nINSERT INTO contact (first) VALUES ('seed');",
    )
    .unwrap();

    let store = TestStore::new(MigrationSet::load_dir(scripts.path()).unwrap());
    let session = store.manager.get_store("x").await.unwrap();

    assert_eq!(
        ids(&store.manager.ledger("x").await.unwrap()),
        vec![20240101000000, 20240102000000]
    );
    assert_eq!(session.count("contact", &Filter::all()).await.unwrap(), 1);
}
