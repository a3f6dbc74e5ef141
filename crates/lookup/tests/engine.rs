use std::sync::Arc;

use sheetdesk_contracts::{MASK_TOKEN, Role};
use sheetdesk_lookup::{LookupEngine, LookupFields};
use sheetdesk_store::{MemoryStore, StoreError};

const RECORDS_TABLE: &str = "records";

fn engine(store: &Arc<MemoryStore>) -> LookupEngine {
    LookupEngine::new(store.clone(), RECORDS_TABLE, LookupFields::default())
}

#[tokio::test]
async fn engine_scans_the_record_table_and_redacts() {
    let store = Arc::new(MemoryStore::new());
    store.seed_table(
        RECORDS_TABLE,
        &["name", "customer_id", "secret", "last_login"],
        &[
            &["Alice", "42", "hunter2", "2026-01-01"],
            &["Bob", "7", "qwerty", "2026-01-02"],
        ],
    );

    let out = engine(&store)
        .search(Role::User, "42")
        .await
        .expect("search should succeed");
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].field("name"), Some("Alice"));
    assert_eq!(out[0].field("secret"), Some(MASK_TOKEN));
    assert_eq!(out[0].field("last_login"), Some("2026-01-01"));
}

#[tokio::test]
async fn missing_record_table_reads_as_zero_matches() {
    let store = Arc::new(MemoryStore::new());

    let out = engine(&store)
        .search(Role::User, "alice")
        .await
        .expect("missing table is not an error on the read path");
    assert!(out.is_empty());
}

#[tokio::test]
async fn rate_limited_store_propagates_to_the_caller() {
    let store = Arc::new(MemoryStore::new());
    store.seed_table(RECORDS_TABLE, &["name", "customer_id", "secret"], &[]);
    store.fail_next_fetch(StoreError::RateLimited);

    let err = engine(&store)
        .search(Role::User, "alice")
        .await
        .expect_err("rate limit must surface");
    assert!(matches!(err, StoreError::RateLimited));
}
