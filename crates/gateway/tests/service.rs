use std::sync::Arc;

use sheetdesk_auth::{AccessCodes, Authorizer};
use sheetdesk_contracts::{AuthReply, LookupReply, MASK_TOKEN, Role};
use sheetdesk_gateway::service::Service;
use sheetdesk_lookup::{LookupEngine, LookupFields};
use sheetdesk_store::{MemoryStore, StoreError};

const AUTH_TABLE: &str = "auth_log";
const RECORDS_TABLE: &str = "records";

fn service(store: &Arc<MemoryStore>) -> Service {
    let codes = AccessCodes::from_json(r#"{"batman": "user", "daddy": "admin"}"#)
        .expect("test codes should parse");
    let authorizer = Authorizer::new(store.clone(), AUTH_TABLE, codes);
    let lookup = LookupEngine::new(store.clone(), RECORDS_TABLE, LookupFields::default());
    Service::new(authorizer, lookup)
}

fn seed_records(store: &MemoryStore) {
    store.seed_table(
        RECORDS_TABLE,
        &["name", "customer_id", "secret", "last_login"],
        &[
            &["Alice", "42", "hunter2", "2026-07-01 09:00:00"],
            &["Bob", "7", "qwerty", "2026-07-02 10:00:00"],
        ],
    );
}

#[tokio::test]
async fn scenario_authenticate_then_lookup_masks_and_reveals() {
    let store = Arc::new(MemoryStore::new());
    seed_records(&store);
    let service = service(&store);

    let reply = service.handle_authenticate("42", "batman").await;
    assert_eq!(reply, AuthReply::Granted { role: Role::User });
    assert_eq!(store.row_count(AUTH_TABLE), 1);

    // Match by customer key: the secret stays masked.
    let reply = service.handle_lookup("42", "42").await;
    let LookupReply::Matches { matches } = reply else {
        panic!("expected matches, got {:?}", reply);
    };
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].field("name"), Some("Alice"));
    assert_eq!(matches[0].field("secret"), Some(MASK_TOKEN));

    // The searcher supplied the secret itself: revealed.
    let reply = service.handle_lookup("42", "hunter2").await;
    let LookupReply::Matches { matches } = reply else {
        panic!("expected matches, got {:?}", reply);
    };
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].field("secret"), Some("hunter2"));
}

#[tokio::test]
async fn admins_see_secrets_on_any_match() {
    let store = Arc::new(MemoryStore::new());
    seed_records(&store);
    let service = service(&store);

    let reply = service.handle_authenticate("7", "daddy").await;
    assert_eq!(reply, AuthReply::Granted { role: Role::Admin });

    let reply = service.handle_lookup("7", "alice").await;
    let LookupReply::Matches { matches } = reply else {
        panic!("expected matches, got {:?}", reply);
    };
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].field("secret"), Some("hunter2"));
}

#[tokio::test]
async fn unauthorized_lookup_never_reads_the_record_table() {
    let store = Arc::new(MemoryStore::new());
    seed_records(&store);
    let service = service(&store);

    let reply = service.handle_lookup("99", "alice").await;
    assert_eq!(reply, LookupReply::Unauthorized);
    assert_eq!(
        store.fetch_count(RECORDS_TABLE),
        0,
        "record table must not be touched on the unauthorized path"
    );
}

#[tokio::test]
async fn bad_code_is_rejected_not_an_error() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);

    let reply = service.handle_authenticate("42", "joker").await;
    assert_eq!(reply, AuthReply::Rejected);
    assert_eq!(store.row_count(AUTH_TABLE), 0);
}

#[tokio::test]
async fn zero_matches_is_a_valid_result_distinct_from_unauthorized() {
    let store = Arc::new(MemoryStore::new());
    seed_records(&store);
    let service = service(&store);

    service.handle_authenticate("42", "batman").await;
    let reply = service.handle_lookup("42", "mallory").await;
    assert_eq!(reply, LookupReply::Matches { matches: vec![] });
}

#[tokio::test]
async fn store_rate_limit_during_lookup_surfaces_as_try_again() {
    let store = Arc::new(MemoryStore::new());
    seed_records(&store);
    let service = service(&store);

    service.handle_authenticate("42", "batman").await;
    store.fail_next_fetch(StoreError::RateLimited);

    // Role resolution is served from the cache; the record scan hits the
    // injected failure.
    let reply = service.handle_lookup("42", "alice").await;
    assert_eq!(reply, LookupReply::StoreRateLimited);
}

#[tokio::test]
async fn opaque_store_failure_surfaces_as_unavailable() {
    let store = Arc::new(MemoryStore::new());
    seed_records(&store);
    let service = service(&store);

    service.handle_authenticate("42", "batman").await;
    store.fail_next_fetch(StoreError::transient("backend exploded"));

    let reply = service.handle_lookup("42", "alice").await;
    assert_eq!(reply, LookupReply::StoreUnavailable);
}

#[tokio::test]
async fn preload_then_lookup_uses_only_the_record_read() {
    let store = Arc::new(MemoryStore::new());
    seed_records(&store);
    store.seed_table(
        AUTH_TABLE,
        &["user_id", "role", "last_login"],
        &[&["42", "user", "2026-07-01 09:00:00"]],
    );
    let service = service(&store);

    let loaded = service.preload().await.expect("preload should succeed");
    assert_eq!(loaded, 1);
    let auth_fetches = store.fetch_count(AUTH_TABLE);

    let reply = service.handle_lookup("42", "42").await;
    assert!(matches!(reply, LookupReply::Matches { .. }));
    assert_eq!(
        store.fetch_count(AUTH_TABLE),
        auth_fetches,
        "a warm identity must resolve without an auth-table read"
    );
    assert_eq!(store.fetch_count(RECORDS_TABLE), 1);
}
