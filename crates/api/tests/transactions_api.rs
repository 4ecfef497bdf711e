//! End-to-end tests for the transactions endpoints and the dispatcher

use holdtx_api::{ApiRequest, DocumentData, TRANSACTION_HEADER, TransactionsHandler, dispatch};
use holdtx_core::{HoldConfig, ManualClock, Manager};
use holdtx_db::{Connection as _, Database as _, MemoryDb};
use serde_json::{Value, json};
use std::sync::Arc;

struct Harness {
    db: Arc<MemoryDb>,
    clock: Arc<ManualClock>,
    manager: Arc<Manager>,
    handler: TransactionsHandler,
}

fn setup(config: HoldConfig) -> Harness {
    let db = Arc::new(MemoryDb::new());
    let clock = Arc::new(ManualClock::starting_now());
    let manager =
        Arc::new(Manager::with_clock(db.clone(), config, clock.clone()).unwrap());
    let handler = TransactionsHandler::new(manager.clone());
    Harness {
        db,
        clock,
        manager,
        handler,
    }
}

fn create_body(timeout_seconds: Option<u64>) -> Vec<u8> {
    let attributes = match timeout_seconds {
        Some(secs) => json!({"timeout_seconds": secs}),
        None => json!({}),
    };
    serde_json::to_vec(&json!({
        "data": {"type": "transactions", "attributes": attributes}
    }))
    .unwrap()
}

fn update_body(id: &str, state: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "data": {"type": "transactions", "id": id, "attributes": {"state": state}}
    }))
    .unwrap()
}

fn created_id(response: &holdtx_api::ApiResponse) -> String {
    match response.document.data.as_ref().unwrap() {
        DocumentData::One(resource) => resource.id.clone(),
        DocumentData::Many(_) => panic!("expected a single resource"),
    }
}

#[tokio::test]
async fn create_show_update_commit_flow() {
    let h = setup(HoldConfig::new());

    let created = h
        .handler
        .create(&ApiRequest::empty().with_body(create_body(None)))
        .await;
    assert_eq!(created.status, 201);
    let id = created_id(&created);

    let wire = serde_json::to_value(&created.document).unwrap();
    assert_eq!(wire["data"]["type"], json!("transactions"));
    assert_eq!(wire["data"]["attributes"]["state"], json!("open"));
    assert_eq!(wire["data"]["attributes"]["timeout_seconds"], json!(30));

    let shown = h.handler.show(&id).await;
    assert_eq!(shown.status, 200);

    // Write through the dispatcher on the held transaction, then commit.
    let request = ApiRequest::empty().with_header(TRANSACTION_HEADER, id.clone());
    dispatch(&h.manager, h.db.as_ref(), &request, |conn| {
        conn.put("records/a", json!({"name": "A"}))?;
        Ok(Value::Null)
    })
    .await
    .unwrap();
    let outside = h.db.acquire().unwrap();
    assert_eq!(outside.get("records/a").unwrap(), None);

    let updated = h
        .handler
        .update(&id, &ApiRequest::empty().with_body(update_body(&id, "committed")))
        .await;
    assert_eq!(updated.status, 200);
    let wire = serde_json::to_value(&updated.document).unwrap();
    assert_eq!(wire["data"]["attributes"]["state"], json!("committed"));
    assert_eq!(
        outside.get("records/a").unwrap(),
        Some(json!({"name": "A"}))
    );

    // The entry is gone: show 404, a second update 404.
    assert_eq!(h.handler.show(&id).await.status, 404);
    let again = h
        .handler
        .update(&id, &ApiRequest::empty().with_body(update_body(&id, "rolled_back")))
        .await;
    assert_eq!(again.status, 404);
}

#[tokio::test]
async fn create_clamps_the_requested_timeout() {
    let h = setup(
        HoldConfig::new()
            .with_default_timeout_secs(15)
            .with_max_timeout_secs(60),
    );

    let clamped = h
        .handler
        .create(&ApiRequest::empty().with_body(create_body(Some(500))))
        .await;
    let wire = serde_json::to_value(&clamped.document).unwrap();
    assert_eq!(wire["data"]["attributes"]["timeout_seconds"], json!(60));

    let defaulted = h
        .handler
        .create(&ApiRequest::empty().with_body(create_body(None)))
        .await;
    let wire = serde_json::to_value(&defaulted.document).unwrap();
    assert_eq!(wire["data"]["attributes"]["timeout_seconds"], json!(15));

    h.manager.shutdown().await;
}

#[tokio::test]
async fn list_returns_only_open_transactions() {
    let h = setup(HoldConfig::new());

    let first = created_id(
        &h.handler
            .create(&ApiRequest::empty().with_body(create_body(None)))
            .await,
    );
    let second = created_id(
        &h.handler
            .create(&ApiRequest::empty().with_body(create_body(None)))
            .await,
    );
    h.handler
        .update(&first, &ApiRequest::empty().with_body(update_body(&first, "rolled_back")))
        .await;

    let listed = h.handler.list().await;
    assert_eq!(listed.status, 200);
    match listed.document.data.as_ref().unwrap() {
        DocumentData::Many(resources) => {
            assert_eq!(resources.len(), 1);
            assert_eq!(resources[0].id, second);
        }
        DocumentData::One(_) => panic!("expected a collection"),
    }

    h.manager.shutdown().await;
}

#[tokio::test]
async fn update_rejects_unknown_target_states() {
    let h = setup(HoldConfig::new());
    let id = created_id(
        &h.handler
            .create(&ApiRequest::empty().with_body(create_body(None)))
            .await,
    );

    let rejected = h
        .handler
        .update(&id, &ApiRequest::empty().with_body(update_body(&id, "foo")))
        .await;
    assert_eq!(rejected.status, 422);
    let wire = serde_json::to_value(&rejected.document).unwrap();
    let detail = wire["errors"][0]["detail"].as_str().unwrap();
    assert!(detail.contains("\"foo\""), "detail must name the value: {detail}");

    // The transaction is untouched.
    assert_eq!(h.handler.show(&id).await.status, 200);
    h.manager.shutdown().await;
}

#[tokio::test]
async fn malformed_bodies_are_rejected() {
    let h = setup(HoldConfig::new());

    let garbled = h
        .handler
        .create(&ApiRequest::empty().with_body(b"{not json".to_vec()))
        .await;
    assert_eq!(garbled.status, 422);

    let wrong_type = h
        .handler
        .create(&ApiRequest::empty().with_body(
            serde_json::to_vec(&json!({"data": {"type": "widgets", "attributes": {}}})).unwrap(),
        ))
        .await;
    assert_eq!(wrong_type.status, 422);
}

#[tokio::test]
async fn create_reports_the_concurrency_limit() {
    let h = setup(HoldConfig::new().with_max_concurrent(1));

    h.handler
        .create(&ApiRequest::empty().with_body(create_body(None)))
        .await;
    let refused = h
        .handler
        .create(&ApiRequest::empty().with_body(create_body(None)))
        .await;
    assert_eq!(refused.status, 429);
    let wire = serde_json::to_value(&refused.document).unwrap();
    assert_eq!(wire["errors"][0]["status"], json!("429"));
    assert!(wire.get("meta").is_none());

    h.manager.shutdown().await;
}

#[tokio::test]
async fn dispatch_without_header_runs_directly() {
    let h = setup(HoldConfig::new());

    let value = dispatch(&h.manager, h.db.as_ref(), &ApiRequest::empty(), |conn| {
        conn.put("records/direct", json!(1))?;
        Ok(json!("done"))
    })
    .await
    .unwrap();
    assert_eq!(value, json!("done"));

    // No held transaction involved: the write is immediately durable.
    let check = h.db.acquire().unwrap();
    assert_eq!(check.get("records/direct").unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn dispatch_with_unknown_id_is_not_found() {
    let h = setup(HoldConfig::new());

    let request = ApiRequest::empty().with_header(TRANSACTION_HEADER, "missing");
    let response = dispatch(&h.manager, h.db.as_ref(), &request, |_| Ok(Value::Null))
        .await
        .unwrap_err();
    assert_eq!(response.status, 404);
    assert!(response.document.meta.is_none());
}

#[tokio::test]
async fn dispatch_on_expired_transaction_is_gone() {
    let h = setup(HoldConfig::new());
    let txn = h.manager.create(Some(1)).await.unwrap();
    h.clock.advance_secs(2);

    let request = ApiRequest::empty().with_header(TRANSACTION_HEADER, txn.id());
    let response = dispatch(&h.manager, h.db.as_ref(), &request, |_| Ok(Value::Null))
        .await
        .unwrap_err();
    assert_eq!(response.status, 410);
    let meta = response.document.meta.as_ref().unwrap();
    assert_eq!(meta.transaction_id, txn.id());
    assert!(meta.transaction_rolled_back);

    h.manager.shutdown().await;
}

#[tokio::test]
async fn dispatch_surfaces_validation_failures_with_live_meta() {
    let h = setup(HoldConfig::new());
    let txn = h.manager.create(None).await.unwrap();

    let request = ApiRequest::empty().with_header(TRANSACTION_HEADER, txn.id());
    let response = dispatch(&h.manager, h.db.as_ref(), &request, |conn| {
        conn.put_unique("", json!(1))?;
        Ok(Value::Null)
    })
    .await
    .unwrap_err();

    // Savepoint rolled back cleanly: 422, transaction still alive.
    assert_eq!(response.status, 422);
    let meta = response.document.meta.as_ref().unwrap();
    assert_eq!(meta.transaction_id, txn.id());
    assert!(!meta.transaction_rolled_back);
    assert!(txn.is_open());

    h.manager.shutdown().await;
}

#[tokio::test]
async fn dispatch_reports_fatal_failures_as_server_errors() {
    let h = setup(HoldConfig::new());
    let txn = h.manager.create(None).await.unwrap();

    h.db.break_connections();
    let request = ApiRequest::empty().with_header(TRANSACTION_HEADER, txn.id());
    let response = dispatch(&h.manager, h.db.as_ref(), &request, |conn| {
        conn.get("k").map(|v| json!(v))
    })
    .await
    .unwrap_err();

    assert_eq!(response.status, 500);
    let meta = response.document.meta.as_ref().unwrap();
    assert!(meta.transaction_rolled_back);
    h.db.restore_connections();

    h.manager.shutdown().await;
}
