//! Lifecycle endpoints for the transactions resource
//!
//! A thin adapter from the four resource operations (create, show, list,
//! update) to `Manager` calls. Request and response bodies follow the
//! document shapes in `document`.

use crate::dispatch::error_response;
use crate::document::{Document, RESOURCE_TYPE};
use crate::request::{ApiRequest, ApiResponse};
use holdtx_core::{HoldError, Manager};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct CreateDocument {
    data: CreateResource,
}

#[derive(Debug, Deserialize)]
struct CreateResource {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: CreateAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct CreateAttributes {
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UpdateDocument {
    data: UpdateResource,
}

#[derive(Debug, Deserialize)]
struct UpdateResource {
    #[serde(rename = "type")]
    kind: String,
    attributes: UpdateAttributes,
}

#[derive(Debug, Deserialize)]
struct UpdateAttributes {
    state: String,
}

/// Handler for the transactions resource.
pub struct TransactionsHandler {
    manager: Arc<Manager>,
}

impl TransactionsHandler {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    /// POST `transactions` — open a new held transaction.
    pub async fn create(&self, request: &ApiRequest) -> ApiResponse {
        let document: CreateDocument = match serde_json::from_slice(&request.body) {
            Ok(document) => document,
            Err(err) => return malformed(format!("malformed transaction document: {err}")),
        };
        if document.data.kind != RESOURCE_TYPE {
            return malformed(format!(
                "unexpected resource type \"{}\": must be \"{RESOURCE_TYPE}\"",
                document.data.kind
            ));
        }

        match self
            .manager
            .create(document.data.attributes.timeout_seconds)
            .await
        {
            Ok(txn) => ApiResponse::created(Document::resource(txn.as_view())),
            Err(err) => error_response(&err, None),
        }
    }

    /// GET `transactions/{id}` — show one held transaction.
    pub async fn show(&self, id: &str) -> ApiResponse {
        match self.manager.find(id) {
            Ok(txn) => ApiResponse::ok(Document::resource(txn.as_view())),
            Err(err) => error_response(&err, None),
        }
    }

    /// GET `transactions` — list the held transactions that are open.
    pub async fn list(&self) -> ApiResponse {
        let views = self
            .manager
            .active_transactions()
            .iter()
            .map(|txn| txn.as_view())
            .collect();
        ApiResponse::ok(Document::collection(views))
    }

    /// PATCH `transactions/{id}` — commit or roll back.
    pub async fn update(&self, id: &str, request: &ApiRequest) -> ApiResponse {
        let document: UpdateDocument = match serde_json::from_slice(&request.body) {
            Ok(document) => document,
            Err(err) => return malformed(format!("malformed transaction document: {err}")),
        };
        if document.data.kind != RESOURCE_TYPE {
            return malformed(format!(
                "unexpected resource type \"{}\": must be \"{RESOURCE_TYPE}\"",
                document.data.kind
            ));
        }

        let result = match document.data.attributes.state.as_str() {
            "committed" => self.manager.commit(id).await,
            "rolled_back" => self.manager.rollback(id).await,
            other => Err(HoldError::InvalidStateTransition(other.to_string())),
        };
        match result {
            Ok(view) => ApiResponse::ok(Document::resource(view)),
            Err(err) => error_response(&err, Some(id)),
        }
    }
}

fn malformed(detail: String) -> ApiResponse {
    ApiResponse {
        status: 422,
        document: Document::error(422, detail),
    }
}
