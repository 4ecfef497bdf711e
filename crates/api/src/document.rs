//! Wire document shapes
//!
//! Every response carries a top-level `data` or `errors` field; errors
//! tied to a known held transaction additionally carry a `meta` block so
//! the caller can tell "savepoint rolled back, transaction alive" from
//! "transaction gone".

use chrono::{DateTime, Utc};
use holdtx_core::{TransactionState, TransactionView};
use serde::{Deserialize, Serialize};

/// Resource type of held transactions on the wire.
pub const RESOURCE_TYPE: &str = "transactions";

/// Attributes of a transaction resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionAttributes {
    pub state: TransactionState,
    pub timeout_seconds: u64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A single resource object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributes: TransactionAttributes,
}

impl From<TransactionView> for Resource {
    fn from(view: TransactionView) -> Self {
        Self {
            kind: RESOURCE_TYPE.to_string(),
            id: view.id,
            attributes: TransactionAttributes {
                state: view.state,
                timeout_seconds: view.timeout_seconds,
                expires_at: view.expires_at,
                created_at: view.created_at,
            },
        }
    }
}

/// Primary data: one resource or a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentData {
    One(Resource),
    Many(Vec<Resource>),
}

/// One error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// HTTP status code, as a string.
    pub status: String,
    pub detail: String,
}

/// Transaction metadata attached to transaction-related errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMeta {
    pub transaction_id: String,
    pub transaction_rolled_back: bool,
}

/// A top-level wire document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DocumentData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorObject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ErrorMeta>,
}

impl Document {
    /// Document for a single held transaction.
    pub fn resource(view: TransactionView) -> Self {
        Self {
            data: Some(DocumentData::One(view.into())),
            ..Self::default()
        }
    }

    /// Document for a collection of held transactions.
    pub fn collection(views: Vec<TransactionView>) -> Self {
        Self {
            data: Some(DocumentData::Many(
                views.into_iter().map(Resource::from).collect(),
            )),
            ..Self::default()
        }
    }

    /// Document with a single error.
    pub fn error(status: u16, detail: impl Into<String>) -> Self {
        Self {
            errors: Some(vec![ErrorObject {
                status: status.to_string(),
                detail: detail.into(),
            }]),
            ..Self::default()
        }
    }

    pub fn with_meta(mut self, transaction_id: impl Into<String>, rolled_back: bool) -> Self {
        self.meta = Some(ErrorMeta {
            transaction_id: transaction_id.into(),
            transaction_rolled_back: rolled_back,
        });
        self
    }
}
