//! Transaction-aware request dispatch
//!
//! When an inbound request carries the correlation header, its database
//! action is submitted onto the matching held transaction instead of
//! running on the request's own connection.

use crate::document::Document;
use crate::request::{ApiRequest, ApiResponse};
use holdtx_core::{HoldError, Manager};
use holdtx_db::{Connection, Database, DbError, autocommit};
use serde_json::Value;

/// Header associating a request with a held transaction.
pub const TRANSACTION_HEADER: &str = "X-Transaction-ID";

/// HTTP status for a held-transaction error.
pub fn status_for(err: &HoldError) -> u16 {
    match err {
        HoldError::NotFound(_) => 404,
        HoldError::Expired(_) => 410,
        HoldError::ConcurrencyLimit(_) => 429,
        HoldError::Operation { cause, .. } => {
            if cause.is_validation() {
                422
            } else {
                500
            }
        }
        HoldError::InvalidStateTransition(_) => 422,
        HoldError::Internal(_) => 500,
    }
}

/// Render a held-transaction error as a structured response.
///
/// `transaction_id` is the id of the held transaction the error concerns,
/// when one is known; only then is the `meta` block attached.
pub fn error_response(err: &HoldError, transaction_id: Option<&str>) -> ApiResponse {
    let status = status_for(err);
    let mut document = Document::error(status, err.to_string());
    match err {
        HoldError::Expired(id) => {
            document = document.with_meta(id.clone(), true);
        }
        HoldError::Operation {
            transaction_rolled_back,
            ..
        } => {
            if let Some(id) = transaction_id {
                document = document.with_meta(id, *transaction_rolled_back);
            }
        }
        _ => {}
    }
    ApiResponse { status, document }
}

/// Run `action` for `request`.
///
/// Without the correlation header the action runs directly, in its own
/// short transaction. With it, the action is submitted to the named held
/// transaction and executes on that transaction's pinned connection.
/// Errors come back as fully rendered responses.
pub async fn dispatch<F>(
    manager: &Manager,
    db: &dyn Database,
    request: &ApiRequest,
    action: F,
) -> Result<Value, ApiResponse>
where
    F: FnOnce(&mut dyn Connection) -> Result<Value, DbError> + Send + 'static,
{
    match request.header(TRANSACTION_HEADER) {
        None => autocommit(db, action).map_err(|cause| {
            let err = HoldError::Operation {
                cause,
                transaction_rolled_back: false,
            };
            error_response(&err, None)
        }),
        Some(id) => {
            let id = id.to_string();
            let result = match manager.find(&id) {
                Ok(txn) => txn.submit(action).await,
                Err(err) => Err(err),
            };
            result.map_err(|err| {
                tracing::debug!("transactional request on {id} failed: {err}");
                error_response(&err, Some(&id))
            })
        }
    }
}
