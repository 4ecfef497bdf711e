//! Transport-facing adapters for held transactions
//!
//! This crate bridges inbound requests and the held-transaction core:
//! - `dispatch` routes a request's database action onto the held
//!   transaction named by its `X-Transaction-ID` header, or runs it
//!   directly when the header is absent
//! - `TransactionsHandler` maps the four lifecycle operations on the
//!   transactions resource to `Manager` calls
//! - `document` defines the `data`/`errors` wire shapes both of them
//!   produce
//!
//! The hosting HTTP framework stays out of scope: requests are header
//! maps plus body bytes, responses are a status code plus a document.

mod dispatch;
mod document;
mod handlers;
mod request;

pub use dispatch::{TRANSACTION_HEADER, dispatch, error_response, status_for};
pub use document::{
    Document, DocumentData, ErrorMeta, ErrorObject, RESOURCE_TYPE, Resource,
    TransactionAttributes,
};
pub use handlers::TransactionsHandler;
pub use request::{ApiRequest, ApiResponse};
