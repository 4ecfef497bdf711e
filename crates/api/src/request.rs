//! Request and response envelopes
//!
//! The host framework hands the dispatcher a header map and body bytes;
//! everything else about the framework is its own business.

use crate::document::Document;
use std::collections::HashMap;

/// An inbound request as this crate sees it.
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ApiRequest {
    pub fn new(body: Vec<u8>, headers: HashMap<String, String>) -> Self {
        Self { headers, body }
    }

    /// A request with no headers and no body.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Header lookup, case-insensitive in the name as HTTP requires.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An outbound response: HTTP status plus the wire document.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub document: Document,
}

impl ApiResponse {
    pub fn ok(document: Document) -> Self {
        Self {
            status: 200,
            document,
        }
    }

    pub fn created(document: Document) -> Self {
        Self {
            status: 201,
            document,
        }
    }
}
