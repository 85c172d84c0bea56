//! HTTP transport types for the host-does-IO pattern.
//!
//! # Design
//! Requests and responses are plain data. The client builds an `HttpRequest`
//! and classifies an `HttpResponse` without touching the network. Whoever
//! performs the round-trip either drives `build_fetch_request` /
//! `apply_fetch_response` by hand or plugs a `Transport` into the client.
//!
//! All fields use owned types so values can be moved across threads and
//! `spawn_blocking` boundaries freely.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BoxedError;

/// HTTP method for a request. The toggle endpoint only ever uses `GET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
        }
    }
}

/// An HTTP request described as plain data.
///
/// When `no_cache` is set the transport must not answer from, or store into,
/// any intermediary HTTP cache. The client does its own ETag bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub no_cache: bool,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response described as plain data, body already read in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// Case-insensitive header lookup; the first matching header wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Performs one HTTP round-trip.
///
/// Implementations return non-2xx statuses as data; only failures that
/// prevent a response from being received (connect errors, broken bodies)
/// should come back as `Err`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, BoxedError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, BoxedError> {
        (**self).execute(request).await
    }
}
