//! Feature-toggle client core.
//!
//! # Overview
//! Polls a remote toggle service with conditional GETs and answers
//! "is this feature enabled" from the last snapshot it fetched. The network
//! round-trip is delegated to a `Transport`, so the core never opens a
//! socket itself.
//!
//! # Design
//! - `ToggleClient` keeps the ETag and the toggle snapshot and replaces them
//!   together, only when a fresh 2xx body parses.
//! - Each fetch is split into `build_fetch_request` and
//!   `apply_fetch_response`, so hosts can also do the I/O themselves.
//! - The evaluation context travels as query parameters built by
//!   `context::build_request_url`.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod types;

pub use client::ToggleClient;
pub use config::ClientConfig;
pub use context::{build_request_url, query_pairs, EvaluationContext, MutableContext};
pub use error::{BoxedError, ClientError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use types::{FetchStatus, Toggle, ToggleEvent, TogglesResponse};
