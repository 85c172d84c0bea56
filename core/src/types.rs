//! Wire DTOs for the toggle endpoint plus the client's outcome types.
//!
//! # Design
//! These mirror the mock-server's schema but are defined independently, so
//! the integration tests catch schema drift between the two crates.

use serde::{Deserialize, Serialize};

/// A named feature flag as delivered by the toggle service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Toggle {
    pub name: String,
    pub enabled: bool,
    /// The variant the service selected for this context, kept verbatim.
    /// The client does no targeting of its own, so any JSON shape is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impression_data: Option<bool>,
}

impl Toggle {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
            variant: None,
            impression_data: None,
        }
    }
}

/// Body of a 2xx response from the toggle endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TogglesResponse {
    pub toggles: Vec<Toggle>,
}

/// Outcome of a successful `fetch_toggles` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Fresh data arrived; snapshot and validator were replaced.
    Updated,
    /// The server answered 304; nothing changed.
    Unchanged,
}

/// Published to subscribers after each `Updated` transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleEvent {
    Updated(Vec<Toggle>),
}
