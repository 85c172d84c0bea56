//! Construction input for `ToggleClient`.
//!
//! `ClientConfig` is plain data and can be deserialized from the same
//! camelCase JSON shape the browser SDKs accept. Validation is eager: a
//! config either yields a parsed base URL and a merged context, or the
//! client is never built.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::context::{EvaluationContext, MutableContext};
use crate::error::ClientError;

pub(crate) const REDACTED: &str = "***";

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub url: String,
    pub client_key: String,
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<MutableContext>,
}

/// A config that passed validation.
#[derive(Clone)]
pub(crate) struct ValidatedConfig {
    pub url: Url,
    pub client_key: String,
    pub context: EvaluationContext,
}

// `client_key` is a bearer credential and never shows up in debug output.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("client_key", &REDACTED)
            .field("app_name", &self.app_name)
            .field("environment", &self.environment)
            .field("context", &self.context)
            .finish()
    }
}

impl fmt::Debug for ValidatedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedConfig")
            .field("url", &self.url.as_str())
            .field("client_key", &REDACTED)
            .field("context", &self.context)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>, client_key: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_key: client_key.into(),
            app_name: app_name.into(),
            environment: None,
            context: None,
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_context(mut self, context: MutableContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Checks required fields in `url`, `clientKey`, `appName` order and
    /// parses the base URL.
    pub fn validate(&self) -> Result<(), ClientError> {
        self.to_validated().map(|_| ())
    }

    pub(crate) fn to_validated(&self) -> Result<ValidatedConfig, ClientError> {
        if self.url.trim().is_empty() {
            return Err(ClientError::MissingField("url"));
        }
        if self.client_key.is_empty() {
            return Err(ClientError::MissingField("clientKey"));
        }
        if self.app_name.is_empty() {
            return Err(ClientError::MissingField("appName"));
        }

        let url = Url::parse(self.url.trim()).map_err(|e| ClientError::InvalidUrl(format!("{}: {e}", self.url)))?;
        if url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(self.url.clone()));
        }

        Ok(ValidatedConfig {
            url,
            client_key: self.client_key.clone(),
            context: EvaluationContext::merge(&self.app_name, self.environment.as_deref(), self.context.as_ref()),
        })
    }
}
