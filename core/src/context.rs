//! Evaluation context and its query-string serialization.
//!
//! The toggle service evaluates flags server-side, so every field of the
//! context travels as a query parameter on the fetch URL. Properties are
//! namespaced as `properties[<key>]`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

/// Per-user fields supplied by the caller at construction.
///
/// Property entries whose JSON value is `null` are dropped on deserialize,
/// so they never reach the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutableContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "properties_without_nulls")]
    pub properties: Option<BTreeMap<String, String>>,
}

/// Static config merged with the caller's `MutableContext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    pub app_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "properties_without_nulls")]
    pub properties: Option<BTreeMap<String, String>>,
}

impl EvaluationContext {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            environment: None,
            user_id: None,
            session_id: None,
            properties: None,
        }
    }

    pub fn merge(app_name: &str, environment: Option<&str>, mutable: Option<&MutableContext>) -> Self {
        let mutable = mutable.cloned().unwrap_or_default();
        Self {
            app_name: app_name.to_string(),
            environment: environment.map(str::to_string),
            user_id: mutable.user_id,
            session_id: mutable.session_id,
            properties: mutable.properties,
        }
    }
}

fn properties_without_nulls<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Option<String>>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|properties| {
        properties
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect()
    }))
}

/// Ordered, unencoded query parameters for `context`.
///
/// Scalars come first in declaration order, then properties sorted by key.
pub fn query_pairs(context: &EvaluationContext) -> Vec<(String, String)> {
    let scalars = [
        ("appName", Some(&context.app_name)),
        ("environment", context.environment.as_ref()),
        ("userId", context.user_id.as_ref()),
        ("sessionId", context.session_id.as_ref()),
    ];

    let mut pairs: Vec<(String, String)> = scalars
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v.clone())))
        .collect();

    if let Some(properties) = &context.properties {
        pairs.extend(
            properties
                .iter()
                .map(|(key, value)| (format!("properties[{key}]"), value.clone())),
        );
    }

    pairs
}

/// Returns a copy of `base` whose query is replaced by the serialized context.
pub fn build_request_url(base: &Url, context: &EvaluationContext) -> Url {
    let mut url = base.clone();
    url.set_query(None);

    let pairs = query_pairs(context);
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    url
}
