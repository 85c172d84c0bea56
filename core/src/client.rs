//! The toggle synchronization state machine.
//!
//! # Design
//! `ToggleClient` owns the validated configuration, the last ETag the server
//! handed out, and the last toggle snapshot. A fetch is split the same way
//! every request in this crate is: `build_fetch_request` produces an
//! `HttpRequest`, `apply_fetch_response` classifies an `HttpResponse` and
//! updates state. `fetch_toggles` glues the two together around a
//! `Transport` call. Hosts that do their own I/O can construct the client
//! with `()` as the transport and drive the two halves directly.
//!
//! The ETag and the snapshot only ever change together, inside
//! `apply_fetch_response`, after the body has parsed. A 304 or any failure
//! leaves both as they were, so reads keep serving the last good snapshot.
//!
//! `fetch_toggles` takes `&mut self`, so one instance can never have two
//! fetches in flight.

use std::fmt;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::{ClientConfig, REDACTED};
use crate::context::{build_request_url, EvaluationContext};
use crate::error::ClientError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::types::{FetchStatus, Toggle, ToggleEvent, TogglesResponse};

const EVENT_CAPACITY: usize = 16;

pub struct ToggleClient<T> {
    transport: T,
    url: Url,
    client_key: String,
    context: EvaluationContext,
    etag: String,
    toggles: Option<Vec<Toggle>>,
    events: broadcast::Sender<ToggleEvent>,
}

impl<T> fmt::Debug for ToggleClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToggleClient")
            .field("url", &self.url.as_str())
            .field("client_key", &REDACTED)
            .field("context", &self.context)
            .field("etag", &self.etag)
            .field("toggles", &self.toggles)
            .finish_non_exhaustive()
    }
}

impl<T> ToggleClient<T> {
    /// Validates `config` and builds a client with no snapshot yet.
    pub fn new(config: ClientConfig, transport: T) -> Result<Self, ClientError> {
        let validated = config.to_validated()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            transport,
            url: validated.url,
            client_key: validated.client_key,
            context: validated.context,
            etag: String::new(),
            toggles: None,
            events,
        })
    }

    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }

    /// The validator from the last fresh response; empty if there was none.
    pub fn etag(&self) -> &str {
        &self.etag
    }

    /// Receives a `ToggleEvent::Updated` after every fetch that replaced the
    /// snapshot. Lagging receivers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<ToggleEvent> {
        self.events.subscribe()
    }

    pub fn build_fetch_request(&self) -> HttpRequest {
        let mut headers = vec![
            ("Authorization".to_string(), self.client_key.clone()),
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if !self.etag.is_empty() {
            headers.push(("If-None-Match".to_string(), self.etag.clone()));
        }

        HttpRequest {
            method: HttpMethod::Get,
            url: build_request_url(&self.url, &self.context).into(),
            headers,
            no_cache: true,
        }
    }

    /// Classify a response to the request from `build_fetch_request`.
    ///
    /// 304 is checked before the 2xx range. Only a 2xx body that parses
    /// replaces the snapshot and the ETag.
    pub fn apply_fetch_response(&mut self, response: HttpResponse) -> Result<FetchStatus, ClientError> {
        if response.status == 304 {
            debug!(etag = %self.etag, "toggles not modified");
            return Ok(FetchStatus::Unchanged);
        }

        if !response.is_success() {
            warn!(status = response.status, "toggle fetch failed");
            return Err(ClientError::Http {
                status: response.status,
                body: response.body,
            });
        }

        let payload: TogglesResponse = serde_json::from_str(&response.body).map_err(|e| {
            warn!(error = %e, "toggle payload did not parse");
            ClientError::DeserializationError(e.to_string())
        })?;
        let etag = response.header("ETag").unwrap_or_default().to_string();

        debug!(count = payload.toggles.len(), etag = %etag, "toggles updated");
        self.etag = etag;
        self.publish(&payload.toggles);
        self.toggles = Some(payload.toggles);

        Ok(FetchStatus::Updated)
    }

    pub fn get_toggles(&self) -> Result<&[Toggle], ClientError> {
        self.toggles.as_deref().ok_or(ClientError::NotReady)
    }

    /// Unknown names are disabled. With duplicate names the first entry wins.
    pub fn is_enabled(&self, name: &str) -> Result<bool, ClientError> {
        let toggles = self.get_toggles()?;
        Ok(toggles
            .iter()
            .find(|toggle| toggle.name == name)
            .is_some_and(|toggle| toggle.enabled))
    }

    fn publish(&self, toggles: &[Toggle]) {
        if self.events.receiver_count() == 0 {
            trace!("no update subscribers");
            return;
        }
        // Err here only means every receiver was dropped in the meantime.
        let _ = self.events.send(ToggleEvent::Updated(toggles.to_vec()));
    }
}

impl<T: Transport> ToggleClient<T> {
    /// Performs one conditional GET and applies the result.
    ///
    /// No retries; wrap this call for retry or deadline policy.
    pub async fn fetch_toggles(&mut self) -> Result<FetchStatus, ClientError> {
        let request = self.build_fetch_request();
        debug!(method = request.method.as_str(), url = %request.url, conditional = !self.etag.is_empty(), "fetching toggles");

        let response = self.transport.execute(request).await.map_err(|e| {
            warn!(error = %e, "toggle transport failed");
            ClientError::Transport(e)
        })?;

        self.apply_fetch_response(response)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::context::MutableContext;
    use crate::error::BoxedError;

    /// Replays queued responses and records every request it sees.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, String>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn push(&self, response: HttpResponse) {
            self.responses.lock().unwrap().push_back(Ok(response));
        }

        fn push_error(&self, message: &str) {
            self.responses.lock().unwrap().push_back(Err(message.to_string()));
        }

        fn last_request(&self) -> HttpRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, BoxedError> {
            self.requests.lock().unwrap().push(request);
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(message.into()),
                None => Err("no scripted response".into()),
            }
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new("https://example.com", "not-a-client-key", "tester").with_context(MutableContext {
            user_id: Some("user-id".to_string()),
            ..MutableContext::default()
        })
    }

    fn client() -> (ToggleClient<Arc<ScriptedTransport>>, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::default());
        let client = ToggleClient::new(config(), Arc::clone(&transport)).unwrap();
        (client, transport)
    }

    fn ok(body: &str, etag: Option<&str>) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: etag
                .map(|e| vec![("ETag".to_string(), e.to_string())])
                .unwrap_or_default(),
            body: body.to_string(),
        }
    }

    fn status(code: u16) -> HttpResponse {
        HttpResponse {
            status: code,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    const FEATURE_1: &str = r#"{"toggles":[{"name":"feature-1","enabled":true}]}"#;

    #[test]
    fn construction_rejects_missing_fields() {
        for (cfg, field) in [
            (ClientConfig { url: String::new(), ..config() }, "url"),
            (ClientConfig { client_key: String::new(), ..config() }, "clientKey"),
            (ClientConfig { app_name: String::new(), ..config() }, "appName"),
        ] {
            match ToggleClient::new(cfg, ()) {
                Err(ClientError::MissingField(name)) => assert_eq!(name, field),
                other => panic!("expected MissingField({field}), got {other:?}"),
            }
        }
    }

    #[test]
    fn first_request_has_no_validator() {
        let (client, _) = client();
        let req = client.build_fetch_request();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "https://example.com/?appName=tester&userId=user-id");
        assert!(req.no_cache);
        assert_eq!(
            req.headers,
            vec![
                ("Authorization".to_string(), "not-a-client-key".to_string()),
                ("Accept".to_string(), "application/json".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ]
        );
    }

    #[test]
    fn reads_before_first_fetch_are_not_ready() {
        let (client, _) = client();
        assert!(matches!(client.get_toggles(), Err(ClientError::NotReady)));
        assert!(matches!(client.is_enabled("anything"), Err(ClientError::NotReady)));
    }

    #[tokio::test]
    async fn fresh_response_stores_toggles() {
        let (mut client, transport) = client();
        transport.push(ok(FEATURE_1, Some("\"123123\"")));

        let status = client.fetch_toggles().await.unwrap();
        assert_eq!(status, FetchStatus::Updated);
        assert_eq!(client.get_toggles().unwrap(), [Toggle::new("feature-1", true)]);
        assert_eq!(client.etag(), "\"123123\"");
    }

    #[tokio::test]
    async fn validator_is_sent_back_and_304_keeps_snapshot() {
        let (mut client, transport) = client();
        transport.push(ok(FEATURE_1, Some("E1")));
        client.fetch_toggles().await.unwrap();
        let before = client.get_toggles().unwrap().to_vec();

        transport.push(HttpResponse {
            status: 304,
            headers: vec![("ETag".to_string(), "E2".to_string())],
            body: String::new(),
        });
        let status = client.fetch_toggles().await.unwrap();

        assert_eq!(status, FetchStatus::Unchanged);
        assert_eq!(transport.last_request().header("If-None-Match"), Some("E1"));
        assert_eq!(client.get_toggles().unwrap(), before.as_slice());
        assert_eq!(client.etag(), "E1");
    }

    #[tokio::test]
    async fn repeated_reads_are_equal() {
        let (mut client, transport) = client();
        transport.push(ok(FEATURE_1, Some("E1")));
        client.fetch_toggles().await.unwrap();

        let first = client.get_toggles().unwrap().to_vec();
        let second = client.get_toggles().unwrap().to_vec();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn server_error_keeps_previous_state() {
        let (mut client, transport) = client();
        transport.push(ok(FEATURE_1, Some("E1")));
        client.fetch_toggles().await.unwrap();

        transport.push(HttpResponse {
            status: 500,
            headers: Vec::new(),
            body: "internal error".to_string(),
        });
        let err = client.fetch_toggles().await.unwrap_err();

        assert!(matches!(err, ClientError::Http { status: 500, .. }));
        assert!(err.is_fetch_error());
        assert_eq!(client.get_toggles().unwrap(), [Toggle::new("feature-1", true)]);
        assert_eq!(client.etag(), "E1");
    }

    #[tokio::test]
    async fn server_error_before_first_fetch_leaves_snapshot_absent() {
        let (mut client, transport) = client();
        transport.push(status(500));

        assert!(client.fetch_toggles().await.is_err());
        assert!(matches!(client.get_toggles(), Err(ClientError::NotReady)));
        assert_eq!(client.etag(), "");
    }

    #[tokio::test]
    async fn transport_failure_is_a_fetch_error() {
        let (mut client, transport) = client();
        transport.push_error("connection refused");

        let err = client.fetch_toggles().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert!(err.is_fetch_error());
        assert!(matches!(client.get_toggles(), Err(ClientError::NotReady)));
    }

    #[tokio::test]
    async fn malformed_body_changes_nothing() {
        let (mut client, transport) = client();
        transport.push(ok(FEATURE_1, Some("E1")));
        client.fetch_toggles().await.unwrap();

        transport.push(ok("not json", Some("E2")));
        let err = client.fetch_toggles().await.unwrap_err();

        assert!(matches!(err, ClientError::DeserializationError(_)));
        assert_eq!(client.etag(), "E1");
        assert_eq!(client.get_toggles().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_etag_clears_validator() {
        let (mut client, transport) = client();
        transport.push(ok(FEATURE_1, Some("E1")));
        client.fetch_toggles().await.unwrap();

        transport.push(ok(r#"{"toggles":[]}"#, None));
        assert_eq!(client.fetch_toggles().await.unwrap(), FetchStatus::Updated);
        assert_eq!(client.etag(), "");
        assert!(client.get_toggles().unwrap().is_empty());
        assert!(client.build_fetch_request().header("If-None-Match").is_none());
    }

    #[tokio::test]
    async fn snapshot_is_replaced_not_merged() {
        let (mut client, transport) = client();
        transport.push(ok(FEATURE_1, Some("E1")));
        client.fetch_toggles().await.unwrap();

        transport.push(ok(r#"{"toggles":[{"name":"feature-2","enabled":false}]}"#, Some("E2")));
        client.fetch_toggles().await.unwrap();

        assert_eq!(client.get_toggles().unwrap(), [Toggle::new("feature-2", false)]);
        assert!(!client.is_enabled("feature-1").unwrap());
    }

    #[test]
    fn is_enabled_lookup_rules() {
        let mut client = ToggleClient::new(config(), ()).unwrap();
        let body = r#"{"toggles":[
            {"name":"dup","enabled":true},
            {"name":"dup","enabled":false},
            {"name":"off","enabled":false}
        ]}"#;
        client.apply_fetch_response(ok(body, Some("E1"))).unwrap();

        assert!(client.is_enabled("dup").unwrap());
        assert!(!client.is_enabled("off").unwrap());
        assert!(!client.is_enabled("nonexistent").unwrap());
        assert!(!client.is_enabled("DUP").unwrap());
    }

    #[test]
    fn not_modified_on_fresh_client_is_unchanged() {
        let mut client = ToggleClient::new(config(), ()).unwrap();
        assert_eq!(client.apply_fetch_response(status(304)).unwrap(), FetchStatus::Unchanged);
        assert!(matches!(client.get_toggles(), Err(ClientError::NotReady)));
    }

    #[test]
    fn other_success_codes_update() {
        let mut client = ToggleClient::new(config(), ()).unwrap();
        let mut response = ok(FEATURE_1, Some("E1"));
        response.status = 203;
        assert_eq!(client.apply_fetch_response(response).unwrap(), FetchStatus::Updated);
    }

    #[test]
    fn redirect_status_is_a_failure() {
        let mut client = ToggleClient::new(config(), ()).unwrap();
        let err = client.apply_fetch_response(status(302)).unwrap_err();
        assert!(matches!(err, ClientError::Http { status: 302, .. }));
    }

    #[tokio::test]
    async fn subscribers_receive_updates_only() {
        let (mut client, transport) = client();
        let mut events = client.subscribe();

        transport.push(ok(FEATURE_1, Some("E1")));
        client.fetch_toggles().await.unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            ToggleEvent::Updated(vec![Toggle::new("feature-1", true)])
        );

        transport.push(status(304));
        client.fetch_toggles().await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn context_properties_reach_the_url() {
        let mut properties = BTreeMap::new();
        properties.insert("x".to_string(), "foo".to_string());
        let cfg = ClientConfig::new("https://example.com/proxy?old=1", "key", "wallet-mobile")
            .with_environment("production")
            .with_context(MutableContext {
                properties: Some(properties),
                ..MutableContext::default()
            });
        let client = ToggleClient::new(cfg, ()).unwrap();

        assert_eq!(
            client.build_fetch_request().url,
            "https://example.com/proxy?appName=wallet-mobile&environment=production&properties%5Bx%5D=foo"
        );
    }

    #[test]
    fn debug_output_hides_client_key() {
        let client = ToggleClient::new(ClientConfig::new("https://example.com", "SECRET-KEY", "tester"), ()).unwrap();
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("SECRET-KEY"), "{rendered}");
        assert!(rendered.contains("https://example.com/"));
    }

    #[test]
    fn any_variant_shape_is_accepted() {
        let mut client = ToggleClient::new(config(), ()).unwrap();
        let body = r#"{"toggles":[
            {"name":"a","enabled":true,"variant":{"enabled":true}},
            {"name":"b","enabled":true,"variant":{"name":"v","payload":{"type":"json","value":{"k":1}}}}
        ]}"#;

        assert_eq!(client.apply_fetch_response(ok(body, Some("E1"))).unwrap(), FetchStatus::Updated);
        assert_eq!(client.get_toggles().unwrap().len(), 2);
        assert!(client.is_enabled("a").unwrap());
    }
}
