//! Module dispatcher: turns a logical module invocation into upstream HTTP
//! calls with a per-attempt timeout and bounded exponential-backoff retries.
//!
//! The dispatcher holds no mutable state. Any number of invocations may run
//! concurrently against one instance; attempts within a single invocation
//! are strictly sequential. Dropping an invocation future cancels whatever
//! attempt or backoff sleep is in flight.
//!
//! Upstream responses are not inspected beyond the status code. A 200 whose
//! body encodes an application-level error (`{"error": ...}`) is returned as
//! successful `data`; callers must check module-specific error shapes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{ConfigError, DispatchError, TransportError};
use crate::registry::{Endpoint, EndpointRegistry, ModuleEndpointConfig, ModuleName};
use crate::request::{Attributes, ModuleRequest};
use crate::transport::{HttpRequest, HttpResponse, Method, Transport};

/// Default `User-Agent` sent upstream.
pub const DEFAULT_USER_AGENT: &str = "TensAI-Bot/1.0";

/// Caller id used when none is supplied.
pub const UNKNOWN_CALLER: &str = "unknown";

/// Fixed timeout for liveness probes.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Logged request bodies are cut to this many characters.
const MAX_LOGGED_BODY_CHARS: usize = 2_000;

const REQUEST_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Success envelope returned by every dispatcher operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    /// Always `true`; failures are reported as [`DispatchError`].
    pub success: bool,
    /// Parsed upstream JSON, or `{message, rawResponse: true}` for non-JSON bodies.
    pub data: Value,
    pub module: ModuleName,
    /// 1-based attempt on which the call succeeded.
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

impl InvocationResult {
    fn new(module: ModuleName, attempt: u32, body: &str) -> Self {
        Self {
            success: true,
            data: parse_body(body),
            module,
            attempt,
            timestamp: Utc::now(),
        }
    }
}

/// Parse a 2xx body, wrapping non-JSON text instead of failing.
pub fn parse_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| {
        serde_json::json!({
            "message": body,
            "rawResponse": true,
        })
    })
}

/// Identity headers attached to every outgoing request.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub user_agent: String,
    pub api_key: Option<SecretString>,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            api_key: None,
        }
    }
}

/// Routes module invocations to the TensAI API.
pub struct ModuleDispatcher {
    registry: Arc<EndpointRegistry>,
    transport: Arc<dyn Transport>,
    backoff: BackoffPolicy,
    identity: ClientIdentity,
}

impl ModuleDispatcher {
    pub fn new(registry: Arc<EndpointRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            backoff: BackoffPolicy::default(),
            identity: ClientIdentity::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Names of all configured modules.
    pub fn available_modules(&self) -> Vec<ModuleName> {
        self.registry.modules()
    }

    /// Configuration for a module, if it is registered.
    pub fn module_config(&self, module: &str) -> Option<&ModuleEndpointConfig> {
        self.registry.get(module).ok()
    }

    /// Invoke `action` on `module` with retries.
    ///
    /// Unknown modules and undecodable actions fail before any network call.
    pub async fn invoke(
        &self,
        module: &str,
        action: &str,
        attributes: &Attributes,
        caller_id: Option<&str>,
    ) -> Result<InvocationResult, DispatchError> {
        let config = self.registry.get(module)?;
        let request = ModuleRequest::decode(config.module, action, attributes)?;
        self.send_with_retries(config, &request, caller_id).await
    }

    /// Invoke a pre-decoded request with retries.
    pub async fn invoke_request(
        &self,
        module: ModuleName,
        request: &ModuleRequest,
        caller_id: Option<&str>,
    ) -> Result<InvocationResult, DispatchError> {
        let config = self
            .registry
            .config(module)
            .ok_or_else(|| ConfigError::UnknownModule(module.to_string()))?;
        self.send_with_retries(config, request, caller_id).await
    }

    async fn send_with_retries(
        &self,
        config: &ModuleEndpointConfig,
        request: &ModuleRequest,
        caller_id: Option<&str>,
    ) -> Result<InvocationResult, DispatchError> {
        let module = config.module;
        let url = config.url(request.endpoint(config))?;
        let body = request.body()?;
        let caller = caller_tag(caller_id);
        let caller = caller.as_str();
        let max_attempts = config.max_attempts();

        info!(
            module = %module,
            kind = request.kind(),
            method = %config.method,
            url,
            caller,
            "Calling module API"
        );
        debug!(module = %module, body = %pretty_body(&body), "Request body");

        let mut attempt = 1;
        loop {
            let http = self.build_request(config.method, url, Some(body.clone()), config.timeout, caller);
            let request_id = http.header("X-Request-ID").unwrap_or_default().to_string();

            match self.attempt(http).await {
                Ok(resp) => {
                    info!(module = %module, attempt, request_id = %request_id, "Module API response received");
                    return Ok(InvocationResult::new(module, attempt, &resp.body));
                }
                Err(e) => {
                    warn!(
                        module = %module,
                        attempt,
                        max_attempts,
                        request_id = %request_id,
                        error = %e,
                        "Module API attempt failed"
                    );
                    if !e.is_retryable() {
                        return Err(DispatchError::Transport {
                            module: module.to_string(),
                            source: e,
                        });
                    }
                    if attempt >= max_attempts {
                        return Err(DispatchError::Exhausted {
                            module: module.to_string(),
                            attempts: attempt,
                            last: e,
                        });
                    }
                }
            }

            let delay = self.backoff.delay_after(attempt);
            info!(module = %module, delay_ms = delay.as_millis() as u64, "Retrying module API");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Upload files for a module. Single attempt, no retries.
    pub async fn upload_file(
        &self,
        module: &str,
        files: Value,
        feature_type: &str,
    ) -> Result<InvocationResult, DispatchError> {
        let config = self.registry.get(module)?;
        if !config.has(Endpoint::Upload) {
            return Err(ConfigError::UploadNotSupported(config.module.to_string()).into());
        }
        let url = config.url(Endpoint::Upload)?;
        let body = serde_json::json!({
            "files": files,
            "feature_type": feature_type,
        });

        info!(module = %config.module, url, feature_type, "Uploading file");
        debug!(module = %config.module, body = %pretty_body(&body), "Upload request");

        let http = self.build_request(Method::Post, url, Some(body), config.timeout, UNKNOWN_CALLER);
        self.single_attempt(config.module, http).await
    }

    /// Poll an OmniQuest indexing job. Single attempt.
    pub async fn check_omniquest_status(
        &self,
        job_id: &str,
    ) -> Result<InvocationResult, DispatchError> {
        let config = self.require(ModuleName::OmniQuest)?;
        let url = job_status_url(config.url(Endpoint::Status)?, job_id)?;

        info!(module = %config.module, url = %url, "Checking OmniQuest status");

        let mut http = self.build_request(Method::Get, &url, None, config.timeout, UNKNOWN_CALLER);
        http.headers.push(("job_id".to_string(), job_id.to_string()));
        self.single_attempt(config.module, http).await
    }

    /// Poll a Media Studio video generation. Single attempt.
    pub async fn check_video_status(
        &self,
        operation_id: &str,
    ) -> Result<InvocationResult, DispatchError> {
        let config = self.require(ModuleName::MediaStudio)?;
        let url = config.url(Endpoint::VideoStatus)?;
        let body = serde_json::json!({ "operation_id": operation_id });

        info!(module = %config.module, url, "Checking video status");

        let http = self.build_request(Method::Post, url, Some(body), config.timeout, UNKNOWN_CALLER);
        self.single_attempt(config.module, http).await
    }

    /// Best-effort liveness probe against the module's primary endpoint.
    /// Every failure, including an unknown module, reports `false`.
    pub async fn check_health(&self, module: &str) -> bool {
        let url = match self.registry.get(module).and_then(|c| c.primary_url()) {
            Ok(url) => url,
            Err(e) => {
                debug!(module, error = %e, "Health check skipped");
                return false;
            }
        };

        let http = self.build_request(Method::Get, url, None, HEALTH_CHECK_TIMEOUT, UNKNOWN_CALLER);
        match self.attempt(http).await {
            Ok(_) => true,
            Err(e) => {
                info!(module, error = %e, "Health check failed");
                false
            }
        }
    }

    fn require(&self, module: ModuleName) -> Result<&ModuleEndpointConfig, ConfigError> {
        self.registry
            .config(module)
            .ok_or_else(|| ConfigError::UnknownModule(module.to_string()))
    }

    async fn single_attempt(
        &self,
        module: ModuleName,
        http: HttpRequest,
    ) -> Result<InvocationResult, DispatchError> {
        match self.attempt(http).await {
            Ok(resp) => Ok(InvocationResult::new(module, 1, &resp.body)),
            Err(source) => {
                warn!(module = %module, error = %source, "Module API request failed");
                Err(DispatchError::Transport {
                    module: module.to_string(),
                    source,
                })
            }
        }
    }

    /// One exchange, bounded by the request's timeout, non-2xx mapped to an error.
    async fn attempt(&self, http: HttpRequest) -> Result<HttpResponse, TransportError> {
        let timeout = http.timeout;
        match tokio::time::timeout(timeout, self.transport.execute(http)).await {
            Ok(result) => result?.error_for_status(),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    fn build_request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        timeout: Duration,
        caller: &str,
    ) -> HttpRequest {
        let mut headers = vec![
            ("User-Agent".to_string(), self.identity.user_agent.clone()),
            ("X-Request-ID".to_string(), request_id()),
            ("X-Caller-ID".to_string(), caller.to_string()),
        ];
        if let Some(key) = &self.identity.api_key {
            headers.push((
                "Authorization".to_string(),
                format!("Bearer {}", key.expose_secret()),
            ));
        }
        HttpRequest {
            method,
            url: url.to_string(),
            headers,
            body,
            timeout,
        }
    }
}

/// Caller id as sent in `X-Caller-ID`. Control characters cannot appear in
/// a header value and are replaced by spaces; blank ids become
/// [`UNKNOWN_CALLER`].
fn caller_tag(caller_id: Option<&str>) -> String {
    let cleaned: String = caller_id
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    match cleaned.trim() {
        "" => UNKNOWN_CALLER.to_string(),
        tag => tag.to_string(),
    }
}

/// `<status endpoint>/<job id>` with the id encoded as a single path segment.
fn job_status_url(status_url: &str, job_id: &str) -> Result<String, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "OmniQuest status endpoint".to_string(),
        message,
    };
    let mut url = reqwest::Url::parse(status_url).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| invalid(format!("{status_url} cannot take a path")))?
        .pop_if_empty()
        .push(job_id);
    Ok(url.into())
}

/// `req_<unix-millis>_<9 base-36 chars>`.
pub fn request_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| REQUEST_ID_ALPHABET[rng.gen_range(0..REQUEST_ID_ALPHABET.len())] as char)
        .collect();
    format!("req_{}_{}", Utc::now().timestamp_millis(), suffix)
}

fn pretty_body(body: &Value) -> String {
    let pretty = serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string());
    if pretty.chars().count() > MAX_LOGGED_BODY_CHARS {
        let truncated: String = pretty.chars().take(MAX_LOGGED_BODY_CHARS).collect();
        format!("{truncated}...")
    } else {
        pretty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    use crate::registry::{ModuleLimits, ModuleName};

    /// Scripted outcome for one transport call.
    #[derive(Clone, Copy)]
    enum Outcome {
        Respond(u16, &'static str),
        Fail,
        /// The request could not be built.
        Reject,
        Hang,
    }

    /// Records every request and replays scripted outcomes; the last
    /// outcome repeats once the script runs out.
    struct MockTransport {
        script: Mutex<VecDeque<Outcome>>,
        calls: Mutex<Vec<(Instant, HttpRequest)>>,
    }

    impl MockTransport {
        fn new(script: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn always(outcome: Outcome) -> Arc<Self> {
            Self::new(vec![outcome])
        }

        fn calls(&self) -> Vec<HttpRequest> {
            self.calls.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.lock().unwrap().push((Instant::now(), request));
            let outcome = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().copied()
                }
            };
            match outcome {
                Some(Outcome::Respond(status, body)) => Ok(HttpResponse::new(status, body)),
                Some(Outcome::Fail) | None => {
                    Err(TransportError::Network("connection refused".into()))
                }
                Some(Outcome::Reject) => {
                    Err(TransportError::InvalidRequest("builder error".into()))
                }
                Some(Outcome::Hang) => std::future::pending().await,
            }
        }
    }

    fn registry_with_retries(retries: u32) -> Arc<EndpointRegistry> {
        Arc::new(EndpointRegistry::tensai_with_limits("http://tensai.test", |m| {
            ModuleLimits {
                retries,
                ..ModuleLimits::default_for(m)
            }
        }))
    }

    fn dispatcher(transport: Arc<MockTransport>, retries: u32) -> ModuleDispatcher {
        ModuleDispatcher::new(registry_with_retries(retries), transport)
    }

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => Attributes::new(),
        }
    }

    /// Paused-clock timers fire on millisecond ticks.
    fn assert_about(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual - expected < Duration::from_millis(5),
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[tokio::test]
    async fn unknown_module_makes_no_calls() {
        let transport = MockTransport::always(Outcome::Respond(200, "{}"));
        let d = dispatcher(Arc::clone(&transport), 2);

        let err = d
            .invoke("NotAModule", "chat", &Attributes::new(), Some("u1"))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Config(ConfigError::UnknownModule(_))));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhausted_after_three_attempts() {
        let transport = MockTransport::always(Outcome::Fail);
        let d = dispatcher(Arc::clone(&transport), 2);

        let err = d
            .invoke("WebGPT", "chat", &attrs(json!({"query": "hi"})), None)
            .await
            .unwrap_err();

        assert_eq!(transport.calls().len(), 3);
        assert_eq!(err.attempts(), 3);
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"), "got: {msg}");
        assert!(msg.contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let transport = MockTransport::always(Outcome::Fail);
        let d = dispatcher(Arc::clone(&transport), 3)
            .with_backoff(BackoffPolicy::unbounded(Duration::from_secs(1)));

        let _ = d.invoke("WebGPT", "chat", &Attributes::new(), None).await;

        let times = transport.call_times();
        assert_eq!(times.len(), 4);
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 3);
        assert_about(gaps[0], Duration::from_secs(2));
        assert_about(gaps[1], Duration::from_secs(4));
        assert_about(gaps[2], Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_second_attempt() {
        let transport = MockTransport::new(vec![
            Outcome::Respond(500, "boom"),
            Outcome::Respond(200, r#"{"answer": 42}"#),
        ]);
        let d = dispatcher(Arc::clone(&transport), 2);

        let result = d
            .invoke("WebGPT", "chat", &attrs(json!({"query": "hi"})), Some("u1"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.attempt, 2);
        assert_eq!(result.module, ModuleName::WebGpt);
        assert_eq!(result.data, json!({"answer": 42}));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn non_json_body_is_wrapped() {
        let transport = MockTransport::always(Outcome::Respond(200, "plain text"));
        let d = dispatcher(transport, 0);

        let result = d
            .invoke("Summarizer", "summarize", &attrs(json!({"message": "x"})), None)
            .await
            .unwrap();

        assert_eq!(result.data, json!({"message": "plain text", "rawResponse": true}));
        assert_eq!(result.attempt, 1);
    }

    #[tokio::test]
    async fn error_payload_in_200_passes_through() {
        let transport = MockTransport::always(Outcome::Respond(200, r#"{"error": "quota"}"#));
        let d = dispatcher(transport, 0);

        let result = d
            .invoke("WebGPT", "chat", &Attributes::new(), None)
            .await
            .unwrap();
        assert_eq!(result.data["error"], "quota");
    }

    #[tokio::test]
    async fn audio_generation_routes_to_audio_endpoint() {
        let transport = MockTransport::always(Outcome::Respond(200, "{}"));
        let d = dispatcher(Arc::clone(&transport), 1);

        d.invoke(
            "Media Studio",
            "generate",
            &attrs(json!({"generationType": "audio_generator", "prompt": "hello", "voice": "nova"})),
            Some("user-7"),
        )
        .await
        .unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.method, Method::Post);
        assert_eq!(call.url, "http://tensai.test/api/audiogen");
        assert_eq!(
            call.body,
            Some(json!({
                "model": "tts-1",
                "prompt": "hello",
                "language": "en",
                "voice": "nova",
                "negative_prompt": ""
            }))
        );
        assert_eq!(call.header("X-Caller-ID"), Some("user-7"));
        assert_eq!(call.header("User-Agent"), Some(DEFAULT_USER_AGENT));
        assert_eq!(call.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn unknown_generation_type_makes_no_calls() {
        let transport = MockTransport::always(Outcome::Respond(200, "{}"));
        let d = dispatcher(Arc::clone(&transport), 1);

        let err = d
            .invoke("Media Studio", "generate", &attrs(json!({"generationType": "x"})), None)
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_caller_defaults_to_unknown() {
        let transport = MockTransport::always(Outcome::Respond(200, "{}"));
        let d = dispatcher(Arc::clone(&transport), 0);

        d.invoke("WebGPT", "chat", &Attributes::new(), None).await.unwrap();
        d.invoke("WebGPT", "chat", &Attributes::new(), Some("")).await.unwrap();

        for call in transport.calls() {
            assert_eq!(call.header("X-Caller-ID"), Some(UNKNOWN_CALLER));
        }
    }

    #[tokio::test]
    async fn control_characters_in_caller_id_are_replaced() {
        let transport = MockTransport::always(Outcome::Respond(200, "{}"));
        let d = dispatcher(Arc::clone(&transport), 2);

        let result = d
            .invoke("WebGPT", "chat", &attrs(json!({"query": "hi"})), Some("alice\nsmith"))
            .await
            .unwrap();
        d.invoke("WebGPT", "chat", &Attributes::new(), Some("\r\n\t"))
            .await
            .unwrap();

        assert_eq!(result.attempt, 1);
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].header("X-Caller-ID"), Some("alice smith"));
        assert_eq!(calls[1].header("X-Caller-ID"), Some(UNKNOWN_CALLER));
    }

    #[test]
    fn caller_tag_keeps_printable_text() {
        assert_eq!(caller_tag(Some("  user-7 ")), "user-7");
        assert_eq!(caller_tag(Some("José")), "José");
        assert_eq!(caller_tag(Some("a\u{7f}b")), "a b");
        assert_eq!(caller_tag(None), UNKNOWN_CALLER);
    }

    #[tokio::test(start_paused = true)]
    async fn unbuildable_request_is_not_retried() {
        let transport = MockTransport::always(Outcome::Reject);
        let d = dispatcher(Arc::clone(&transport), 2);
        let started = Instant::now();

        let err = d
            .invoke("WebGPT", "chat", &Attributes::new(), None)
            .await
            .unwrap_err();

        assert_eq!(transport.calls().len(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(matches!(
            err,
            DispatchError::Transport {
                source: TransportError::InvalidRequest(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn document_translation_and_image_edit_urls() {
        let transport = MockTransport::always(Outcome::Respond(200, "{}"));
        let d = dispatcher(Arc::clone(&transport), 0);

        d.invoke(
            "Translator",
            "translate_document",
            &attrs(json!({"targetLanguage": "fr", "filename": "report.docx"})),
            None,
        )
        .await
        .unwrap();
        d.invoke(
            "Media Studio",
            "generate",
            &attrs(json!({"generationType": "image_to_image", "prompt": "sepia", "imageName": "cat.png"})),
            None,
        )
        .await
        .unwrap();

        let calls = transport.calls();
        assert_eq!(calls[0].url, "http://tensai.test/api/docTranslator");
        assert_eq!(
            calls[0].body,
            Some(json!({"toLanguage": "fr", "filename": "report.docx"}))
        );
        assert_eq!(calls[1].url, "http://tensai.test/api/edit-image");
        assert_eq!(calls[1].body.as_ref().unwrap()["imagename"], "cat.png");
        assert_eq!(calls[1].body.as_ref().unwrap()["operation_type"], "edit");
    }

    #[tokio::test]
    async fn invoke_request_sends_prebuilt_request() {
        let transport = MockTransport::always(Outcome::Respond(200, r#"{"summary": "short"}"#));
        let d = dispatcher(Arc::clone(&transport), 0);
        let request = ModuleRequest::Summarize(crate::request::ChatBody {
            query: Some("long text".into()),
            temperature: 0.7,
            history: Vec::new(),
        });

        let result = d
            .invoke_request(ModuleName::Summarizer, &request, Some("svc"))
            .await
            .unwrap();

        assert_eq!(result.data["summary"], "short");
        let call = &transport.calls()[0];
        assert_eq!(call.url, "http://tensai.test/api/webchat");
        assert_eq!(call.body.as_ref().unwrap()["query"], "long text");
        assert_eq!(call.header("X-Caller-ID"), Some("svc"));
    }

    #[tokio::test]
    async fn each_attempt_gets_fresh_request_id() {
        let transport = MockTransport::new(vec![
            Outcome::Fail,
            Outcome::Respond(200, "{}"),
        ]);
        let d = dispatcher(Arc::clone(&transport), 1).with_backoff(BackoffPolicy::none());

        d.invoke("WebGPT", "chat", &Attributes::new(), None).await.unwrap();

        let ids: Vec<String> = transport
            .calls()
            .iter()
            .map(|c| c.header("X-Request-ID").unwrap().to_string())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| id.starts_with("req_")));
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn api_key_sent_as_bearer() {
        let transport = MockTransport::always(Outcome::Respond(200, "{}"));
        let d = dispatcher(Arc::clone(&transport), 0).with_identity(ClientIdentity {
            user_agent: "custom/2.0".into(),
            api_key: Some(SecretString::from("sekrit")),
        });

        d.invoke("WebGPT", "chat", &Attributes::new(), None).await.unwrap();

        let call = &transport.calls()[0];
        assert_eq!(call.header("Authorization"), Some("Bearer sekrit"));
        assert_eq!(call.header("User-Agent"), Some("custom/2.0"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out_and_retries() {
        let transport = MockTransport::new(vec![
            Outcome::Hang,
            Outcome::Respond(200, r#"{"ok": true}"#),
        ]);
        let d = dispatcher(Arc::clone(&transport), 1);

        let result = d
            .invoke("Translator", "translate", &attrs(json!({"message": "hola"})), None)
            .await
            .unwrap();

        assert_eq!(result.attempt, 2);
        let times = transport.call_times();
        // 10s translator timeout, then a 2s backoff.
        assert_about(times[1] - times[0], Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reported_when_exhausted() {
        let transport = MockTransport::always(Outcome::Hang);
        let d = dispatcher(Arc::clone(&transport), 0);

        let err = d
            .invoke("Translator", "translate", &Attributes::new(), None)
            .await
            .unwrap_err();
        match err {
            DispatchError::Exhausted { attempts, last, .. } => {
                assert_eq!(attempts, 1);
                assert!(matches!(last, TransportError::Timeout(t) if t == Duration::from_secs(10)));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn upload_posts_files_once() {
        let transport = MockTransport::always(Outcome::Respond(200, r#"{"uploaded": 1}"#));
        let d = dispatcher(Arc::clone(&transport), 2);

        let result = d
            .upload_file("OmniQuest", json!([{"name": "a.pdf"}]), "omniquest_docs")
            .await
            .unwrap();

        assert_eq!(result.attempt, 1);
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "http://tensai.test/api/upload");
        assert_eq!(
            calls[0].body,
            Some(json!({"files": [{"name": "a.pdf"}], "feature_type": "omniquest_docs"}))
        );
    }

    #[tokio::test]
    async fn upload_does_not_retry() {
        let transport = MockTransport::always(Outcome::Respond(502, ""));
        let d = dispatcher(Arc::clone(&transport), 2);

        let err = d.upload_file("Translator", json!([]), "doc").await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport { .. }));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn upload_unsupported_module() {
        let transport = MockTransport::always(Outcome::Respond(200, "{}"));
        let d = dispatcher(Arc::clone(&transport), 2);

        let err = d.upload_file("WebGPT", json!([]), "x").await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Config(ConfigError::UploadNotSupported(ref m)) if m == "WebGPT"
        ));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn health_check_collapses_failures() {
        let d = dispatcher(MockTransport::always(Outcome::Fail), 2);
        assert!(!d.check_health("WebGPT").await);

        let d = dispatcher(MockTransport::always(Outcome::Respond(503, "")), 2);
        assert!(!d.check_health("WebGPT").await);

        let d = dispatcher(MockTransport::always(Outcome::Respond(200, "")), 2);
        assert!(!d.check_health("NotAModule").await);
    }

    #[tokio::test(start_paused = true)]
    async fn health_check_times_out_after_five_seconds() {
        let transport = MockTransport::always(Outcome::Hang);
        let d = dispatcher(Arc::clone(&transport), 2);

        let started = Instant::now();
        assert!(!d.check_health("OmniQuest").await);
        assert_about(started.elapsed(), HEALTH_CHECK_TIMEOUT);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn health_check_gets_primary_endpoint() {
        let transport = MockTransport::always(Outcome::Respond(200, "ok"));
        let d = dispatcher(Arc::clone(&transport), 2);

        assert!(d.check_health("Media Studio").await);
        let call = &transport.calls()[0];
        assert_eq!(call.method, Method::Get);
        assert_eq!(call.url, "http://tensai.test/api/generate-image");
        assert!(call.body.is_none());
    }

    #[tokio::test]
    async fn omniquest_status_appends_job_id() {
        let transport = MockTransport::always(Outcome::Respond(200, r#"{"state": "indexed"}"#));
        let d = dispatcher(Arc::clone(&transport), 2);

        let result = d.check_omniquest_status("job-9").await.unwrap();
        assert_eq!(result.module, ModuleName::OmniQuest);
        assert_eq!(result.data["state"], "indexed");

        let call = &transport.calls()[0];
        assert_eq!(call.method, Method::Get);
        assert_eq!(call.url, "http://tensai.test/api/status/job-9");
        assert_eq!(call.header("job_id"), Some("job-9"));
    }

    #[tokio::test]
    async fn omniquest_job_id_stays_one_path_segment() {
        let transport = MockTransport::always(Outcome::Respond(200, "{}"));
        let d = dispatcher(Arc::clone(&transport), 0);

        d.check_omniquest_status("../upload?x=1").await.unwrap();

        let call = &transport.calls()[0];
        assert_eq!(call.url, "http://tensai.test/api/status/..%2Fupload%3Fx=1");
        let url = reqwest::Url::parse(&call.url).unwrap();
        assert_eq!(url.path_segments().unwrap().count(), 3);
        assert_eq!(url.query(), None);
    }

    #[tokio::test]
    async fn video_status_posts_operation_id() {
        let transport = MockTransport::always(Outcome::Respond(200, r#"{"done": false}"#));
        let d = dispatcher(Arc::clone(&transport), 2);

        let result = d.check_video_status("op-1").await.unwrap();
        assert_eq!(result.module, ModuleName::MediaStudio);

        let call = &transport.calls()[0];
        assert_eq!(call.url, "http://tensai.test/api/video-status");
        assert_eq!(call.body, Some(json!({"operation_id": "op-1"})));
    }

    #[tokio::test]
    async fn status_checks_need_registered_module() {
        let registry = Arc::new(EndpointRegistry::new());
        let d = ModuleDispatcher::new(registry, MockTransport::always(Outcome::Respond(200, "{}")));
        assert!(d.check_omniquest_status("j").await.unwrap_err().is_config());
        assert!(d.check_video_status("o").await.unwrap_err().is_config());
    }

    #[test]
    fn available_modules_and_config() {
        let d = dispatcher(MockTransport::always(Outcome::Fail), 2);
        assert_eq!(d.available_modules().len(), 5);
        assert_eq!(d.module_config("Translator").unwrap().retries, 2);
        assert!(d.module_config("Nope").is_none());
    }

    #[test]
    fn envelope_serializes_camel_case() {
        let result = InvocationResult::new(ModuleName::MediaStudio, 2, r#"{"a": 1}"#);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["module"], "Media Studio");
        assert_eq!(json["attempt"], 2);
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn request_id_format() {
        let id = request_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "req");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn logged_body_is_truncated() {
        let big = json!({"query": "x".repeat(5_000)});
        let logged = pretty_body(&big);
        assert!(logged.ends_with("..."));
        assert_eq!(logged.chars().count(), MAX_LOGGED_BODY_CHARS + 3);
    }
}
