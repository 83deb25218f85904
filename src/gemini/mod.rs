//! Edit request gateway backed by the Gemini `generateContent` endpoint.
//!
//! One call sends the (size-bounded) source image, the instruction and an
//! optional mask, retries transient transport failures with a linear
//! backoff, and classifies whatever comes back into either one image or a
//! [`GenerationError`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};

use crate::{
    error::GenerationError,
    imaging::{downscale_for_upload, MAX_UPLOAD_DIMENSION},
    models::ImagePayload,
};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
    pub retry_delay: Duration,
    pub max_attempts: usize,
    pub max_dimension: u32,
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        let api_key = non_empty_env("GEMINI_API_KEY")
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .or_else(|| non_empty_env("API_KEY"));
        let model = non_empty_env("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_base = non_empty_env("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let timeout = non_empty_env("GEMINI_TIMEOUT_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let retry_delay = non_empty_env("GEMINI_RETRY_DELAY_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_DELAY_MS);

        Self {
            api_key,
            model,
            api_base,
            timeout: Duration::from_secs(timeout),
            retry_delay: Duration::from_millis(retry_delay),
            max_attempts: MAX_ATTEMPTS,
            max_dimension: MAX_UPLOAD_DIMENSION,
        }
    }

    fn require_api_key(&self) -> Result<&str, GenerationError> {
        self.api_key
            .as_deref()
            .ok_or(GenerationError::MissingApiKey)
    }

    pub fn endpoint(&self) -> String {
        let model = self.model.trim();
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

/// One edit call: source image, instruction, and an optional PNG mask.
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub image: ImagePayload,
    pub instruction: String,
    pub mask: Option<Vec<u8>>,
}

#[async_trait]
pub trait ImageGateway: Send + Sync {
    async fn generate(&self, request: EditRequest) -> Result<ImagePayload, GenerationError>;
}

#[async_trait]
impl<G: ImageGateway + ?Sized> ImageGateway for Arc<G> {
    async fn generate(&self, request: EditRequest) -> Result<ImagePayload, GenerationError> {
        (**self).generate(request).await
    }
}

#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// A single POST to the model endpoint. Network errors come back as
/// [`GenerationError::TransportFailure`].
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn post(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<RawResponse, GenerationError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    http_client: reqwest::Client,
}

#[async_trait]
impl ModelTransport for HttpTransport {
    async fn post(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<RawResponse, GenerationError> {
        let response = self
            .http_client
            .post(endpoint)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_failure)?;
        Ok(RawResponse { status, body })
    }
}

#[async_trait]
impl<T: ModelTransport + ?Sized> ModelTransport for Arc<T> {
    async fn post(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<RawResponse, GenerationError> {
        (**self).post(endpoint, api_key, payload).await
    }
}

fn transport_failure(error: reqwest::Error) -> GenerationError {
    GenerationError::TransportFailure {
        message: error.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct GeminiGateway<T = HttpTransport> {
    transport: T,
    config: GeminiConfig,
}

impl GeminiGateway<HttpTransport> {
    pub fn new(config: GeminiConfig) -> Self {
        Self::with_transport(config, HttpTransport::default())
    }
}

impl<T: ModelTransport> GeminiGateway<T> {
    pub fn with_transport(config: GeminiConfig, transport: T) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn post_with_retries(
        &self,
        api_key: &str,
        payload: &Value,
    ) -> Result<Value, GenerationError> {
        let endpoint = self.config.endpoint();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(
                self.config.timeout,
                self.transport.post(&endpoint, api_key, payload),
            )
            .await
            {
                Ok(result) => result.and_then(check_status),
                Err(_) => Err(GenerationError::TransportFailure {
                    message: format!(
                        "request timed out after {}s",
                        self.config.timeout.as_secs_f64()
                    ),
                }),
            };

            match outcome {
                Ok(body) => return Ok(body),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let delay = self.config.retry_delay * attempt as u32;
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "gemini attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    tracing::error!(attempt, %error, "gemini request failed");
                    return Err(error);
                }
            }
        }
    }
}

#[async_trait]
impl<T: ModelTransport> ImageGateway for GeminiGateway<T> {
    async fn generate(&self, request: EditRequest) -> Result<ImagePayload, GenerationError> {
        let api_key = self.config.require_api_key()?;
        let source = downscale_for_upload(&request.image, self.config.max_dimension)
            .map_err(|error| GenerationError::InvalidImage(error.to_string()))?;

        let payload = build_payload(&source, &request.instruction, request.mask.as_deref());
        tracing::debug!(payload = %sanitize_payload(payload.clone()), "sending edit request");

        let response = self.post_with_retries(api_key, &payload).await?;
        let image = classify_response(&response)?;
        tracing::info!(
            mime_type = %image.mime_type,
            bytes = image.bytes.len(),
            "edit request produced an image"
        );
        Ok(image)
    }
}

fn build_payload(source: &ImagePayload, instruction: &str, mask: Option<&[u8]>) -> Value {
    let mut parts = vec![
        json!({
            "inlineData": {
                "mimeType": source.mime_type,
                "data": STANDARD.encode(&source.bytes),
            }
        }),
        json!({ "text": instruction }),
    ];

    if let Some(mask) = mask {
        parts.push(json!({
            "inlineData": {
                "mimeType": "image/png",
                "data": STANDARD.encode(mask),
            }
        }));
    }

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": { "responseModalities": ["IMAGE"] },
    })
}

fn check_status(response: RawResponse) -> Result<Value, GenerationError> {
    if !(200..300).contains(&response.status) {
        return Err(parse_http_error(response.status, &response.body));
    }

    serde_json::from_str(&response.body).map_err(|error| GenerationError::TransportFailure {
        message: format!("invalid response body: {error}"),
    })
}

fn parse_http_error(status: u16, body: &str) -> GenerationError {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|json| json.pointer("/error/message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    let provider_status = parsed
        .as_ref()
        .and_then(|json| json.pointer("/error/status"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    if status == 429
        || provider_status == "RESOURCE_EXHAUSTED"
        || body.contains("RESOURCE_EXHAUSTED")
    {
        GenerationError::QuotaExceeded { message }
    } else if status >= 500 {
        GenerationError::TransportFailure {
            message: format!("server error ({status}): {message}"),
        }
    } else {
        GenerationError::Rejected { status, message }
    }
}

/// Maps a successful HTTP body to an image or the reason there is none.
fn classify_response(response: &Value) -> Result<ImagePayload, GenerationError> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .filter(|candidates| !candidates.is_empty());

    let Some(candidate) = candidates.and_then(|candidates| candidates.first()) else {
        if let Some(reason) = response
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
        {
            return Err(GenerationError::SafetyBlocked {
                reason: reason.to_string(),
            });
        }
        return Err(GenerationError::EmptyResult);
    };

    let parts = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .filter(|parts| !parts.is_empty());

    let Some(parts) = parts else {
        return match candidate.get("finishReason").and_then(Value::as_str) {
            Some(reason) if reason != "STOP" => Err(GenerationError::ExplicitStop {
                reason: reason.to_string(),
            }),
            _ => Err(GenerationError::EmptyResult),
        };
    };

    for part in parts {
        let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }

        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|error| GenerationError::InvalidImage(error.to_string()))?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        return Ok(ImagePayload::new(bytes, mime_type));
    }

    Err(GenerationError::EmptyResult)
}

fn sanitize_payload(payload: Value) -> Value {
    fn walk(value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, nested) in map.iter_mut() {
                    if key == "data" {
                        if let Some(len) = nested.as_str().map(str::len) {
                            *nested = json!(format!("[omitted {len} base64 chars]"));
                            continue;
                        }
                    }
                    walk(nested);
                }
            }
            Value::Array(array) => {
                for value in array.iter_mut() {
                    walk(value);
                }
            }
            _ => {}
        }
    }

    let mut sanitized = payload;
    walk(&mut sanitized);
    sanitized
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use super::*;
    use crate::imaging::tests::png_payload;

    type Scripted = Result<RawResponse, GenerationError>;

    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Scripted>>,
        attempts: AtomicUsize,
        payloads: Mutex<Vec<Value>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelTransport for ScriptedTransport {
        async fn post(
            &self,
            _endpoint: &str,
            _api_key: &str,
            payload: &Value,
        ) -> Result<RawResponse, GenerationError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.payloads.lock().unwrap().push(payload.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::TransportFailure {
                    message: "script exhausted".into(),
                }))
        }
    }

    struct SlowTransport;

    #[async_trait]
    impl ModelTransport for SlowTransport {
        async fn post(&self, _: &str, _: &str, _: &Value) -> Result<RawResponse, GenerationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ok(image_body()))
        }
    }

    fn config() -> GeminiConfig {
        GeminiConfig {
            api_key: Some("test-key".into()),
            model: DEFAULT_MODEL.into(),
            api_base: DEFAULT_API_BASE.into(),
            timeout: Duration::from_secs(5),
            retry_delay: Duration::ZERO,
            max_attempts: MAX_ATTEMPTS,
            max_dimension: MAX_UPLOAD_DIMENSION,
        }
    }

    fn ok(body: Value) -> RawResponse {
        RawResponse {
            status: 200,
            body: body.to_string(),
        }
    }

    fn status(status: u16, body: &str) -> Scripted {
        Ok(RawResponse {
            status,
            body: body.to_string(),
        })
    }

    fn image_body() -> Value {
        json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/jpeg", "data": "AQID" } }
                ]},
                "finishReason": "STOP"
            }]
        })
    }

    fn request() -> EditRequest {
        EditRequest {
            image: png_payload(8, 8),
            instruction: "make it sunny".into(),
            mask: None,
        }
    }

    #[tokio::test]
    async fn success_returns_first_inline_image() {
        let transport = ScriptedTransport::new(vec![Ok(ok(image_body()))]);
        let gateway = GeminiGateway::with_transport(config(), transport.clone());

        let image = gateway.generate(request()).await.unwrap();
        assert_eq!(image, ImagePayload::new(vec![1, 2, 3], "image/jpeg"));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn safety_block_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(ok(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        })))]);
        let gateway = GeminiGateway::with_transport(config(), transport.clone());

        let error = gateway.generate(request()).await.unwrap_err();
        assert_eq!(
            error,
            GenerationError::SafetyBlocked {
                reason: "SAFETY".into()
            }
        );
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn server_errors_use_exactly_three_attempts() {
        let transport = ScriptedTransport::new(vec![
            status(500, "{}"),
            status(503, "unavailable"),
            status(500, "{}"),
            Ok(ok(image_body())),
        ]);
        let gateway = GeminiGateway::with_transport(config(), transport.clone());

        let error = gateway.generate(request()).await.unwrap_err();
        assert!(matches!(error, GenerationError::TransportFailure { .. }));
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delay_grows_linearly_with_the_attempt() {
        for (max_attempts, expected_wait) in [(3, 3), (4, 6)] {
            let transport = ScriptedTransport::new(
                (0..max_attempts).map(|_| status(500, "{}")).collect(),
            );
            let config = GeminiConfig {
                retry_delay: Duration::from_secs(1),
                max_attempts,
                ..config()
            };
            let gateway = GeminiGateway::with_transport(config, transport.clone());

            let started = tokio::time::Instant::now();
            let error = gateway.generate(request()).await.unwrap_err();
            let waited = started.elapsed();

            assert!(matches!(error, GenerationError::TransportFailure { .. }));
            assert_eq!(transport.attempts(), max_attempts);
            assert!(waited >= Duration::from_secs(expected_wait), "waited {waited:?}");
            assert!(
                waited < Duration::from_secs(expected_wait) + Duration::from_millis(100),
                "waited {waited:?}"
            );
        }
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let transport = ScriptedTransport::new(vec![
            Err(GenerationError::TransportFailure {
                message: "connection reset".into(),
            }),
            Ok(ok(image_body())),
        ]);
        let gateway = GeminiGateway::with_transport(config(), transport.clone());

        assert!(gateway.generate(request()).await.is_ok());
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn quota_and_bad_request_propagate_immediately() {
        let transport = ScriptedTransport::new(vec![status(
            429,
            r#"{"error":{"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#,
        )]);
        let gateway = GeminiGateway::with_transport(config(), transport.clone());
        let error = gateway.generate(request()).await.unwrap_err();
        assert_eq!(
            error,
            GenerationError::QuotaExceeded {
                message: "quota".into()
            }
        );
        assert_eq!(transport.attempts(), 1);

        let transport = ScriptedTransport::new(vec![status(
            400,
            r#"{"error":{"message":"bad image","status":"INVALID_ARGUMENT"}}"#,
        )]);
        let gateway = GeminiGateway::with_transport(config(), transport.clone());
        let error = gateway.generate(request()).await.unwrap_err();
        assert_eq!(
            error,
            GenerationError::Rejected {
                status: 400,
                message: "bad image".into()
            }
        );
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn timeouts_count_as_transport_failures() {
        let mut config = config();
        config.timeout = Duration::from_millis(10);
        let gateway = GeminiGateway::with_transport(config, SlowTransport);

        let error = gateway.generate(request()).await.unwrap_err();
        assert!(matches!(error, GenerationError::TransportFailure { .. }));
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let transport = ScriptedTransport::new(vec![Ok(ok(image_body()))]);
        let mut config = config();
        config.api_key = None;
        let gateway = GeminiGateway::with_transport(config, transport.clone());

        let error = gateway.generate(request()).await.unwrap_err();
        assert_eq!(error, GenerationError::MissingApiKey);
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test]
    async fn mask_is_sent_after_the_instruction() {
        let transport = ScriptedTransport::new(vec![Ok(ok(image_body()))]);
        let gateway = GeminiGateway::with_transport(config(), transport.clone());
        let mut request = request();
        request.mask = Some(vec![7, 7]);

        gateway.generate(request).await.unwrap();
        let payloads = transport.payloads.lock().unwrap();
        let parts = payloads[0]
            .pointer("/contents/0/parts")
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["text"], "make it sunny");
        assert_eq!(parts[2]["inlineData"]["data"], "Bwc=");
        assert_eq!(
            payloads[0]["generationConfig"]["responseModalities"],
            json!(["IMAGE"])
        );
    }

    #[test]
    fn classify_distinguishes_empty_and_stopped() {
        assert_eq!(
            classify_response(&json!({})),
            Err(GenerationError::EmptyResult)
        );
        assert_eq!(
            classify_response(&json!({ "candidates": [{ "finishReason": "NO_IMAGE" }] })),
            Err(GenerationError::ExplicitStop {
                reason: "NO_IMAGE".into()
            })
        );
        assert_eq!(
            classify_response(&json!({
                "candidates": [{ "finishReason": "STOP", "content": { "parts": [] } }]
            })),
            Err(GenerationError::EmptyResult)
        );
        assert_eq!(
            classify_response(&json!({
                "candidates": [{ "content": { "parts": [{ "text": "no" }] } }]
            })),
            Err(GenerationError::EmptyResult)
        );
    }

    #[test]
    fn sanitize_hides_inline_data() {
        let payload = build_payload(&ImagePayload::new(vec![1; 30], "image/png"), "x", None);
        let sanitized = sanitize_payload(payload);
        let data = sanitized
            .pointer("/contents/0/parts/0/inlineData/data")
            .and_then(Value::as_str)
            .unwrap();
        assert_eq!(data, "[omitted 40 base64 chars]");
    }

    #[test]
    fn endpoint_includes_model_path() {
        let mut config = config();
        assert_eq!(
            config.endpoint(),
            format!("{DEFAULT_API_BASE}/models/{DEFAULT_MODEL}:generateContent")
        );
        config.model = "models/custom".into();
        assert!(config.endpoint().ends_with("/models/custom:generateContent"));
    }
}
