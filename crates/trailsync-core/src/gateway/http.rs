//! reqwest-backed gateway for the REST backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{GatewayError, GatewayMethod, GatewayRequest, RemoteGateway};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const DEFAULT_UPLOAD_MIME: &str = "application/octet-stream";

/// HTTP client for the backend API, authenticated with a bearer token.
#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    client: reqwest::Client,
    access_token: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    /// Builds a gateway for an explicit API base URL.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                GatewayError::NotConfigured(format!("failed to construct HTTP client: {error}"))
            })?;
        Ok(Self {
            base_url,
            client,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Returns the base URL this gateway was configured with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the bearer token used for subsequent requests.
    pub async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = normalize_text_option(token);
    }

    async fn build_request(
        &self,
        request: &GatewayRequest,
    ) -> Result<reqwest::Request, GatewayError> {
        let token = self.access_token.read().await.clone().ok_or_else(|| {
            GatewayError::Status {
                status: 401,
                message: "no access token available".to_string(),
            }
        })?;
        let url = format!("{}{}", self.base_url, request.path);

        let builder = match request.method {
            GatewayMethod::Get => self.client.get(url),
            GatewayMethod::Post => self.client.post(url).json(&request.body),
            GatewayMethod::Put => self.client.put(url).json(&request.body),
            GatewayMethod::Delete => self.client.delete(url),
            GatewayMethod::Upload => match upload_form(&request.body).await? {
                Some(form) => self.client.post(url).multipart(form),
                None => self.client.post(url).json(&request.body),
            },
        };

        builder
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .build()
            .map_err(GatewayError::from)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn send(&self, request: GatewayRequest) -> Result<Value, GatewayError> {
        let http_request = self.build_request(&request).await?;
        tracing::debug!("{} {}", request.method, request.path);

        let response = self.client.execute(http_request).await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message: parse_api_error(&body),
            });
        }

        Ok(parse_body(&body))
    }
}

/// Multipart form for media uploads whose payload points at a local file.
async fn upload_form(payload: &Value) -> Result<Option<multipart::Form>, GatewayError> {
    let Some(local_uri) = payload
        .get("local_uri")
        .and_then(Value::as_str)
        .map(|uri| uri.trim_start_matches("file://").to_string())
    else {
        return Ok(None);
    };

    let bytes = tokio::fs::read(&local_uri).await.map_err(|error| {
        GatewayError::InvalidPayload(format!("cannot read media file {local_uri}: {error}"))
    })?;
    let file_name = payload
        .get("file_name")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| {
            Path::new(&local_uri)
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "upload.bin".to_string());
    let mime_type = payload
        .get("mime_type")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_UPLOAD_MIME);

    let file_part = multipart::Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime_type)
        .map_err(|error| GatewayError::InvalidPayload(error.to_string()))?;
    let metadata = serde_json::to_string(payload)
        .map_err(|error| GatewayError::InvalidPayload(error.to_string()))?;

    Ok(Some(
        multipart::Form::new()
            .text("metadata", metadata)
            .part("file", file_part),
    ))
}

fn parse_body(body: &str) -> Value {
    if body.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(compact_text(body)))
}

fn parse_api_error(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<Value>(body) {
        if let Some(message) = payload
            .get("message")
            .or_else(|| payload.get("error"))
            .and_then(Value::as_str)
        {
            return message.trim().to_string();
        }
    }
    compact_text(body)
}

fn normalize_base_url(raw: String) -> Result<String, GatewayError> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        GatewayError::NotConfigured("API base URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(GatewayError::NotConfigured(
            "API base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateway() -> HttpGateway {
        HttpGateway::new("https://api.example.com/", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://api.example.com/ ".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", gateway());
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn build_request_requires_token() {
        let gateway = gateway();
        let request = GatewayRequest::new(GatewayMethod::Get, "/trails", Value::Null);

        let error = gateway.build_request(&request).await.unwrap_err();
        assert_eq!(error.status(), Some(401));
    }

    #[tokio::test]
    async fn build_request_sets_method_url_and_auth() {
        let gateway = gateway();
        gateway.set_access_token(Some("secret".to_string())).await;

        let request = GatewayRequest::new(
            GatewayMethod::Put,
            "/trails/t1",
            json!({ "id": "t1", "name": "Ridge" }),
        );
        let built = gateway.build_request(&request).await.unwrap();

        assert_eq!(built.method(), reqwest::Method::PUT);
        assert_eq!(built.url().as_str(), "https://api.example.com/trails/t1");
        assert_eq!(
            built
                .headers()
                .get(reqwest::header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok()),
            Some("Bearer secret")
        );
    }

    #[tokio::test]
    async fn upload_with_local_file_uses_multipart() {
        let tmp = tempfile::tempdir().unwrap();
        let file_path = tmp.path().join("photo.jpg");
        std::fs::write(&file_path, b"jpeg-bytes").unwrap();

        let gateway = gateway();
        gateway.set_access_token(Some("secret".to_string())).await;

        let request = GatewayRequest::new(
            GatewayMethod::Upload,
            "/media",
            json!({ "id": "m1", "local_uri": file_path.to_string_lossy(), "mime_type": "image/jpeg" }),
        );
        let built = gateway.build_request(&request).await.unwrap();

        assert_eq!(built.method(), reqwest::Method::POST);
        let content_type = built
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.starts_with("multipart/form-data"));
    }

    #[tokio::test]
    async fn upload_with_missing_file_is_invalid_payload() {
        let gateway = gateway();
        gateway.set_access_token(Some("secret".to_string())).await;

        let request = GatewayRequest::new(
            GatewayMethod::Upload,
            "/media",
            json!({ "id": "m1", "local_uri": "/definitely/not/here.jpg" }),
        );
        let error = gateway.build_request(&request).await.unwrap_err();
        assert!(matches!(error, GatewayError::InvalidPayload(_)));
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        assert_eq!(parse_api_error(r#"{"message":" bad payload "}"#), "bad payload");
        assert_eq!(parse_api_error(r#"{"error":"denied"}"#), "denied");
        assert_eq!(parse_api_error("plain text"), "plain text");
    }

    #[test]
    fn parse_body_handles_empty_and_text() {
        assert_eq!(parse_body("  "), Value::Null);
        assert_eq!(parse_body(r#"{"id":"t1"}"#), json!({ "id": "t1" }));
        assert_eq!(parse_body("ok"), Value::String("ok".to_string()));
    }
}
