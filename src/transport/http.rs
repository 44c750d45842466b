use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::Proxy;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::{debug, info};

use crate::{BoxStream, Error, Result};

/// Extra request headers (authentication, versioning, async switches).
pub type Headers = Vec<(&'static str, String)>;

/// Shared HTTP client for all adapters.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.parse::<u64>().ok())
}

impl HttpTransport {
    /// Build a client from environment knobs:
    /// `AI_HTTP_TIMEOUT_SECS`, `AI_HTTP_CONNECT_TIMEOUT_SECS`,
    /// `AI_HTTP_POOL_MAX_IDLE_PER_HOST`, `AI_PROXY_URL`.
    pub fn from_env() -> Result<Self> {
        // Streams can run long; the default covers a full generation.
        let timeout_secs = env_u64("AI_HTTP_TIMEOUT_SECS").unwrap_or(120);
        let connect_secs = env_u64("AI_HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(10);

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(connect_secs))
            .pool_max_idle_per_host(
                env_u64("AI_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .map(|n| n as usize)
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Ok(proxy_url) = env::var("AI_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(super::TransportError::Other(e.to_string())))?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: &Headers,
        body: Option<&Value>,
    ) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        for (k, v) in headers {
            req = req.header(*k, v);
        }
        if let Some(b) = body {
            req = req.json(b);
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        req.send()
            .await
            .map_err(|e| Error::Transport(super::TransportError::Http(e)))
    }

    /// Turn a non-success response into a vendor error.
    async fn ensure_success(url: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = extract_error_message(status.as_u16(), &body);
        info!(http_status = status.as_u16(), url, error = %message, "vendor request failed");
        Err(Error::vendor(status.as_u16(), message))
    }

    /// POST a JSON body and return the streaming response body.
    pub async fn post_stream(
        &self,
        url: &str,
        headers: &Headers,
        body: &Value,
    ) -> Result<BoxStream<'static, Bytes>> {
        let req = self
            .request(reqwest::Method::POST, url, headers, Some(body))
            .header("accept", "text/event-stream");
        let resp = Self::ensure_success(url, self.send(req).await?).await?;
        debug!(url, "vendor stream opened");

        let byte_stream = resp
            .bytes_stream()
            .map_err(|e| Error::Transport(super::TransportError::Http(e)));
        Ok(Box::pin(byte_stream))
    }

    /// POST a JSON body and parse a JSON response.
    pub async fn post_json(&self, url: &str, headers: &Headers, body: &Value) -> Result<Value> {
        let req = self.request(reqwest::Method::POST, url, headers, Some(body));
        let resp = Self::ensure_success(url, self.send(req).await?).await?;
        resp.json()
            .await
            .map_err(|e| Error::Transport(super::TransportError::Http(e)))
    }

    /// GET and parse a JSON response.
    pub async fn get_json(&self, url: &str, headers: &Headers) -> Result<Value> {
        let req = self.request(reqwest::Method::GET, url, headers, None);
        let resp = Self::ensure_success(url, self.send(req).await?).await?;
        resp.json()
            .await
            .map_err(|e| Error::Transport(super::TransportError::Http(e)))
    }

    /// POST and report the raw status and body without judging success.
    pub async fn ping(&self, url: &str, headers: &Headers, body: &Value) -> Result<(u16, String)> {
        let req = self.request(reqwest::Method::POST, url, headers, Some(body));
        let resp = self.send(req).await?;
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        Ok((status, text))
    }
}

/// Pull the human-readable message out of a vendor error envelope.
pub fn extract_error_message(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| v.get("message").and_then(Value::as_str))
            .or_else(|| v.get("error").and_then(Value::as_str))
            .or_else(|| v.pointer("/base_resp/status_msg").and_then(Value::as_str))
            .map(str::to_string)
    });
    match from_json {
        Some(m) if !m.is_empty() => m,
        _ if !body.trim().is_empty() && parsed.is_none() => body.trim().to_string(),
        _ => format!("HTTP error! status: {}", status),
    }
}

/// `Authorization: Bearer <key>`
pub fn bearer(api_key: &str) -> Headers {
    vec![("authorization", format!("Bearer {}", api_key))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error_message_shapes() {
        assert_eq!(
            extract_error_message(400, r#"{"error":{"message":"bad tools","type":"invalid_request_error"}}"#),
            "bad tools"
        );
        assert_eq!(extract_error_message(500, r#"{"message":"Task failed"}"#), "Task failed");
        assert_eq!(
            extract_error_message(400, r#"{"base_resp":{"status_code":2013,"status_msg":"invalid params, tool"}}"#),
            "invalid params, tool"
        );
        assert_eq!(extract_error_message(502, "upstream down"), "upstream down");
        assert_eq!(extract_error_message(503, ""), "HTTP error! status: 503");
    }
}
