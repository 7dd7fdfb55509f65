use anyhow::Context;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

use crate::discovery::AgentEndpoint;
use crate::error::{AgentError, Result};

/// The agent only answers clients that identify as its own frontend.
pub const AGENT_USER_AGENT: &str = "phoenix-agent/1.0";

// Product uids look like `wow_classic_era`; keep the usual unreserved characters readable.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'-')
    .remove(b'.')
    .remove(b'~');

pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(AGENT_USER_AGENT));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// HTTP transport bound to a single agent endpoint.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
    authorization: Option<HeaderValue>,
}

impl Client {
    pub fn new(endpoint: &AgentEndpoint, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().default_headers(default_headers());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let base_url = Url::parse(&endpoint.base_url())
            .map_err(|e| anyhow::anyhow!("invalid agent address {}: {}", endpoint, e))?;
        Ok(Self {
            http: builder.build()?,
            base_url,
            authorization: None,
        })
    }

    /// Attaches the agent-issued token as a standing `Authorization` header.
    pub fn with_authorization(mut self, token: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(token)
            .map_err(|e| anyhow::anyhow!("agent returned an unusable token: {}", e))?;
        value.set_sensitive(true);
        self.authorization = Some(value);
        Ok(self)
    }

    /// Issues a request and hands back the status and body without judging the status.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, Vec<u8>)> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| anyhow::anyhow!("invalid request path {}: {}", path, e))?;
        debug!(%method, %url, "agent request");

        let mut req = self.http.request(method, url);
        if let Some(auth) = &self.authorization {
            req = req.header(AUTHORIZATION, auth.clone());
        }
        if let Some(body) = body {
            let bytes = serde_json::to_vec(&body)
                .with_context(|| format!("failed to encode request body for {}", path))?;
            req = req.body(bytes);
        }

        let res = req.send().await?;
        let status = res.status();
        let bytes = res.bytes().await?.to_vec();
        debug!(%status, len = bytes.len(), "agent response");
        Ok((status, bytes))
    }

    /// Like [`Client::send`] but any non-2xx status is an error.
    pub async fn send_json_bytes(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Vec<u8>> {
        let (status, bytes) = self.send(method.clone(), path, body).await?;
        if !status.is_success() {
            return Err(AgentError::Status {
                method,
                path: path.to_string(),
                status,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes)
    }

    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let bytes = self.send_json_bytes(method, path, body).await?;
        decode_json(path, &bytes)
    }
}

pub fn decode_json(path: &str, bytes: &[u8]) -> Result<serde_json::Value> {
    if bytes.is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_slice(bytes).map_err(|source| AgentError::Decode {
        path: path.to_string(),
        source,
    })
}
