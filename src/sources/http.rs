//! HTTP access for release APIs and archive downloads.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::sources::error::AcquireError;

const USER_AGENT: &str = concat!("statica/", env!("CARGO_PKG_VERSION"));

/// A buffered HTTP response. Header names are lowercase.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A 200 response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers
            .insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx status into the matching error.
    ///
    /// 408, 429 and 5xx may clear up on their own; every other failure
    /// status is permanent.
    pub fn error_for_status(self, url: &str) -> Result<Self, AcquireError> {
        if self.is_success() {
            return Ok(self);
        }
        let reason = format!("HTTP {}", self.status);
        match self.status {
            408 | 429 | 500..=599 => Err(AcquireError::transient(url, reason)),
            _ => Err(AcquireError::permanent(url, reason)),
        }
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self, url: &str) -> Result<T, AcquireError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AcquireError::permanent(url, format!("invalid JSON response: {}", e)))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Minimal blocking HTTP client. Every request is a GET.
pub trait HttpClient: Send + Sync {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, AcquireError>;
}

/// [`HttpClient`] backed by `reqwest::blocking`.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(ReqwestClient { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, AcquireError> {
        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().map_err(|e| classify_reqwest(url, e))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .map_err(|e| classify_reqwest(url, e))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Builder errors, such as an unparseable URL, are permanent.
fn classify_reqwest(url: &str, err: reqwest::Error) -> AcquireError {
    if err.is_builder() {
        AcquireError::permanent(url, err)
    } else if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        AcquireError::transient(url, err)
    } else {
        AcquireError::permanent(url, err)
    }
}

/// Extract a `.tar.gz` filename from a `content-disposition` header.
pub fn attachment_filename(response: &HttpResponse) -> Option<String> {
    let value = response.header("content-disposition")?;
    value
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty() && !name.contains('/'))
}
