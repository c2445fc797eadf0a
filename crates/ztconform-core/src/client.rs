//! Typed API client for the service under test.
//!
//! Requests are described by a [`PathTemplate`] plus parameters, so every call
//! the harness makes names the API route it exercises. [`ApiTransport`] is the
//! seam the sequencer talks to; [`HttpClient`] is the network implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CallError, TemplateError};

/// Header carrying the shared-secret token (`X-ZT1-Auth`).
pub const AUTH_HEADER: &str = "x-zt1-auth";

/// HTTP methods the API exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A route such as `/controller/network/{network_id}/member/{node_id}`.
///
/// Parameters always occupy a whole segment; `abc{id}` is rejected so a
/// substitution can never match part of a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let malformed = |reason: &str| TemplateError::Malformed {
            template: raw.to_string(),
            reason: reason.to_string(),
        };

        let rest = raw.strip_prefix('/').ok_or_else(|| malformed("must start with '/'"))?;
        let mut segments = Vec::new();
        if !rest.is_empty() {
            for part in rest.split('/') {
                if part.is_empty() {
                    return Err(malformed("empty segment"));
                }
                let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                    Some(name) => {
                        if name.is_empty()
                            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                        {
                            return Err(malformed("invalid parameter name"));
                        }
                        if segments.contains(&Segment::Param(name.to_string())) {
                            return Err(malformed("duplicate parameter"));
                        }
                        Segment::Param(name.to_string())
                    }
                    None if part.contains('{') || part.contains('}') => {
                        return Err(malformed("parameter must be a whole segment"));
                    }
                    None => Segment::Literal(part.to_string()),
                };
                segments.push(segment);
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parameter names in path order.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitute parameters. The supplied set must match the template's
    /// exactly.
    pub fn render(&self, params: &BTreeMap<String, String>) -> Result<ResolvedPath, TemplateError> {
        if let Some(unknown) = params.keys().find(|k| !self.params().any(|p| p == k.as_str())) {
            return Err(TemplateError::UnknownParam(unknown.clone()));
        }

        let mut segments = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => segments.push(text.clone()),
                Segment::Param(name) => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingParam(name.clone()))?;
                    if value.is_empty() || value.contains('/') {
                        return Err(TemplateError::InvalidValue {
                            name: name.clone(),
                            value: value.clone(),
                        });
                    }
                    segments.push(value.clone());
                }
            }
        }
        Ok(ResolvedPath { segments })
    }
}

impl FromStr for PathTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A template with every parameter substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPath {
    segments: Vec<String>,
}

impl ResolvedPath {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// One call to issue.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Template text, e.g. `/controller/network/{network_id}`
    pub template: String,
    pub path: ResolvedPath,
    pub params: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(
        method: Method,
        template: &PathTemplate,
        params: BTreeMap<String, String>,
    ) -> Result<Self, TemplateError> {
        let path = template.render(&params)?;
        Ok(Self {
            method,
            template: template.as_str().to_string(),
            path,
            params,
            query: Vec::new(),
            body: None,
        })
    }

    /// Request for a route without parameters.
    pub fn simple(method: Method, template: &str) -> Result<Self, TemplateError> {
        Self::new(method, &PathTemplate::parse(template)?, BTreeMap::new())
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Value substituted for a path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Raw status plus decoded body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// `None` when the body was empty (or undecodable on an error status)
    pub body: Option<Value>,
}

impl ApiResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(200, Some(body))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Issues API calls. Implementations must not retry.
pub trait ApiTransport: Send + Sync {
    fn send(&self, request: ApiRequest) -> impl Future<Output = Result<ApiResponse, CallError>> + Send;
}

/// Where the API under test is reachable.
#[derive(Clone, PartialEq, Eq)]
pub struct TargetEndpoint {
    pub host: String,
    pub port: u16,
    pub token: String,
}

impl TargetEndpoint {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

impl fmt::Debug for TargetEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// HTTP implementation of [`ApiTransport`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    base: Url,
    inner: reqwest::Client,
}

impl HttpClient {
    /// Build a client bound to `endpoint`, attaching its token to every call.
    pub fn build(endpoint: &TargetEndpoint, timeout: Duration) -> Result<Self, CallError> {
        let base = Url::parse(&endpoint.base_url()).map_err(|e| CallError::Url(e.to_string()))?;

        let mut token = HeaderValue::from_str(&endpoint.token)
            .map_err(|e| CallError::Build(format!("invalid auth token: {e}")))?;
        token.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(AUTH_HEADER), token);

        let inner = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| CallError::Build(e.to_string()))?;

        Ok(Self { base, inner })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, CallError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| CallError::Url(format!("{} cannot take a path", self.base)))?
            .pop_if_empty()
            .extend(request.path.segments());
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

impl ApiTransport for HttpClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, CallError> {
        let url = self.url_for(&request)?;
        tracing::debug!(method = %request.method, url = %url, "Issuing API call");

        let mut builder = self.inner.request(request.method.into(), url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;

        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => Some(value),
                Err(_) if !(200..300).contains(&status) => None,
                Err(err) => {
                    return Err(CallError::Decode {
                        status,
                        reason: err.to_string(),
                    })
                }
            }
        };

        Ok(ApiResponse { status, body })
    }
}
