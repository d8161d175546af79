//! External-authorization check protocol
//!
//! JSON rendition of the proxy's check request/response messages. Only the
//! fields the check pipeline consumes are modelled.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::client_cert::CLIENT_CERTIFICATE_METADATA_NAMESPACE;
use crate::error::{CheckError, Result};

/// Context extension key carrying the "internal route" flag
pub const CONTEXT_EXTENSION_INTERNAL: &str = "internal";

/// Context extension key carrying the numeric route identifier
pub const CONTEXT_EXTENSION_ROUTE_ID: &str = "route_id";

/// gRPC status code for an allowed check
pub const RPC_CODE_OK: i32 = 0;

/// gRPC status code for a denied check
pub const RPC_CODE_PERMISSION_DENIED: i32 = 7;

/// Inbound check request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub attributes: AttributeContext,
}

/// Attributes of the request being checked
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeContext {
    /// Downstream peer
    #[serde(default)]
    pub source: Peer,

    /// The proxied request
    #[serde(default)]
    pub request: Option<RequestAttributes>,

    /// Per-route values configured on the proxy's authorization filter
    #[serde(default)]
    pub context_extensions: HashMap<String, String>,

    /// Dynamic metadata forwarded by other proxy filters
    #[serde(default)]
    pub metadata_context: Metadata,
}

/// Downstream peer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Peer {
    #[serde(default)]
    pub address: SocketAddress,
}

/// Socket address of a peer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SocketAddress {
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub port_value: u32,
}

/// Filter metadata keyed by namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub filter_metadata: HashMap<String, serde_json::Map<String, serde_json::Value>>,
}

/// Request-level attributes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestAttributes {
    #[serde(default)]
    pub http: Option<HttpRequest>,
}

/// HTTP facts of the proxied request.
///
/// The proxy sends the query string as part of `path`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpRequest {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub method: String,

    /// Request headers, repeated keys allowed
    #[serde(default)]
    pub headers: Vec<HeaderValue>,

    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub scheme: String,

    #[serde(default)]
    pub body: String,
}

/// A single header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderValue {
    pub key: String,
    pub value: String,
}

impl HeaderValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl CheckRequest {
    /// HTTP attributes, or a translation error when the proxy sent none
    pub fn http(&self) -> Result<&HttpRequest> {
        self.attributes
            .request
            .as_ref()
            .and_then(|r| r.http.as_ref())
            .ok_or_else(|| CheckError::ProtocolTranslation("missing HTTP request attributes".into()))
    }

    /// Route identifier from the context extensions; route 0 when absent
    pub fn route_id(&self) -> Result<u64> {
        match self.attributes.context_extensions.get(CONTEXT_EXTENSION_ROUTE_ID) {
            None => Ok(0),
            Some(raw) => raw.parse().map_err(|_| {
                CheckError::ProtocolTranslation(format!("invalid route id: {:?}", raw))
            }),
        }
    }

    /// Whether the proxy marked the route as internal
    pub fn is_internal(&self) -> bool {
        self.attributes
            .context_extensions
            .get(CONTEXT_EXTENSION_INTERNAL)
            .is_some_and(|v| v == "true")
    }

    /// Client certificate metadata forwarded by the proxy, if any
    pub fn client_certificate_metadata(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.attributes
            .metadata_context
            .filter_metadata
            .get(CLIENT_CERTIFICATE_METADATA_NAMESPACE)
    }

    /// Address of the downstream peer
    pub fn source_address(&self) -> &str {
        &self.attributes.source.address.address
    }
}

/// Build the context extensions the proxy attaches to a route's
/// authorization filter
pub fn make_context_extensions(internal: bool, route_id: u64) -> HashMap<String, String> {
    HashMap::from([
        (CONTEXT_EXTENSION_INTERNAL.to_string(), internal.to_string()),
        (CONTEXT_EXTENSION_ROUTE_ID.to_string(), route_id.to_string()),
    ])
}

/// Outbound check response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub status: RpcStatus,

    #[serde(flatten)]
    pub http_response: HttpResponse,
}

/// gRPC-style status of the check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: i32,

    #[serde(default)]
    pub message: String,
}

/// Either an OK or a denied outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpResponse {
    OkResponse(OkHttpResponse),
    DeniedResponse(DeniedHttpResponse),
}

/// Let the request through, optionally adding upstream headers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OkHttpResponse {
    #[serde(default)]
    pub headers: Vec<HeaderValue>,
}

/// Reply to the client directly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeniedHttpResponse {
    pub status: HttpStatus,

    #[serde(default)]
    pub headers: Vec<HeaderValue>,

    #[serde(default)]
    pub body: String,
}

/// HTTP status code of a denied response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpStatus {
    pub code: u16,
}

impl CheckResponse {
    /// Whether the check allows the request
    pub fn is_ok(&self) -> bool {
        matches!(self.http_response, HttpResponse::OkResponse(_))
    }

    /// The denied response, if the check denied the request
    pub fn denied(&self) -> Option<&DeniedHttpResponse> {
        match &self.http_response {
            HttpResponse::DeniedResponse(denied) => Some(denied),
            HttpResponse::OkResponse(_) => None,
        }
    }

    /// Value of a header on the denied response
    pub fn denied_header(&self, key: &str) -> Option<&str> {
        self.denied()?
            .headers
            .iter()
            .find(|h| h.key.eq_ignore_ascii_case(key))
            .map(|h| h.value.as_str())
    }
}
