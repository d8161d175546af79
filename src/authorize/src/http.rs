//! URL and header translation
//!
//! Rebuilds the request URL and header map the proxy forwarded in its check
//! request. The proxy embeds the query string in the path, so the path is
//! split on the first `?` and the query is re-encoded into canonical form.

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::check::{CheckRequest, HttpRequest};
use crate::client_cert::ClientCertificateInfo;
use crate::config::RuntimeFlags;
use crate::error::Result;

/// Header carrying the proxy-assigned request id
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Everything except RFC 3986 unreserved characters
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Canonical URL of a checked request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestUrl {
    pub scheme: String,

    /// Host after domain normalization
    pub host: String,

    /// Path exactly as the proxy sent it, up to the first `?`
    pub raw_path: String,

    /// Percent-decoded path; empty when `raw_path` is not validly escaped
    pub path: String,

    /// Canonically re-encoded query string
    pub raw_query: String,
}

impl fmt::Display for RequestUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.scheme.is_empty() {
            write!(f, "{}:", self.scheme)?;
        }
        if !self.host.is_empty() {
            write!(f, "//{}", self.host)?;
        }
        f.write_str(&self.raw_path)?;
        if !self.raw_query.is_empty() {
            write!(f, "?{}", self.raw_query)?;
        }
        Ok(())
    }
}

impl Serialize for RequestUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// HTTP facts handed to the evaluation engine. Derived once per check.
#[derive(Debug, Clone, Serialize)]
pub struct RequestHttp {
    pub method: String,
    pub hostname: String,
    pub path: String,
    pub url: RequestUrl,
    pub headers: BTreeMap<String, String>,
    pub client_certificate: ClientCertificateInfo,
    pub ip: String,
}

impl RequestHttp {
    pub fn new(
        method: impl Into<String>,
        url: RequestUrl,
        headers: BTreeMap<String, String>,
        client_certificate: ClientCertificateInfo,
        ip: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            hostname: hostname(&url.host).to_string(),
            path: url.path.clone(),
            url,
            headers,
            client_certificate,
            ip: ip.into(),
        }
    }
}

/// The checked request as seen by the session store and token exchange
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    pub method: String,
    pub url: RequestUrl,

    /// Host exactly as the proxy sent it
    pub host: String,

    /// Path (with query) exactly as the proxy sent it
    pub request_uri: String,

    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl IncomingRequest {
    /// Translate the HTTP attributes of a check request
    pub fn from_check_request(request: &CheckRequest, flags: &RuntimeFlags) -> Result<Self> {
        let http = request.http()?;

        Ok(Self {
            method: http.method.clone(),
            url: check_request_url(http, flags),
            host: http.host.clone(),
            request_uri: http.path.clone(),
            headers: check_request_headers(http),
            body: http.body.clone(),
        })
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&canonical_header_key(name)).map(String::as_str)
    }

    /// Proxy-assigned request id, or a fresh one when the proxy sent none
    pub fn request_id(&self) -> String {
        match self.header(REQUEST_ID_HEADER) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Whether the client asked for a JSON response
    pub fn accepts_json(&self) -> bool {
        self.header("Accept")
            .is_some_and(|accept| accept.contains("application/json"))
    }
}

/// Reconstruct the canonical URL of a check request
pub fn check_request_url(http: &HttpRequest, flags: &RuntimeFlags) -> RequestUrl {
    let host = if flags.match_any_incoming_port {
        hostname(&http.host)
    } else {
        http.host.as_str()
    };
    let host = domains_for_url(&http.scheme, host, false)
        .into_iter()
        .next()
        .unwrap_or_default();

    let (raw_path, raw_query) = match http.path.split_once('?') {
        Some((path, query)) => (path, canonical_query(query)),
        None => (http.path.as_str(), String::new()),
    };

    RequestUrl {
        scheme: http.scheme.clone(),
        host,
        raw_path: raw_path.to_string(),
        path: path_unescape(raw_path).unwrap_or_default(),
        raw_query,
    }
}

/// Copy check request headers under canonical names; the last value wins
pub fn check_request_headers(http: &HttpRequest) -> BTreeMap<String, String> {
    http.headers
        .iter()
        .map(|h| (canonical_header_key(&h.key), h.value.clone()))
        .collect()
}

/// Domains a URL can be reached under, most canonical first.
///
/// Layered schemes (`tcp+https`) keep the host verbatim, as does a host with
/// a non-default port. Otherwise the default port is dropped.
pub fn domains_for_url(scheme: &str, host: &str, include_default_port: bool) -> Vec<String> {
    if scheme.starts_with("tcp+") || scheme.starts_with("udp+") {
        return vec![host.to_string()];
    }

    let default_port = if scheme == "http" { "80" } else { "443" };

    if let Some((_, port)) = split_host_port(host) {
        if port != default_port {
            return vec![host.to_string()];
        }
    }

    let name = hostname(host);
    if include_default_port {
        vec![name.to_string(), join_host_port(name, default_port)]
    } else {
        vec![name.to_string()]
    }
}

/// Host without its port (and without IPv6 brackets)
pub fn hostname(host: &str) -> &str {
    if let Some((name, _)) = split_host_port(host) {
        return name;
    }
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

fn split_host_port(host: &str) -> Option<(&str, &str)> {
    if let Some(rest) = host.strip_prefix('[') {
        let (name, after) = rest.split_once(']')?;
        return Some((name, after.strip_prefix(':')?));
    }

    let (name, port) = host.rsplit_once(':')?;
    if name.contains(':') {
        // bare IPv6 literal
        return None;
    }
    Some((name, port))
}

fn join_host_port(name: &str, port: &str) -> String {
    if name.contains(':') {
        format!("[{}]:{}", name, port)
    } else {
        format!("{}:{}", name, port)
    }
}

/// Parse and re-encode a query string.
///
/// Keys are sorted bytewise; values of a repeated key keep their relative
/// order. Pairs that contain `;` or are not validly escaped are dropped.
/// Escaped bytes that are not UTF-8 survive re-encoding unchanged.
pub fn canonical_query(raw: &str) -> String {
    let mut values: BTreeMap<Vec<u8>, Vec<Vec<u8>>> = BTreeMap::new();

    for pair in raw.split('&') {
        if pair.is_empty() || pair.contains(';') {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let (Some(key), Some(value)) = (query_unescape_bytes(key), query_unescape_bytes(value)) else {
            continue;
        };
        values.entry(key).or_default().push(value);
    }

    values
        .iter()
        .flat_map(|(key, vs)| {
            vs.iter()
                .map(move |v| format!("{}={}", query_escape_bytes(key), query_escape_bytes(v)))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Escape a query component (`+` for spaces)
pub fn query_escape(s: &str) -> String {
    query_escape_bytes(s.as_bytes())
}

fn query_escape_bytes(bytes: &[u8]) -> String {
    percent_encode(bytes, QUERY_COMPONENT)
        .to_string()
        .replace("%20", "+")
}

/// Strictly unescape a query component; `+` decodes to a space.
///
/// `None` when an escape is malformed or the result is not UTF-8.
pub fn query_unescape(s: &str) -> Option<String> {
    query_unescape_bytes(s).and_then(|bytes| String::from_utf8(bytes).ok())
}

fn query_unescape_bytes(s: &str) -> Option<Vec<u8>> {
    if !valid_escapes(s) {
        return None;
    }
    Some(percent_decode_str(&s.replace('+', " ")).collect())
}

/// Strictly unescape a path; `+` is kept literally.
///
/// Bytes that are not UTF-8 decode to U+FFFD.
pub fn path_unescape(s: &str) -> Option<String> {
    if !valid_escapes(s) {
        return None;
    }
    Some(percent_decode_str(s).decode_utf8_lossy().into_owned())
}

fn valid_escapes(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
            if !valid {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

/// MIME canonical form of a header name (`content-type` -> `Content-Type`).
///
/// Names containing characters outside the HTTP token set, such as pseudo
/// headers (`:authority`), are returned unchanged.
pub fn canonical_header_key(key: &str) -> String {
    if key.is_empty() || !key.bytes().all(is_token_byte) {
        return key.to_string();
    }

    let mut upper = true;
    key.chars()
        .map(|c| {
            let mapped = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            mapped
        })
        .collect()
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
