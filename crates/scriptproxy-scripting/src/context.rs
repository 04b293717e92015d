//! Request descriptor exposed to the request gate script

use http::header::HOST;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scheme assumed for origin-form requests, which reach the hooks after the
/// proxy has terminated TLS
pub const ORIGIN_FORM_SCHEME: &str = "https";

/// Read-only view of an intercepted request, handed to `onRequest(req)`.
///
/// Serialized into a script object map, so a script reads `req.url`,
/// `req.host` or `req.headers["user-agent"]`. Header names are lower-case;
/// repeated headers are joined with `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// HTTP method
    pub method: String,
    /// Absolute request URL, rebuilt from the `Host` header for
    /// origin-form requests
    pub url: String,
    /// URL scheme (`http`, `https`), empty if unknown
    pub scheme: String,
    /// Target host, from the URL authority or the `Host` header
    pub host: String,
    /// Request path
    pub path: String,
    /// Decoded query parameters
    pub query: BTreeMap<String, String>,
    /// HTTP version
    pub version: String,
    /// Request headers
    pub headers: BTreeMap<String, String>,
}

impl RequestDescriptor {
    /// Describe an HTTP request, assuming [`ORIGIN_FORM_SCHEME`] when the
    /// URI carries no authority
    pub fn from_request<B>(req: &http::Request<B>) -> Self {
        Self::from_request_with_scheme(req, ORIGIN_FORM_SCHEME)
    }

    /// Describe an HTTP request, using `default_scheme` to rebuild the URL of
    /// an origin-form request
    pub fn from_request_with_scheme<B>(req: &http::Request<B>, default_scheme: &str) -> Self {
        let uri = req.uri();
        let host_header = req.headers().get(HOST).and_then(|h| h.to_str().ok());

        let query = uri
            .query()
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in req.headers() {
            let value = String::from_utf8_lossy(value.as_bytes());
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert_with(|| value.into_owned());
        }

        let host = uri
            .host()
            .or_else(|| host_header.map(strip_port))
            .unwrap_or_default()
            .to_string();

        let (url, scheme) = match (uri.authority(), host_header) {
            (None, Some(authority)) => {
                let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
                (
                    format!("{default_scheme}://{authority}{path_and_query}"),
                    default_scheme.to_string(),
                )
            }
            _ => (
                uri.to_string(),
                uri.scheme_str().unwrap_or_default().to_string(),
            ),
        };

        Self {
            method: req.method().to_string(),
            url,
            scheme,
            host,
            path: uri.path().to_string(),
            query,
            version: format!("{:?}", req.version()),
            headers,
        }
    }

    /// Convert into the JSON-like value scripts receive
    pub fn to_value(&self) -> serde_json::Value {
        // A struct of strings and string maps always serializes.
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [::1]:8080
        return host.split_once(']').map_or(host, |(h, _)| &h[1..]);
    }
    host.rsplit_once(':').map_or(host, |(h, _)| h)
}
