//! Request/response interception entry points for the proxy engine

use crate::context::RequestDescriptor;
use crate::filter::ScriptFilter;
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body::{Body, Frame};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Boxed error carried by hook bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type handed back to the proxy engine
pub type HookBody = BoxBody<Bytes, BoxError>;

/// Status of the response sent instead of a denied request
pub const BLOCKED_STATUS: StatusCode = StatusCode::FORBIDDEN;

/// Content type of the blocked response
pub const BLOCKED_CONTENT_TYPE: &str = "text/plain";

/// Body of the blocked response
pub const BLOCKED_BODY: &str = "Blocked by proxy!";

/// The two hooks the intercepting proxy calls for every flow
#[derive(Clone)]
pub struct TrafficHooks {
    filter: Arc<ScriptFilter>,
}

impl TrafficHooks {
    /// Create hooks backed by `filter`
    pub fn new(filter: Arc<ScriptFilter>) -> Self {
        Self { filter }
    }

    /// Filter behind these hooks
    pub fn filter(&self) -> &Arc<ScriptFilter> {
        &self.filter
    }

    /// Request hook.
    ///
    /// Returns the response to send instead of contacting the origin when the
    /// request script denies the request, or `None` to forward it unmodified.
    pub fn on_intercept<B>(&self, req: &Request<B>) -> Option<Response<HookBody>> {
        let descriptor = RequestDescriptor::from_request(req);

        if self.filter.evaluate_request_gate(&descriptor) {
            return None;
        }

        info!(
            method = %descriptor.method,
            url = %descriptor.url,
            "Request blocked by script"
        );
        Some(blocked_response())
    }

    /// Response hook.
    ///
    /// HTML bodies are buffered, passed through the response script and
    /// replaced with its output. Everything else keeps its original body
    /// stream. The returned response always carries a readable body.
    pub async fn on_response<B>(&self, res: Response<B>) -> Response<HookBody>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        if declares_empty_body(&res) {
            trace!("Empty response body, skipping");
            return passthrough(res);
        }

        if !is_html(res.headers()) {
            return passthrough(res);
        }

        if is_encoded(res.headers()) {
            debug!("Encoded HTML body, skipping rewrite");
            return passthrough(res);
        }

        let (mut parts, body) = res.into_parts();

        let bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let e: BoxError = e.into();
                warn!(error = %e, "Failed to read response body");
                return Response::from_parts(parts, failed_body(e));
            }
        };

        if bytes.is_empty() {
            return Response::from_parts(parts, full(bytes));
        }

        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text,
            Err(_) => {
                debug!(len = bytes.len(), "HTML body is not UTF-8, skipping rewrite");
                return Response::from_parts(parts, full(bytes));
            }
        };

        let rewritten = self.filter.evaluate_response_rewriter(text);
        if rewritten == text {
            return Response::from_parts(parts, full(bytes));
        }

        let rewritten = Bytes::from(rewritten);
        parts.headers.remove(TRANSFER_ENCODING);
        parts
            .headers
            .insert(CONTENT_LENGTH, HeaderValue::from(rewritten.len()));

        Response::from_parts(parts, full(rewritten))
    }
}

impl fmt::Debug for TrafficHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrafficHooks")
            .field("filter", &self.filter)
            .finish()
    }
}

/// The fixed response sent for a denied request
pub fn blocked_response() -> Response<HookBody> {
    let mut res = Response::new(full(Bytes::from_static(BLOCKED_BODY.as_bytes())));
    *res.status_mut() = BLOCKED_STATUS;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(BLOCKED_CONTENT_TYPE));
    res.headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(BLOCKED_BODY.len()));
    res
}

fn full(bytes: Bytes) -> HookBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}

fn passthrough<B>(res: Response<B>) -> Response<HookBody>
where
    B: Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    res.map(|body| body.map_err(Into::into).boxed())
}

/// A body that yields `err` once, so a failed read stays visible downstream
fn failed_body(err: BoxError) -> HookBody {
    let stream = futures::stream::once(futures::future::ready(
        Err::<Frame<Bytes>, BoxError>(err),
    ));
    StreamBody::new(stream).boxed()
}

fn declares_empty_body<B: Body>(res: &Response<B>) -> bool {
    let declared_zero = res
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        == Some(0);

    declared_zero || res.body().size_hint().exact() == Some(0)
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("text/html"))
        .unwrap_or(false)
}

fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| !v.trim().eq_ignore_ascii_case("identity"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhai_engine::RhaiEngineFactory;
    use crate::script::{ScriptRole, ScriptVersion};
    use crate::store::ScriptStore;
    use http_body_util::Empty;

    fn hooks() -> TrafficHooks {
        TrafficHooks::new(Arc::new(ScriptFilter::new(
            Arc::new(ScriptStore::new()),
            Arc::new(RhaiEngineFactory::new()),
        )))
    }

    fn set(hooks: &TrafficHooks, role: ScriptRole, source: &str) {
        hooks
            .filter()
            .store()
            .replace(ScriptVersion::from_file(role, source, "test.rhai"));
    }

    fn html(body: &'static str) -> Response<Full<Bytes>> {
        Response::builder()
            .header(CONTENT_TYPE, "text/html; charset=utf-8")
            .header(CONTENT_LENGTH, body.len())
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn body_bytes(res: Response<HookBody>) -> Bytes {
        res.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn test_blocked_response_shape() {
        let res = blocked_response();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(res.headers()[CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_intercept_default_forwards() {
        let hooks = hooks();
        let req = Request::get("http://example.com/").body(()).unwrap();
        assert!(hooks.on_intercept(&req).is_none());
    }

    #[tokio::test]
    async fn test_intercept_deny_blocks() {
        let hooks = hooks();
        set(&hooks, ScriptRole::RequestGate, "fn onRequest(req) { return false; }");

        let req = Request::get("http://example.com/").body(()).unwrap();
        let res = hooks.on_intercept(&req).expect("request should be blocked");
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_bytes(res).await, Bytes::from_static(b"Blocked by proxy!"));
    }

    #[tokio::test]
    async fn test_html_rewrite_updates_length() {
        let hooks = hooks();
        set(
            &hooks,
            ScriptRole::ResponseRewriter,
            r#"fn onBodyResponse(b) { b + "<!-- filtered -->" }"#,
        );

        let res = hooks.on_response(html("<p>hi</p>")).await;
        let expected = "<p>hi</p><!-- filtered -->";
        assert_eq!(res.headers()[CONTENT_LENGTH], expected.len().to_string().as_str());
        assert_eq!(body_bytes(res).await, Bytes::from_static(expected.as_bytes()));
    }

    #[tokio::test]
    async fn test_non_html_untouched() {
        let hooks = hooks();
        set(&hooks, ScriptRole::ResponseRewriter, "fn onBodyResponse(b) { \"\" }");

        let res = Response::builder()
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from_static(b"{\"a\":1}")))
            .unwrap();
        let res = hooks.on_response(res).await;
        assert_eq!(body_bytes(res).await, Bytes::from_static(b"{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_zero_length_untouched() {
        let hooks = hooks();
        set(&hooks, ScriptRole::ResponseRewriter, "fn onBodyResponse(b) { \"x\" }");

        let res = Response::builder()
            .header(CONTENT_TYPE, "text/html")
            .header(CONTENT_LENGTH, "0")
            .body(Empty::<Bytes>::new())
            .unwrap();
        let res = hooks.on_response(res).await;
        assert!(body_bytes(res).await.is_empty());
    }

    #[tokio::test]
    async fn test_encoded_html_untouched() {
        let hooks = hooks();
        set(&hooks, ScriptRole::ResponseRewriter, "fn onBodyResponse(b) { \"x\" }");

        let res = Response::builder()
            .header(CONTENT_TYPE, "text/html")
            .header(CONTENT_ENCODING, "gzip")
            .body(Full::new(Bytes::from_static(b"\x1f\x8b\x08")))
            .unwrap();
        let res = hooks.on_response(res).await;
        assert_eq!(body_bytes(res).await, Bytes::from_static(b"\x1f\x8b\x08"));
    }

    #[tokio::test]
    async fn test_invalid_utf8_untouched() {
        let hooks = hooks();
        set(&hooks, ScriptRole::ResponseRewriter, "fn onBodyResponse(b) { \"x\" }");

        let res = Response::builder()
            .header(CONTENT_TYPE, "text/html")
            .body(Full::new(Bytes::from_static(b"<p>\xff\xfe</p>")))
            .unwrap();
        let res = hooks.on_response(res).await;
        assert_eq!(body_bytes(res).await, Bytes::from_static(b"<p>\xff\xfe</p>"));
    }

    #[tokio::test]
    async fn test_script_error_keeps_body() {
        let hooks = hooks();
        set(
            &hooks,
            ScriptRole::ResponseRewriter,
            r#"fn onBodyResponse(b) { throw "bad"; }"#,
        );

        let res = hooks.on_response(html("<p>keep</p>")).await;
        assert_eq!(res.headers()[CONTENT_LENGTH], "11");
        assert_eq!(body_bytes(res).await, Bytes::from_static(b"<p>keep</p>"));
    }

    #[tokio::test]
    async fn test_failed_read_surfaces_error() {
        let hooks = hooks();
        let stream = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Frame::data(Bytes::from_static(b"<p>"))),
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset")),
        ]);
        let res = Response::builder()
            .header(CONTENT_TYPE, "text/html")
            .body(StreamBody::new(stream))
            .unwrap();

        let res = hooks.on_response(res).await;
        let err = res.into_body().collect().await.unwrap_err();
        assert!(err.to_string().contains("reset"));
    }
}
