//! Tower middleware wrapping a protected handler with admission control.
//!
//! The layer doesn't know how limiting works; it resolves the client
//! identity and the rate-limited parameter, asks the [`AdmissionControl`]
//! for a verdict, and either forwards the request unchanged or
//! short-circuits with a 429 JSON denial naming the tier that refused.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response, StatusCode};
use serde::Serialize;
use tower_layer::Layer;
use tower_service::Service;

use crate::identity::client_identity;
use crate::service::{AdmissionControl, LimitTier, Verdict};

/// Body shape of a 429 denial: a detail string and a message naming the
/// denying tier.
#[derive(Debug, Serialize)]
struct DenialBody<'a> {
    error: &'a str,
    message: &'static str,
}

// Serializing two strings cannot realistically fail, but limiter
// bookkeeping must never surface as a fault: keep a canned body anyway.
const FALLBACK_BODY: &[u8] = br#"{"error":"rate limit exceeded","message":"Too Many Requests"}"#;

/// A layer that enforces two-tier admission control using an
/// [`AdmissionControl`] service.
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    control: Arc<AdmissionControl>,
}

impl AdmissionLayer {
    /// Create a layer sharing the given service instance.
    pub fn new(control: Arc<AdmissionControl>) -> Self {
        Self { control }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService { inner, control: Arc::clone(&self.control) }
    }
}

/// Middleware service produced by [`AdmissionLayer`].
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    control: Arc<AdmissionControl>,
}

impl<S, B, RB> Service<Request<B>> for AdmissionService<S>
where
    S: Service<Request<B>, Response = Response<RB>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    RB: From<Bytes> + Send + 'static,
{
    type Response = Response<RB>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let client = client_identity(&req);
        let param = query_param(req.uri().query(), &self.control.settings().param_name);

        // The verdict is synchronous (lock-based, no I/O), so the decision
        // happens here and only the allowed path owns a real future.
        match self.control.admit(&client, param.as_deref()) {
            Verdict::Allowed => Box::pin(self.inner.call(req)),
            Verdict::Denied(tier) => {
                let response = deny_response(&self.control, tier);
                Box::pin(std::future::ready(Ok(response)))
            }
        }
    }
}

/// First value of the named query parameter, percent-decoded.
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| &**key == name)
        .map(|(_, value)| value.into_owned())
}

fn deny_response<RB>(control: &AdmissionControl, tier: LimitTier) -> Response<RB>
where
    RB: From<Bytes>,
{
    let detail = control.denial_detail(tier);
    let body = DenialBody { error: &detail, message: tier.message() };
    let payload = serde_json::to_vec(&body).unwrap_or_else(|_| FALLBACK_BODY.to_vec());

    let mut response = Response::new(RB::from(Bytes::from(payload)));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
