use crate::config::{Config, HttpMethod, RouteAction};
use crate::errors::ProxyError;
use crate::failover::{FailoverForwarder, OutboundRequest};
use crate::headers::outbound_headers;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::router::{RouteDecision, Router};
use crate::session::{Credential, CredentialResolver, SessionCookieResolver};
use crate::upstreams::Upstreams;
use http::HeaderValue;
use http::header::ALLOW;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service as HyperService;
use hyper::{Request, Response, StatusCode};
use serde_json::json;
use shared::http::{make_error_response, make_json_response};
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

const ALLOWED_METHODS: &str = "GET, HEAD, POST, PUT, PATCH, DELETE, OPTIONS";

/// The public-facing gateway service
#[derive(Clone)]
pub struct GatewayService {
    inner: Arc<Inner>,
}

struct Inner {
    router: Router,
    forwarder: FailoverForwarder,
    resolver: Arc<dyn CredentialResolver>,
}

impl GatewayService {
    /// Service resolving credentials from the configured session cookie.
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        let resolver = Arc::new(SessionCookieResolver::new(&config.session));
        Self::with_resolver(config, resolver)
    }

    pub fn with_resolver(
        config: &Config,
        resolver: Arc<dyn CredentialResolver>,
    ) -> Result<Self, ProxyError> {
        let router = Router::new(&config.route_prefix, config.routes.clone());
        let forwarder = FailoverForwarder::new(
            Upstreams::from(&config.upstreams),
            config.upstreams.timeout(),
        )?;

        Ok(Self {
            inner: Arc::new(Inner {
                router,
                forwarder,
                resolver,
            }),
        })
    }

    /// Handles one request end to end. Every path yields a response.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let mut inflight = InflightRequest::start();

        let (response, action) = self.inner.dispatch(request).await;

        inflight.finish(response.status(), action);
        response
    }
}

/// Accounts for one request in `requests.inflight` and `request.duration`.
///
/// Settled on drop, so a request whose future is dropped mid-flight (client
/// disconnect) still leaves the gauge and is recorded as `cancelled`.
struct InflightRequest {
    start: Instant,
    outcome: Option<(StatusCode, &'static str)>,
}

impl InflightRequest {
    fn start() -> Self {
        shared::gauge!(REQUESTS_INFLIGHT).increment(1.0);
        Self {
            start: Instant::now(),
            outcome: None,
        }
    }

    fn finish(&mut self, status: StatusCode, action: &'static str) {
        self.outcome = Some((status, action));
    }
}

impl Drop for InflightRequest {
    fn drop(&mut self) {
        shared::gauge!(REQUESTS_INFLIGHT).decrement(1.0);

        let (status, action) = match self.outcome {
            Some((status, action)) => (status.as_u16().to_string(), action),
            None => ("cancelled".to_string(), "cancelled"),
        };
        shared::histogram!(REQUEST_DURATION, "status" => status, "action" => action)
            .record(self.start.elapsed().as_secs_f64());
    }
}

impl Inner {
    async fn dispatch<B>(&self, request: Request<B>) -> (Response<Bytes>, &'static str)
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let Ok(method) = HttpMethod::try_from(request.method()) else {
            let mut response = make_error_response(StatusCode::METHOD_NOT_ALLOWED);
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
            return (response, "rejected");
        };

        let Some(decision) = self.router.route(request.method(), request.uri()) else {
            tracing::debug!(
                method = %request.method(),
                path = %request.uri().path(),
                "No route matched"
            );
            return (make_error_response(StatusCode::NOT_FOUND), "no_route");
        };

        let action = decision.action.as_str();
        (self.forward(method, decision, request).await, action)
    }

    async fn forward<B>(
        &self,
        method: HttpMethod,
        decision: RouteDecision,
        request: Request<B>,
    ) -> Response<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let (parts, body) = request.into_parts();

        // Resolved before any upstream is contacted
        let credential = self.resolver.resolve(&parts.headers).await;

        // The orders backend identifies the caller by `x-user-sub` alone
        if decision.action == RouteAction::Authenticated
            && credential.as_ref().and_then(Credential::subject).is_none()
        {
            return make_json_response(
                StatusCode::UNAUTHORIZED,
                &json!({"message": "Unauthorized"}),
            );
        }

        let body = if method.carries_body() {
            match body.collect().await {
                Ok(collected) => Some(collected.to_bytes()),
                Err(e) => return error_response(&ProxyError::RequestBodyError(e.to_string())),
            }
        } else {
            None
        };

        let outbound = OutboundRequest {
            method: parts.method,
            path_and_query: decision.upstream_path,
            headers: outbound_headers(
                parts.headers,
                parts.version,
                credential.as_ref(),
                decision.action,
            ),
            body,
        };

        match self.forwarder.forward(&outbound).await {
            Ok(response) => response,
            Err(e) => error_response(&e),
        }
    }
}

/// JSON error body for a request that ended without an upstream response.
fn error_response(error: &ProxyError) -> Response<Bytes> {
    let status = error.status_code();
    make_json_response(
        status,
        &json!({
            "message": status.canonical_reason().unwrap_or("Error"),
            "error": error.to_string(),
        }),
    )
}

impl HyperService<Request<Incoming>> for GatewayService {
    type Response = Response<BoxBody<Bytes, ProxyError>>;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();

        Box::pin(async move {
            let response = service.handle(req).await;
            Ok(response.map(|body| Full::new(body).map_err(|e| match e {}).boxed()))
        })
    }
}
