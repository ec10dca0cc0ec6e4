//! Primary/secondary forwarding.
//!
//! Every request is tried against the primary upstream first. The result is
//! classified; only a [`Outcome::RetryableFailure`] sends the same request to
//! the secondary, whose result is final. Attempts are strictly sequential and
//! there are never more than two per request.

use crate::errors::ProxyError;
use crate::headers::inbound_response_headers;
use crate::metrics_defs::{UPSTREAM_ATTEMPTS, UPSTREAM_FAILOVERS};
use crate::upstreams::{Upstream, Upstreams};
use http::{HeaderMap, Method};
use hyper::body::Bytes;
use hyper::Response;
use std::time::Duration;
use tokio::time::timeout;

/// How an upstream attempt ended, as far as failover is concerned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Any status below 400, redirects included
    Success,
    /// 4xx: an authoritative answer about the request itself
    ClientError,
    /// 5xx or a transport failure
    RetryableFailure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::ClientError => "client_error",
            Outcome::RetryableFailure => "retryable_failure",
        }
    }
}

pub fn classify<B>(result: &Result<Response<B>, ProxyError>) -> Outcome {
    match result {
        Ok(response) if response.status().is_server_error() => Outcome::RetryableFailure,
        Ok(response) if response.status().is_client_error() => Outcome::ClientError,
        Ok(_) => Outcome::Success,
        Err(_) => Outcome::RetryableFailure,
    }
}

/// A request ready to be replayed against either upstream.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub method: Method,
    /// Path relative to the upstream base, query included
    pub path_and_query: String,
    pub headers: HeaderMap,
    /// `None` for GET and HEAD
    pub body: Option<Bytes>,
}

pub struct FailoverForwarder {
    client: reqwest::Client,
    upstreams: Upstreams,
    timeout: Option<Duration>,
}

impl FailoverForwarder {
    pub fn new(upstreams: Upstreams, timeout: Option<Duration>) -> Result<Self, ProxyError> {
        // Redirects go back to the caller untouched
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::InternalError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            upstreams,
            timeout,
        })
    }

    pub async fn forward(&self, request: &OutboundRequest) -> Result<Response<Bytes>, ProxyError> {
        let primary = self.attempt(&self.upstreams.primary, request).await;

        match classify(&primary) {
            Outcome::Success | Outcome::ClientError => return primary,
            Outcome::RetryableFailure => {}
        }

        match &primary {
            Ok(response) => tracing::warn!(
                status = %response.status(),
                path = %request.path_and_query,
                "primary upstream failed, failing over to secondary"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                path = %request.path_and_query,
                "primary upstream unreachable, failing over to secondary"
            ),
        }
        shared::counter!(UPSTREAM_FAILOVERS).increment(1);

        let secondary = self.attempt(&self.upstreams.secondary, request).await;
        if let Err(e) = &secondary {
            tracing::error!(error = %e, path = %request.path_and_query, "secondary upstream failed");
        }
        secondary
    }

    async fn attempt(
        &self,
        upstream: &Upstream,
        request: &OutboundRequest,
    ) -> Result<Response<Bytes>, ProxyError> {
        let result = match self.timeout {
            Some(limit) => timeout(limit, self.send(upstream, request))
                .await
                .unwrap_or_else(|_| Err(ProxyError::UpstreamTimeout(upstream.name().to_string()))),
            None => self.send(upstream, request).await,
        };

        shared::counter!(
            UPSTREAM_ATTEMPTS,
            "upstream" => upstream.name(),
            "outcome" => classify(&result).as_str()
        )
        .increment(1);

        result
    }

    /// One request/response cycle, body collected.
    async fn send(
        &self,
        upstream: &Upstream,
        request: &OutboundRequest,
    ) -> Result<Response<Bytes>, ProxyError> {
        let url = upstream.url_for(&request.path_and_query);
        tracing::debug!(upstream = upstream.name(), %url, method = %request.method, "sending upstream request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            ProxyError::UpstreamRequestFailed(upstream.name().to_string(), e.to_string())
        })?;

        let status = response.status();
        let version = response.version();
        let mut headers = response.headers().clone();
        inbound_response_headers(&mut headers, version, &request.method);

        let body = response.bytes().await.map_err(|e| {
            ProxyError::ResponseBodyError(upstream.name().to_string(), e.to_string())
        })?;

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
