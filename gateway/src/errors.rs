use hyper::StatusCode;
use thiserror::Error;

/// Errors that can occur while serving a gateway request
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Failed to read response body from {0}: {1}")]
    ResponseBodyError(String, String),

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ProxyError {
    /// Status reported to the caller when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamRequestFailed(..) | ProxyError::ResponseBodyError(..) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::RequestBodyError(_) => StatusCode::BAD_REQUEST,
            ProxyError::Io(_) | ProxyError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
