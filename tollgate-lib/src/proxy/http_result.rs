use http::StatusCode;
use thiserror::Error;

/// HTTP result type, T is typically a hyper::Response
/// HttpError is used to generate a synthetic error response
pub(crate) type HttpResult<T> = std::result::Result<T, HttpError>;

/// Describes things that can go wrong while forwarding an admitted request
#[derive(Debug, Error, Clone)]
pub enum HttpError {
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Failed to get response from upstream: {0}")]
    FailedToGetResponseFromUpstream(String),

    #[error("Upstream did not answer within {0} ms")]
    UpstreamTimeout(u64),
}

impl HttpError {
    /// Label for the `error_type` metric attribute
    pub fn error_type(&self) -> &'static str {
        match self {
            HttpError::InvalidUri(_) => "invalid_uri",
            HttpError::FailedToGetResponseFromUpstream(_) => "upstream_error",
            HttpError::UpstreamTimeout(_) => "upstream_timeout",
        }
    }
}

impl From<&HttpError> for StatusCode {
    fn from(e: &HttpError) -> StatusCode {
        match e {
            HttpError::InvalidUri(_) => StatusCode::BAD_REQUEST,
            HttpError::FailedToGetResponseFromUpstream(_) => StatusCode::BAD_GATEWAY,
            HttpError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}
