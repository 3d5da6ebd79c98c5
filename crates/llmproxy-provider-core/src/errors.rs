//! The error-kind taxonomy of §7: the distinctions the failover engine and
//! the pool's health tracking must make, independent of how any particular
//! upstream spells its status codes.

use http::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("network error")]
    NetworkError,
    #[error("timeout")]
    Timeout,
    #[error("upstream server error")]
    UpstreamServerError,
    #[error("rate limited")]
    RateLimited,
    #[error("upstream auth error")]
    UpstreamAuthError,
    #[error("oauth unavailable")]
    OAuthUnavailable,
    #[error("client request error")]
    ClientRequestError,
    #[error("model not routed")]
    ModelNotRouted,
    #[error("all providers exhausted")]
    AllProvidersExhausted,
    #[error("stream aborted mid-flight")]
    StreamAbortedMidFlight,
}

impl ErrorKind {
    /// Classifies an upstream HTTP status the way §4.6/§7 require: only
    /// certain kinds count against a provider's health, and 400/404/422 are
    /// request-shape problems that must not trigger failover.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            429 => ErrorKind::RateLimited,
            401 | 403 => ErrorKind::UpstreamAuthError,
            400 | 404 | 422 => ErrorKind::ClientRequestError,
            408 => ErrorKind::Timeout,
            500..=599 => ErrorKind::UpstreamServerError,
            _ => ErrorKind::ClientRequestError,
        }
    }

    /// Whether this kind should advance the failover loop to the next
    /// candidate provider rather than being surfaced immediately.
    /// `OAuthUnavailable` is included even though it never counts against
    /// provider health (§4.2): it means *this* candidate's credential
    /// couldn't be resolved, which says nothing about whether the next
    /// candidate can authenticate fine.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::Timeout
                | ErrorKind::UpstreamServerError
                | ErrorKind::RateLimited
                | ErrorKind::UpstreamAuthError
                | ErrorKind::OAuthUnavailable
        )
    }

    /// Whether an occurrence of this kind counts against
    /// `consecutive_failures` for the primary health circuit (§4.2: client
    /// errors other than 401/408/429 do not mark a provider unhealthy).
    pub fn counts_against_health(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::Timeout
                | ErrorKind::UpstreamServerError
                | ErrorKind::RateLimited
                | ErrorKind::UpstreamAuthError
        )
    }

    /// The status a fully-exhausted attempt loop returns to the client.
    pub fn client_status(self) -> StatusCode {
        match self {
            ErrorKind::NetworkError => StatusCode::BAD_GATEWAY,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::UpstreamServerError => StatusCode::BAD_GATEWAY,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::UpstreamAuthError => StatusCode::UNAUTHORIZED,
            ErrorKind::OAuthUnavailable => StatusCode::UNAUTHORIZED,
            ErrorKind::ClientRequestError => StatusCode::BAD_REQUEST,
            ErrorKind::ModelNotRouted => StatusCode::NOT_FOUND,
            ErrorKind::AllProvidersExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::StreamAbortedMidFlight => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UpstreamServerError => "upstream_server_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UpstreamAuthError => "upstream_auth_error",
            ErrorKind::OAuthUnavailable => "oauth_unavailable",
            ErrorKind::ClientRequestError => "client_request_error",
            ErrorKind::ModelNotRouted => "model_not_routed",
            ErrorKind::AllProvidersExhausted => "all_providers_exhausted",
            ErrorKind::StreamAbortedMidFlight => "stream_aborted_mid_flight",
        }
    }
}
