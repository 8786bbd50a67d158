use thiserror::Error;

use crate::resilience::CircuitOpenError;

/// Failure of a single call to an external service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} is not configured: {reason}")]
    NotConfigured { service: String, reason: String },

    #[error("{service} returned HTTP {status}: {body}")]
    Http {
        service: String,
        status: u16,
        body: String,
    },

    #[error("request to {service} failed: {source}")]
    Request {
        service: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
}

impl ServiceError {
    pub fn not_configured(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotConfigured {
            service: service.into(),
            reason: reason.into(),
        }
    }

    pub fn request(service: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Request {
            service: service.into(),
            source,
        }
    }

    pub fn invalid_response(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Client errors other than timeouts and rate limits are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotConfigured { .. } | Self::CircuitOpen(_) => false,
            Self::Http { status, .. } => {
                *status == 408 || *status == 429 || !(400..500).contains(status)
            }
            Self::Request { .. } | Self::InvalidResponse { .. } => true,
        }
    }
}

/// Turn a non-2xx response into [`ServiceError::Http`].
pub(crate) async fn check_status(
    service: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, ServiceError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(ServiceError::Http {
        service: service.to_string(),
        status,
        body,
    })
}
