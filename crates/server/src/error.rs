use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Upstream operation against the authorization server that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOperation {
    Token,
    Fetch,
    Accept,
    Reject,
}

impl std::fmt::Display for UpstreamOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            UpstreamOperation::Token => "token acquisition",
            UpstreamOperation::Fetch => "consent fetching",
            UpstreamOperation::Accept => "consent request acceptance",
            UpstreamOperation::Reject => "consent request rejection",
        })
    }
}

/// Failure to obtain a service token via the client-credentials grant.
///
/// `Clone` because a single in-flight refresh hands the same result to every
/// waiting caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token endpoint unreachable: {0}")]
    Transport(String),
    #[error("token endpoint gave status code {0}, but a 2xx status code was expected")]
    Status(u16),
    #[error("token endpoint returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum ConsentError {
    #[error("{message}")]
    Validation {
        consent: Option<String>,
        message: String,
    },
    #[error("An error (\"{message}\") occurred during {operation}")]
    Upstream {
        consent: Option<String>,
        operation: UpstreamOperation,
        message: String,
    },
    #[error("csrf protection is not enabled for the consent screen")]
    CsrfMissing { consent: Option<String> },
    #[error("authorization was neither granted nor denied")]
    AuthorizationUndecided { consent: Option<String> },
    #[error("unable to retrieve consent session payload: {reason}")]
    HydratorContract {
        consent: Option<String>,
        reason: String,
    },
    #[error("unable to render the consent screen: {message}")]
    Render {
        consent: Option<String>,
        message: String,
    },
    #[error("unable to fetch an initial access token after {attempts} attempts: {source}")]
    FatalStartup {
        attempts: u32,
        #[source]
        source: TokenError,
    },
}

impl ConsentError {
    pub fn validation(consent: Option<&str>, message: impl Into<String>) -> Self {
        ConsentError::Validation {
            consent: consent.map(str::to_owned),
            message: message.into(),
        }
    }

    pub fn upstream(
        consent: Option<&str>,
        operation: UpstreamOperation,
        message: impl Into<String>,
    ) -> Self {
        ConsentError::Upstream {
            consent: consent.map(str::to_owned),
            operation,
            message: message.into(),
        }
    }

    pub fn from_token_error(consent: Option<&str>, err: &TokenError) -> Self {
        Self::upstream(consent, UpstreamOperation::Token, err.to_string())
    }

    /// Consent request id the error relates to, when known.
    pub fn consent(&self) -> Option<&str> {
        match self {
            ConsentError::Validation { consent, .. }
            | ConsentError::Upstream { consent, .. }
            | ConsentError::CsrfMissing { consent }
            | ConsentError::AuthorizationUndecided { consent }
            | ConsentError::HydratorContract { consent, .. }
            | ConsentError::Render { consent, .. } => consent.as_deref(),
            ConsentError::FatalStartup { .. } => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ConsentError::Validation { .. } | ConsentError::AuthorizationUndecided { .. } => {
                StatusCode::BAD_REQUEST
            }
            ConsentError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ConsentError::CsrfMissing { .. }
            | ConsentError::HydratorContract { .. }
            | ConsentError::Render { .. }
            | ConsentError::FatalStartup { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ConsentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(consent = ?self.consent(), error = %self, "consent flow failed");
        } else {
            tracing::warn!(consent = ?self.consent(), error = %self, "consent flow rejected");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
