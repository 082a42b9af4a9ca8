//! Token service error types.
//!
//! The error surface follows RFC 6750: expired and malformed bearer tokens
//! map to 401 responses with a `WWW-Authenticate` challenge, refresh
//! failures map to 400 `invalid_grant` responses with an
//! `error_description`. The transport layer that actually writes HTTP
//! responses is out of scope here; this module only provides the header
//! values and status codes it needs.

use spindrift_cluster::ClusterError;
use spindrift_store::StoreError;

/// `WWW-Authenticate` value returned for expired access tokens.
pub const EXPIRED_TOKEN_WWW_AUTH_VALUE: &str =
    "Bearer realm=\"security\", error=\"invalid_token\", error_description=\"The access token expired\"";

/// `WWW-Authenticate` value returned for malformed access tokens.
pub const MALFORMED_TOKEN_WWW_AUTH_VALUE: &str =
    "Bearer realm=\"security\", error=\"invalid_token\", error_description=\"The access token is malformed\"";

/// Errors that can occur during token service operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token service is disabled by configuration.
    #[error("tokens are not enabled")]
    Disabled,

    /// The bearer string could not be decoded into one of our tokens.
    #[error("token malformed")]
    MalformedToken,

    /// The access token is past its expiration time or has been
    /// invalidated.
    #[error("token expired")]
    TokenExpired,

    /// The refresh grant is not usable: unknown refresh token, wrong
    /// client, outside the replay window, past the 24 h ceiling, or retry
    /// budget exhausted.
    #[error("invalid_grant: {description}")]
    InvalidGrant {
        /// Detail carried in the `error_description` header.
        description: String,
    },

    /// A token document is missing a mandatory field or has an
    /// unparseable shape.
    #[error("malformed token document: {message}")]
    MalformedDocument {
        /// Description of the malformation.
        message: String,
    },

    /// The security index or key metadata is in a state that should be
    /// impossible (duplicate refresh tokens, foreign document ids, active
    /// key missing from the ring).
    #[error("security state inconsistency: {message}")]
    Inconsistency {
        /// Description of the inconsistency.
        message: String,
    },

    /// The caller supplied arguments that cannot be processed.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// A store operation failed and was not recoverable by the retry
    /// policy.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A cluster metadata submission failed.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

impl AuthError {
    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::InvalidGrant {
            description: description.into(),
        }
    }

    /// Creates a new `MalformedDocument` error.
    #[must_use]
    pub fn malformed_document(message: impl Into<String>) -> Self {
        Self::MalformedDocument {
            message: message.into(),
        }
    }

    /// Creates a new `Inconsistency` error.
    #[must_use]
    pub fn inconsistency(message: impl Into<String>) -> Self {
        Self::Inconsistency {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Returns `true` if this error denies the bearer as expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::TokenExpired)
    }

    /// Returns `true` if this is an invalid-grant refresh failure.
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::InvalidGrant { .. })
    }

    /// The HTTP status code this error maps to.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::MalformedToken | Self::TokenExpired => 401,
            Self::InvalidGrant { .. } | Self::InvalidRequest { .. } => 400,
            Self::Disabled
            | Self::MalformedDocument { .. }
            | Self::Inconsistency { .. }
            | Self::Store(_)
            | Self::Cluster(_) => 500,
        }
    }

    /// The `WWW-Authenticate` challenge for 401 responses, if any.
    #[must_use]
    pub fn www_authenticate(&self) -> Option<&'static str> {
        match self {
            Self::TokenExpired => Some(EXPIRED_TOKEN_WWW_AUTH_VALUE),
            Self::MalformedToken => Some(MALFORMED_TOKEN_WWW_AUTH_VALUE),
            _ => None,
        }
    }

    /// The `error_description` header detail for invalid-grant responses.
    #[must_use]
    pub fn error_description(&self) -> Option<&str> {
        match self {
            Self::InvalidGrant { description } => Some(description),
            _ => None,
        }
    }
}
