use serde::Serialize;
use thiserror::Error;

/// Stable failure classification reported across the tool boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ErrorKind {
    MissingCredential,
    Unauthorized,
    NotFound,
    UpstreamError,
    TransportError,
    InvalidArgument,
    MissingIdentifier,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingCredential => "MissingCredential",
            Self::Unauthorized => "Unauthorized",
            Self::NotFound => "NotFound",
            Self::UpstreamError => "UpstreamError",
            Self::TransportError => "TransportError",
            Self::InvalidArgument => "InvalidArgument",
            Self::MissingIdentifier => "MissingIdentifier",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum BloomeoError {
    #[error(
        "No bearer token available. Pass bearer_token, call set_bearer_token, or set BLOOMEO_BEARER_TOKEN."
    )]
    MissingCredential,

    #[error("Bloomeo rejected the credential (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Bloomeo API error: {message}")]
    Api { message: String },

    #[error("Bloomeo API returned malformed JSON: {source}")]
    ApiJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode the tool result: {source}")]
    ResultEncoding {
        #[source]
        source: serde_json::Error,
    },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(#[source] reqwest::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No {identifier} could be extracted from the experiment task data")]
    MissingIdentifier { identifier: String },
}

impl BloomeoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCredential => ErrorKind::MissingCredential,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Api { .. } | Self::ApiJson { .. } | Self::ResultEncoding { .. } => {
                ErrorKind::UpstreamError
            }
            Self::Transport { .. } | Self::HttpClientInit(_) => ErrorKind::TransportError,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::MissingIdentifier { .. } => ErrorKind::MissingIdentifier,
        }
    }

    /// JSON body returned to tool callers: a stable kind plus a readable message.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        })
    }
}

impl From<reqwest::Error> for BloomeoError {
    fn from(err: reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Self::Transport {
            message: format!("{reason} ({})", err.without_url()),
        }
    }
}

impl From<reqwest_middleware::Error> for BloomeoError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            reqwest_middleware::Error::Middleware(err) => Self::Transport {
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_variants_share_a_kind() {
        let api = BloomeoError::Api {
            message: "HTTP 502".into(),
        };
        let json = BloomeoError::ApiJson {
            source: serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
        };
        assert_eq!(api.kind(), ErrorKind::UpstreamError);
        assert_eq!(json.kind(), ErrorKind::UpstreamError);
    }

    #[test]
    fn local_encoding_failure_does_not_blame_the_api() {
        let err = BloomeoError::ResultEncoding {
            source: serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Failed to encode the tool result"));
        assert!(!msg.contains("Bloomeo API"));
    }

    #[test]
    fn payload_carries_kind_and_message() {
        let err = BloomeoError::NotFound {
            resource: "experiment X".into(),
        };
        let payload = err.to_payload();
        assert_eq!(payload["error"]["kind"], "NotFound");
        assert_eq!(payload["error"]["message"], "experiment X not found");
    }

    #[test]
    fn missing_credential_message_names_every_source() {
        let msg = BloomeoError::MissingCredential.to_string();
        assert!(msg.contains("bearer_token"));
        assert!(msg.contains("set_bearer_token"));
        assert!(msg.contains("BLOOMEO_BEARER_TOKEN"));
    }
}
