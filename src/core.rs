// Core error types and protocol constants
use std::time::Duration;

use thiserror::Error;

// Fatal errors: configuration, transport and randomness failures end the run
#[derive(Debug, Error)]
pub enum WsctlError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("invalid fields document: {0}")]
    Fields(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{operation} timed out after {}ms", timeout.as_millis())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("failed to get random bytes: {0}")]
    Randomness(#[from] rand::Error),

    // Recovered by the response manager, never reported as fatal
    #[error(transparent)]
    Auth(#[from] AuthError),
}

pub type Result<T> = std::result::Result<T, WsctlError>;

// Protocol-level failures while answering a challenge. These never end the run:
// the response that was already received simply stands as the final answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("challenge is not a Digest challenge")]
    NotDigest,

    #[error("challenge is missing the {0} parameter")]
    MissingParameter(&'static str),

    #[error("request line does not have method, uri and version")]
    MalformedRequestLine,

    #[error("request has no CSeq header")]
    MissingSequenceHeader,

    #[error("malformed CSeq header: {0}")]
    MalformedSequenceHeader(String),
}

// Header name tokens, matched literally (colon included) against raw lines
pub struct HeaderName;

impl HeaderName {
    pub const CSEQ: &'static str = "CSeq:";
    pub const CSEQ_COMPACT: &'static str = "s:";
    pub const WWW_AUTHENTICATE: &'static str = "WWW-Authenticate:";
    pub const PROXY_AUTHENTICATE: &'static str = "Proxy-Authenticate:";
    pub const AUTHORIZATION: &'static str = "Authorization:";
    pub const PROXY_AUTHORIZATION: &'static str = "Proxy-Authorization:";
}

// Status line prefixes that open a challenge
pub const STATUS_UNAUTHORIZED: &[u8] = b"SIP/2.0 401 ";
pub const STATUS_PROXY_AUTH_REQUIRED: &[u8] = b"SIP/2.0 407 ";

// Responses of this length or less are never inspected for challenges
pub const MIN_CHALLENGE_RESPONSE_LEN: usize = 24;

// Largest frame payload surfaced by a single receive
pub const RECEIVE_BUFFER_SIZE: usize = 8192;

pub const DEFAULT_AUTH_USERNAME: &str = "test";
pub const SIP_SUBPROTOCOL: &str = "sip";
pub const USER_AGENT: &str = "wsctl";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = WsctlError::Timeout {
            operation: "receive",
            timeout: Duration::from_millis(20000),
        };
        assert_eq!(err.to_string(), "receive timed out after 20000ms");
    }

    #[test]
    fn test_fields_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: WsctlError = parse.unwrap_err().into();
        assert!(matches!(err, WsctlError::Fields(_)));
    }

    #[test]
    fn test_auth_error_display() {
        assert_eq!(
            AuthError::MissingParameter("nonce").to_string(),
            "challenge is missing the nonce parameter"
        );
    }
}
