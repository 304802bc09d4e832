//! Error taxonomy
//!
//! One enum per failure class. Every class is recovered at its own boundary:
//! parse errors drop a line, classification errors become "not an ad",
//! registration errors leave a subtree unscreened, capture errors discard the
//! element. Only timeouts are handed back to the caller to decide on.

use std::time::Duration;

/// A filter-list line that could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Empty rule")]
    Empty,
    #[error("Unsupported filter syntax: {0}")]
    Unsupported(String),
    #[error("Invalid URL pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Invalid element selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("Invalid domain list '{0}'")]
    InvalidDomains(String),
}

/// The background classification round trip failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassificationError {
    #[error("Classification channel failed: {0}")]
    Channel(String),
    #[error("Background reported an error: {0}")]
    Rejected(String),
    #[error("Malformed classification response: {0}")]
    Malformed(String),
}

/// A child frame could not be confirmed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("Frame element has no browsing context")]
    NoContext,
    #[error("Child did not answer after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("Child refused registration: {0}")]
    Refused(String),
}

/// A cross-frame request expired before its response arrived.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Request '{request}' timed out after {after:?}")]
pub struct TimeoutError {
    pub request: String,
    pub after: Duration,
}

/// A confirmed ad could not be captured.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("No capture target")]
    NoTarget,
    #[error("No way to capture <{0}> element")]
    Unsupported(String),
    #[error("Ignoring frame smaller than {minimum} pixels")]
    TooSmall { minimum: u64 },
    #[error("Screenshot capture of nested frames is not supported")]
    NotTopLevel,
    #[error("Encoding graphic failed: {0}")]
    Encode(String),
    #[error("Screenshot request failed: {0}")]
    Screenshot(String),
    #[error("Screenshot was not stable after {0} attempts")]
    Unstable(u32),
    #[error("Element did not load: {0}")]
    Load(String),
}

/// Unrecoverable for the current operation, e.g. a frame with no window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Fatal: {0}")]
pub struct FatalError(pub String);

/// A cross-frame envelope could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Message is not valid JSON: {0}")]
    NotJson(String),
    #[error("Unknown message type '{0}'")]
    UnknownType(String),
    #[error("Bad payload for '{kind}': {reason}")]
    BadPayload { kind: String, reason: String },
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Response type '{got}' does not answer '{expected}'")]
    Mismatch { expected: String, got: String },
}

/// The DOM abstraction reported a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("Load failed: {0}")]
    LoadFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = TimeoutError {
            request: "ping".to_string(),
            after: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "Request 'ping' timed out after 10s");
    }

    #[test]
    fn test_capture_error_message() {
        assert_eq!(CaptureError::NoTarget.to_string(), "No capture target");
        assert_eq!(
            CaptureError::TooSmall { minimum: 512 }.to_string(),
            "Ignoring frame smaller than 512 pixels"
        );
    }
}
