//! Error types for clusterd

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Store Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Volume not found: {0}")]
    VolumeNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // === Transaction Context Errors ===
    #[error("Key not found in transaction context: {0}")]
    KeyNotFound(String),

    #[error("Failed to decode context key {key}: {reason}")]
    Decode { key: String, reason: String },

    // === Lock Errors ===
    #[error("Timed out acquiring lock on {0}")]
    LockTimeout(String),

    // === Transaction Errors ===
    #[error("Step function not found: {0}")]
    StepFuncNotFound(String),

    #[error("Duplicate {kind} registration: {name}")]
    DuplicateRegistration { kind: &'static str, name: String },

    #[error("Step {step} failed on node {node}: {source}")]
    StepFailed {
        step: String,
        node: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Dispatch to node {node} failed: {reason}")]
    RemoteDispatch { node: String, reason: String },

    #[error("Undo of {step} failed on node {node}: {reason}")]
    UndoFailed {
        step: String,
        node: String,
        reason: String,
    },

    #[error("Transaction cancelled")]
    Cancelled,

    // === Daemon Errors ===
    #[error("Daemon unreachable: {0}")]
    DaemonUnreachable(String),

    #[error("Process already running: {0}")]
    AlreadyRunning(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    // === Request Preconditions ===
    #[error("Volume already started: {0}")]
    AlreadyStarted(String),

    #[error("Volume already stopped: {0}")]
    AlreadyStopped(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::LockTimeout(_)
                | Error::StoreUnavailable(_)
                | Error::RemoteDispatch { .. }
        )
    }

    /// Innermost cause, looking through step attribution
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::LockTimeout(_) => StatusCode::CONFLICT,
            Error::NotFound(_) | Error::VolumeNotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::AlreadyStarted(_)
            | Error::AlreadyStopped(_)
            | Error::InvalidOption(_)
            | Error::InvalidRequest(_)
            | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_http_mapping() {
        assert_eq!(
            Error::LockTimeout("vol1".into()).to_http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::VolumeNotFound("vol1".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::AlreadyStopped("vol1".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Rpc("boom".into()).to_http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        // a missed deadline is a server-side failure, not a slow client
        assert_eq!(
            Error::Timeout("node-2".into()).to_http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(Error::Cancelled.to_http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_step_failure_keeps_cause() {
        let err = Error::StepFailed {
            step: "vol-stop.StopBricks".into(),
            node: "node-2".into(),
            source: Box::new(Error::Rpc("brick gone".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("vol-stop.StopBricks"));
        assert!(msg.contains("node-2"));
        assert!(matches!(err.root_cause(), Error::Rpc(_)));
        assert_eq!(err.to_http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::LockTimeout("v".into()).is_retryable());
        assert!(!Error::StepFuncNotFound("x".into()).is_retryable());
    }
}
