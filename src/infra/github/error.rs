use metrics::counter;
use thiserror::Error;
use tracing::warn;

const METRIC_REMOTE_FAILURE: &str = "marginalia_remote_failure_total";

/// Why a call to the discussion API failed. Never leaves the client.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("rate limited by remote (status {status})")]
    RateLimited { status: u16 },
    #[error("credential rejected by remote")]
    Unauthorized,
    #[error("remote responded with status {status}")]
    Status { status: u16 },
    #[error("category `{0}` does not exist in the repository")]
    UnknownCategory(String),
    #[error("malformed remote response: {0}")]
    Malformed(String),
    #[error("remote request failed: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RemoteError::RateLimited { .. } => "rate_limited",
            RemoteError::Unauthorized => "unauthorized",
            RemoteError::Status { .. } => "status",
            RemoteError::UnknownCategory(_) => "unknown_category",
            RemoteError::Malformed(_) => "malformed",
            RemoteError::Transport(_) => "transport",
        }
    }
}

/// Log and count a failed call, turning it into "try later".
pub(super) fn absorb<T>(operation: &'static str, result: Result<T, RemoteError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            counter!(METRIC_REMOTE_FAILURE, "operation" => operation, "kind" => err.kind())
                .increment(1);
            warn!(
                operation,
                kind = err.kind(),
                error = %err,
                "Discussion API call failed"
            );
            None
        }
    }
}
