use thiserror::Error;

/// Failures raised while talking to the process engine.
///
/// A 404 on lookups is not an error: those calls return `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Connection failures, TLS problems and per-call timeouts.
    #[error("engine request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("engine login rejected with HTTP {status}")]
    LoginRejected { status: u16 },

    #[error("engine returned HTTP {status} for {operation}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    /// The engine never creates variables on update, so the variable must already be declared.
    #[error("case variable '{name}' not found in case {case_id}")]
    VariableNotFound { case_id: String, name: String },

    #[error("unexpected engine response for {0}")]
    UnexpectedShape(String),
}

impl EngineError {
    /// True for failures worth treating as transient by the caller.
    pub fn is_timeout(&self) -> bool {
        match self {
            EngineError::Transport(err) => err.is_timeout() || err.is_connect(),
            EngineError::Status { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            EngineError::LoginRejected { status } | EngineError::Status { status, .. } => {
                Some(*status)
            }
            EngineError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
