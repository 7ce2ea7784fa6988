use thiserror::Error;

use crate::ir::MethodId;

/// Result alias for errors emitted by the flow analysis engine.
pub type FlowResult<T> = Result<T, FlowAnalysisError>;

/// Structured error type for the analysis engine and its loaders.
#[derive(Debug, Error)]
pub enum FlowAnalysisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode program: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed control flow graph for `{method}`: {reason}")]
    MalformedCfg { method: MethodId, reason: String },

    #[error("missing points-to result for `{0}`")]
    MissingPointsTo(MethodId),

    #[error("unknown method `{0}`")]
    UnknownMethod(MethodId),

    #[error("analysis cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl FlowAnalysisError {
    pub fn malformed(method: &MethodId, reason: impl Into<String>) -> Self {
        Self::MalformedCfg {
            method: method.clone(),
            reason: reason.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Convenience macro mirroring `anyhow::bail!` but returning FlowAnalysisError.
#[macro_export]
macro_rules! flow_bail {
    ($($arg:tt)*) => {
        return Err($crate::error::FlowAnalysisError::other(format!($($arg)*)));
    };
}

/// Convenience macro mirroring `anyhow::ensure!`.
#[macro_export]
macro_rules! flow_ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::flow_bail!($($arg)*);
        }
    };
}
