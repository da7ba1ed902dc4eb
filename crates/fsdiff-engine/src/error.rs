//! Engine error taxonomy.
//!
//! Operation-level POSIX failures are *data* (`OpResult::Failure`) and never
//! show up here. `EngineError` covers infrastructure faults and the one
//! signal the whole engine exists to produce: a divergence between roots.

use thiserror::Error;

use crate::outcome::OpResult;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("failed to switch identity to {user}: {source}")]
    Impersonation {
        user: String,
        #[source]
        source: std::io::Error,
    },

    /// The two roots produced non-equivalent results for the same operation.
    /// Both raw results are attached for post-mortem diagnosis.
    #[error("divergence in {op}: root_a={left:?} root_b={right:?}")]
    Divergence {
        op: String,
        left: OpResult,
        right: OpResult,
    },
}

impl EngineError {
    pub fn is_divergence(&self) -> bool {
        matches!(self, EngineError::Divergence { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divergence_is_divergence() {
        let err = EngineError::Divergence {
            op: "stat".into(),
            left: OpResult::Unit,
            right: OpResult::Failure("gone".into()),
        };
        assert!(err.is_divergence());
        assert!(!EngineError::Config("bad".into()).is_divergence());
    }

    #[test]
    fn divergence_message_names_operation() {
        let err = EngineError::Divergence {
            op: "unlink".into(),
            left: OpResult::Unit,
            right: OpResult::Failure("x".into()),
        };
        assert!(err.to_string().contains("unlink"));
    }
}
