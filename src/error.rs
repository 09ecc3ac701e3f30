use thiserror::Error;

/// Failure kinds surfaced by every engine operation.
///
/// All of them abort the whole operation; the caller's transaction boundary
/// is expected to discard whatever was written before the failure.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("operator [{operator}] is not allowed to act on task [{task_id}]")]
    Forbidden { operator: String, task_id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Raised by a store adapter, handler, hook or transaction boundary.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound { kind, id: id.to_string() }
    }

    pub fn forbidden(operator: &str, task_id: impl ToString) -> Self {
        EngineError::Forbidden {
            operator: operator.to_string(),
            task_id: task_id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
