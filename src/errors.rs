use thiserror::Error;

use crate::driver::DriverState;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Engine launch failed: {0}")]
    Launch(String),

    #[error("Driver already started")]
    AlreadyStarted,

    #[error("Cannot {operation} while driver is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: DriverState,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Step {index} ({kind}) failed: {message}")]
    Step {
        index: usize,
        kind: &'static str,
        message: String,
    },

    #[error("Engine process died during step {index}")]
    SessionDied { index: usize },

    #[error("Task cancelled at step {index}")]
    Cancelled { index: usize },

    #[error("Invalid selector: {0}")]
    Selector(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;

// Convert anyhow::Error to DriverError
impl From<anyhow::Error> for DriverError {
    fn from(err: anyhow::Error) -> Self {
        DriverError::Engine(err.to_string())
    }
}

impl DriverError {
    /// The step index a failure occurred at, for the step-scoped kinds.
    pub fn step_index(&self) -> Option<usize> {
        match self {
            DriverError::Step { index, .. }
            | DriverError::SessionDied { index }
            | DriverError::Cancelled { index } => Some(*index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_scoped_kinds_expose_their_index() {
        let err = DriverError::Step {
            index: 3,
            kind: "click",
            message: "no element matched".to_string(),
        };
        assert_eq!(err.step_index(), Some(3));
        assert_eq!(DriverError::SessionDied { index: 1 }.step_index(), Some(1));
        assert_eq!(DriverError::Cancelled { index: 0 }.step_index(), Some(0));
        assert_eq!(DriverError::AlreadyStarted.step_index(), None);
    }

    #[test]
    fn kinds_are_distinguishable_without_message_matching() {
        let err = DriverError::Timeout {
            operation: "start".to_string(),
            timeout_ms: 5000,
        };
        assert!(matches!(err, DriverError::Timeout { .. }));
        assert!(!matches!(err, DriverError::Launch(_)));
    }
}
