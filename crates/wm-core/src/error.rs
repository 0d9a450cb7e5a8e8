use std::fmt;

use crate::element::ElementId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A value the engine cannot start without is absent or zero.
    MissingConfiguration(&'static str),
    /// The pool cannot hold the requested count and growth is disabled.
    CapacityExceeded { requested: usize, capacity: usize },
    ElementNotFound(ElementId),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::MissingConfiguration(what) => {
                write!(f, "missing required configuration: {what}")
            }
            EngineError::CapacityExceeded {
                requested,
                capacity,
            } => write!(
                f,
                "pool exhausted: {requested} elements requested, capacity {capacity}"
            ),
            EngineError::ElementNotFound(id) => write!(f, "no active element with id {id}"),
        }
    }
}

impl std::error::Error for EngineError {}

pub type Result<T> = std::result::Result<T, EngineError>;
