use crate::record::ModuleId;

/// Errors produced by the module resolution engine.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("module entrypoint is already intercepted by `{owner}`")]
    EntrypointTaken { owner: String },

    #[error("filter `{filter}` failed: {fault}")]
    Predicate {
        filter: String,
        #[source]
        fault: PredicateFault,
    },

    #[error("invalid dependency pattern: {0}")]
    InvalidPattern(String),

    #[error("lazy handle is not resolved yet")]
    Unresolved,

    #[error("`{0}` is not callable")]
    NotCallable(String),

    #[error("module {0} is not defined")]
    UnknownModule(ModuleId),
}

pub type Result<T> = std::result::Result<T, ModuleError>;

/// A custom predicate could not evaluate a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct PredicateFault {
    pub reason: String,
}

impl PredicateFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A module factory failed while the host was initializing it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FactoryError {
    pub message: String,
}

impl FactoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
