use crate::foundation::core::UnitId;

/// Convenience result type used across bandtrace.
pub type BandResult<T> = Result<T, BandError>;

/// Error taxonomy for orchestration and compute units.
///
/// Every variant is fatal for the orchestration that produced it: there is no local recovery,
/// restart or band reassignment.
#[derive(thiserror::Error, Debug)]
pub enum BandError {
    /// Invalid caller input, or an operation requested in the wrong orchestrator state.
    #[error("validation error: {0}")]
    Validation(String),

    /// A compute unit could not be created, or failed before reporting readiness.
    #[error("spawn failure: unit {unit}: {message}")]
    SpawnFailure {
        /// Unit that failed to come up.
        unit: UnitId,
        /// Collaborator-provided description.
        message: String,
    },

    /// A compute unit faulted after it became ready.
    #[error("unit fault: unit {unit}: {message}")]
    UnitFault {
        /// Faulting unit.
        unit: UnitId,
        /// Collaborator-provided description.
        message: String,
    },

    /// A unit event violated the protocol (unknown id, duplicate readiness, bad payload).
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// The orchestrator was pumped again after a fatal error ended the run.
    #[error("orchestration halted after a fatal error")]
    Halted,

    /// Errors when serializing or deserializing job descriptions.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BandError {
    /// Build a [`BandError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`BandError::SpawnFailure`] value.
    pub fn spawn_failure(unit: UnitId, msg: impl Into<String>) -> Self {
        Self::SpawnFailure {
            unit,
            message: msg.into(),
        }
    }

    /// Build a [`BandError::UnitFault`] value.
    pub fn unit_fault(unit: UnitId, msg: impl Into<String>) -> Self {
        Self::UnitFault {
            unit,
            message: msg.into(),
        }
    }

    /// Build a [`BandError::MalformedEvent`] value.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEvent(msg.into())
    }

    /// Build a [`BandError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }

    /// Unit the error originated from, when it is attributable to one.
    pub fn unit(&self) -> Option<UnitId> {
        match self {
            Self::SpawnFailure { unit, .. } | Self::UnitFault { unit, .. } => Some(*unit),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
