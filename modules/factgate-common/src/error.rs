use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codes describing why a fact observed on a channel was not usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConformityViolation {
    /// The fact carries no resolvable type name.
    UnidentifiedEventType,
    /// The fact carries a type name but its payload does not match that type.
    InvalidEventStructure,
    /// The fact carries no usable identity.
    UnidentifiedFact,
}

impl ConformityViolation {
    pub fn code(&self) -> &'static str {
        match self {
            ConformityViolation::UnidentifiedEventType => "UNIDENTIFIED_EVENT_TYPE",
            ConformityViolation::InvalidEventStructure => "INVALID_EVENT_STRUCTURE",
            ConformityViolation::UnidentifiedFact => "UNIDENTIFIED_FACT",
        }
    }
}

impl fmt::Display for ConformityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Error, Debug)]
pub enum KernelError {
    /// Construction-time contract violation. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An independent copy could not be produced.
    #[error("immutability failure: {0}")]
    ImmutabilityFailure(String),

    #[error("duplicate attribute: {0}")]
    DuplicateAttribute(String),

    #[error("{violation}: {detail}")]
    Conformity {
        violation: ConformityViolation,
        detail: String,
    },

    #[error("invalid presence announcement: {0}")]
    InvalidAnnouncement(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KernelError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        KernelError::InvalidArgument(msg.into())
    }

    pub fn conformity(violation: ConformityViolation, detail: impl Into<String>) -> Self {
        KernelError::Conformity {
            violation,
            detail: detail.into(),
        }
    }
}

pub type KernelResult<T> = std::result::Result<T, KernelError>;
