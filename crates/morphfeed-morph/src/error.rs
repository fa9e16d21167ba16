//! Error types for morph rules and mutation cycles.
//!
//! Construction errors ([`MorphError::Path`], [`MorphError::InvalidThreshold`])
//! surface when a rule is built. Effect errors ([`MorphError::Generator`],
//! [`MorphError::DonorExhausted`], [`MorphError::Panicked`]) surface inside a
//! cycle, where they are logged and counted but never abort sibling effects.

use crate::path::PathError;

/// Errors produced while building or executing a morph rule.
#[derive(Debug, thiserror::Error)]
pub enum MorphError {
    /// The rule's path expression could not be parsed.
    #[error("invalid path: {source}")]
    Path {
        /// The underlying parse error.
        #[from]
        source: PathError,
    },

    /// The trigger probability is NaN or outside `[0, 1]`.
    #[error("rule {rule}: threshold {threshold} is outside [0, 1]")]
    InvalidThreshold {
        /// Identifier of the offending rule.
        rule: String,
        /// The rejected threshold.
        threshold: f64,
    },

    /// A value generator or donor source failed.
    #[error("generator failed: {message}")]
    Generator {
        /// Description of the failure.
        message: String,
    },

    /// The donor source kept producing trees without a non-empty list at
    /// the rule's path.
    #[error("rule {rule}: donor source yielded no list elements after {attempts} attempts")]
    DonorExhausted {
        /// Identifier of the list-insert rule.
        rule: String,
        /// Number of donor trees generated before giving up.
        attempts: u32,
    },

    /// A value generator or donor source panicked.
    #[error("effect panicked: {message}")]
    Panicked {
        /// The panic payload, when it was a string.
        message: String,
    },
}

impl MorphError {
    /// Shorthand for a [`MorphError::Generator`] with the given message.
    pub fn generator(message: impl Into<String>) -> Self {
        Self::Generator {
            message: message.into(),
        }
    }
}
