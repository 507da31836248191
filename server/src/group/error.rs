//! Group Model Errors

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during group operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupError {
    /// Name failed validation.
    #[error("invalid group name: {0}")]
    InvalidName(String),

    /// A live group already uses this name (case-insensitive).
    #[error("a group named {0:?} already exists")]
    NameTaken(String),

    /// No such group.
    #[error("group not found: {0}")]
    GroupNotFound(Uuid),

    /// The group is at capacity.
    #[error("group is full (max: {max_members})")]
    GroupFull {
        /// Maximum allowed members.
        max_members: u32,
    },

    /// The player is not in any group.
    #[error("player {0} is not in a group")]
    NotInGroup(Uuid),

    /// Only the creator may perform this operation.
    #[error("player {0} is not the group creator")]
    NotCreator(Uuid),

    /// Password did not match.
    #[error("incorrect group password")]
    IncorrectPassword,

    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    /// The obfuscated-id space could not produce a fresh token.
    #[error("obfuscated id space exhausted")]
    IdSpaceExhausted,
}

impl GroupError {
    /// Stable machine code for the signaling error frame, where one exists.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::GroupNotFound(_) => Some("group_not_found"),
            Self::GroupFull { .. } => Some("group_full"),
            Self::IncorrectPassword => Some("incorrect_password"),
            _ => None,
        }
    }
}
