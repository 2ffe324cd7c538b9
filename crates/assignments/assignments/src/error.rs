//! Assignment error types.

use thiserror::Error;

use crate::assignment::AssignmentStatus;

/// Result type for assignment operations.
pub type AssignmentResult<T> = Result<T, AssignmentError>;

/// Error type for assignment operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AssignmentError {
    /// No assignment with this ID.
    #[error("Assignment not found: {0}")]
    NotFound(String),

    /// The caller is not the carrier the assignment was offered to.
    #[error("Carrier {carrier_id} is not assigned to {assignment_id}")]
    NotAssignedCarrier {
        assignment_id: String,
        carrier_id: String,
    },

    /// The assignment already left `pending`.
    #[error("Assignment is already {status}")]
    NotPending { status: AssignmentStatus },

    /// Only accepted assignments can be completed.
    #[error("Assignment is {status}, not accepted")]
    NotAccepted { status: AssignmentStatus },

    /// The wall-clock expiry has passed.
    #[error("Assignment has expired")]
    Expired,

    /// The request conflicts with current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AssignmentError {
    /// Returns an error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            AssignmentError::NotFound(_) => "ASSIGNMENT_NOT_FOUND",
            AssignmentError::NotAssignedCarrier { .. } => "NOT_ASSIGNED_CARRIER",
            AssignmentError::NotPending { .. } => "ASSIGNMENT_NOT_PENDING",
            AssignmentError::NotAccepted { .. } => "ASSIGNMENT_NOT_ACCEPTED",
            AssignmentError::Expired => "ASSIGNMENT_EXPIRED",
            AssignmentError::Conflict(_) => "CONFLICT",
            AssignmentError::InvalidInput(_) => "INVALID_INPUT",
            AssignmentError::Storage(_) => "STORAGE_ERROR",
        }
    }
}
