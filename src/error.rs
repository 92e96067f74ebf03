//! Error types for kernel generation and dispatch

use thiserror::Error;

use crate::types::ElementType;

/// Result type for dispatch and backend operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors surfaced by the dispatcher, the expression builder and backends
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Backend allocation error: {message}")]
    BackendAllocation { message: String },

    #[error("Length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Unsupported operation type: no `{operation}` kernel for ({operands})")]
    UnsupportedOperationType { operation: String, operands: String },

    #[error("Type invariant violation: in-place `{operation}` would change receiver from {receiver} to {promoted}")]
    TypeInvariantViolation {
        operation: String,
        receiver: ElementType,
        promoted: ElementType,
    },

    #[error("Kernel compile error: {diagnostic}")]
    KernelCompile { diagnostic: String },

    #[error("Kernel launch error: {message}")]
    KernelLaunch { message: String },

    #[error("Invalid handle: {message}")]
    InvalidHandle { message: String },

    #[error("Element type mismatch: buffer holds {expected}, host array holds {found}")]
    ElementTypeMismatch {
        expected: ElementType,
        found: ElementType,
    },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl DispatchError {
    pub fn backend(msg: impl Into<String>) -> Self {
        DispatchError::BackendAllocation { message: msg.into() }
    }

    pub fn length(expected: usize, got: usize) -> Self {
        DispatchError::LengthMismatch { expected, got }
    }

    pub fn unsupported(operation: impl Into<String>, operands: impl Into<String>) -> Self {
        DispatchError::UnsupportedOperationType {
            operation: operation.into(),
            operands: operands.into(),
        }
    }

    pub fn compile(diagnostic: impl Into<String>) -> Self {
        DispatchError::KernelCompile { diagnostic: diagnostic.into() }
    }

    pub fn launch(msg: impl Into<String>) -> Self {
        DispatchError::KernelLaunch { message: msg.into() }
    }

    pub fn invalid_handle(msg: impl Into<String>) -> Self {
        DispatchError::InvalidHandle { message: msg.into() }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        DispatchError::InvalidArgument { message: msg.into() }
    }
}
