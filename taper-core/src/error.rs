use crate::shape::Shape;
use thiserror::Error;

/// Custom error type for the taper framework.
#[derive(Error, Debug, PartialEq, Clone)] // PartialEq + Clone for easier testing
pub enum TaperError {
    #[error("Incompatible shapes for operation {operation}: {lhs} and {rhs}")]
    IncompatibleShapes {
        operation: String,
        lhs: Shape,
        rhs: Shape,
    },

    #[error("Shape mismatch during {operation}: expected {expected}, got {actual}")]
    ShapeMismatch {
        operation: String,
        expected: Shape,
        actual: Shape,
    },

    #[error("Invalid shape for {operation}: {message}")]
    InvalidShape { operation: String, message: String },

    #[error("Invalid axis {axis} for {operation} on shape {shape}")]
    InvalidAxis {
        operation: String,
        axis: usize,
        shape: Shape,
    },

    #[error("Tensor creation error: data length {data_len} does not match shape size {expected}")]
    TensorCreation { data_len: usize, expected: usize },

    #[error("Index {index} out of bounds for size {size} during {operation}")]
    IndexOutOfBounds {
        operation: String,
        index: usize,
        size: usize,
    },

    #[error("Invalid argument for {operation}: {message}")]
    InvalidArgument { operation: String, message: String },

    #[error("Node #{id} does not belong to this graph (operation {operation})")]
    GraphMismatch { operation: String, id: u32 },

    #[error("Invalid node during {operation}: {message}")]
    InvalidNode { operation: String, message: String },

    #[error("Operation {operation} called on an uninitialized parameter")]
    InvalidParameter { operation: String },

    #[error("Device mismatch during {operation}: tensor is bound to a different device")]
    DeviceMismatch { operation: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Duplicate key `{key}` during {operation}")]
    DuplicateKey { operation: String, key: String },

    #[error("Internal error: {0}")]
    Internal(String),
}
