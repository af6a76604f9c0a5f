//! Unified error types for slidewin.
//!
//! This module provides [`ConvError`], a unified error type covering the
//! dispatcher's validation failures, the device allocator, the stream
//! pipeline and (with the `gpu` feature) the wgpu executor. It uses the
//! `thiserror` crate for ergonomic error handling.
//!
//! Validation failures, unsupported kernels and [`ConvError::AllocationFailure`]
//! are all raised before the destination stack is resized, so those errors
//! leave it untouched. A [`ConvError::StreamFault`] is reported at the final
//! barrier, after the destination has been resized and possibly partly
//! drained; its contents are unspecified in that case.
//!
//! # Example
//!
//! ```rust
//! use slidewin::{ConvError, Status};
//!
//! fn check_count(expected: usize, got: usize) -> Result<(), ConvError> {
//!     if expected != got {
//!         return Err(ConvError::dimension_mismatch(&[expected], &[got]));
//!     }
//!     Ok(())
//! }
//!
//! let result = check_count(3, 2);
//! assert_eq!(Status::of(&result), Status::DimensionMismatch);
//! ```

use thiserror::Error;

use crate::config::ConfigError;

/// Unified error type for slidewin operations.
///
/// GPU-specific variants are only available when the `gpu` feature is enabled.
#[derive(Error, Debug)]
pub enum ConvError {
    /// The device backend was never brought up, or has been shut down.
    #[error("Device not initialized")]
    NotInitialized,

    /// Stack, kernel or destination shapes are incompatible.
    ///
    /// Shapes are reported as `[width, height]` or `[count]` depending on
    /// which property disagreed.
    #[error("Dimension mismatch: expected {expected:?}, got {got:?}")]
    DimensionMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape received.
        got: Vec<usize>,
    },

    /// The device allocator could not satisfy the request.
    #[error("Device allocation of {requested} bytes failed ({available} bytes available)")]
    AllocationFailure {
        /// Requested size in bytes.
        requested: usize,
        /// Bytes still available on the device at the time of the request.
        available: usize,
    },

    /// Kernel half-extent exceeds the largest supported radius bucket.
    #[error(
        "Unsupported kernel size: half extent {half_width}x{half_height} exceeds radius {max_radius}"
    )]
    UnsupportedKernelSize {
        /// Half of the kernel width.
        half_width: usize,
        /// Half of the kernel height.
        half_height: usize,
        /// Largest radius any bucket supports.
        max_radius: usize,
    },

    /// The request is structurally invalid (e.g. non-positive destination).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Integer overflow in size calculations.
    #[error("Integer overflow: {0}")]
    Overflow(String),

    /// Kernel coefficients do not fit into one constant-cache bank.
    #[error("Constant cache overflow: {requested} bytes requested, bank holds {capacity}")]
    ConstantCacheOverflow {
        /// Bytes the kernel needs.
        requested: usize,
        /// Capacity of one bank in bytes.
        capacity: usize,
    },

    /// A ping-pong slot was driven through an illegal transition.
    #[error("Invalid buffer transition: {0}")]
    InvalidTransition(String),

    /// A job enqueued on a stream failed; reported at the next barrier.
    #[error("Stream fault: {0}")]
    StreamFault(String),

    /// The selected executor cannot handle this element type.
    #[error("Unsupported element type for this executor: {0}")]
    UnsupportedElement(&'static str),

    /// GPU adapter request failed.
    #[cfg(feature = "gpu")]
    #[error("Failed to find suitable GPU adapter: {0}")]
    AdapterNotFound(String),

    /// GPU device request failed.
    #[cfg(feature = "gpu")]
    #[error("Failed to create GPU device: {0}")]
    DeviceRequestFailed(#[from] wgpu::RequestDeviceError),

    /// GPU buffer async operation failed.
    #[cfg(feature = "gpu")]
    #[error("Buffer async error: {0}")]
    BufferAsync(#[from] wgpu::BufferAsyncError),

    /// Shader generation or pipeline creation error.
    #[cfg(feature = "gpu")]
    #[error("Shader error: {0}")]
    Shader(String),
}

/// Result type alias for slidewin operations.
pub type ConvResult<T> = Result<T, ConvError>;

impl ConvError {
    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: &[usize], got: &[usize]) -> Self {
        ConvError::DimensionMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Creates an allocation failure error.
    pub fn allocation_failure(requested: usize, available: usize) -> Self {
        ConvError::AllocationFailure {
            requested,
            available,
        }
    }

    /// Creates an unsupported kernel size error.
    pub fn unsupported_kernel(half_width: usize, half_height: usize, max_radius: usize) -> Self {
        ConvError::UnsupportedKernelSize {
            half_width,
            half_height,
            max_radius,
        }
    }

    /// Creates a validation error.
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        ConvError::Validation(msg.into())
    }

    /// Creates an overflow error.
    pub fn overflow<S: Into<String>>(msg: S) -> Self {
        ConvError::Overflow(msg.into())
    }

    /// Creates an invalid transition error.
    pub fn invalid_transition<S: Into<String>>(msg: S) -> Self {
        ConvError::InvalidTransition(msg.into())
    }

    /// Creates a stream fault error.
    pub fn stream_fault<S: Into<String>>(msg: S) -> Self {
        ConvError::StreamFault(msg.into())
    }

    /// Creates an adapter not found error.
    #[cfg(feature = "gpu")]
    pub fn adapter_not_found<S: Into<String>>(msg: S) -> Self {
        ConvError::AdapterNotFound(msg.into())
    }

    /// Creates a shader error.
    #[cfg(feature = "gpu")]
    pub fn shader<S: Into<String>>(msg: S) -> Self {
        ConvError::Shader(msg.into())
    }
}

/// Flat outcome code for callers that only branch on success or failure kind.
///
/// Obtained from any [`ConvResult`] via [`Status::of`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    /// The invocation completed.
    Success,
    /// See [`ConvError::NotInitialized`].
    NotInitialized,
    /// See [`ConvError::DimensionMismatch`].
    DimensionMismatch,
    /// See [`ConvError::AllocationFailure`].
    AllocationFailure,
    /// See [`ConvError::UnsupportedKernelSize`].
    UnsupportedKernelSize,
    /// See [`ConvError::Validation`].
    ValidationError,
    /// Any other failure.
    Failure,
}

impl Status {
    /// Projects a result onto its status code.
    pub fn of<T>(result: &ConvResult<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(err) => Status::from(err),
        }
    }

    /// Returns `true` for [`Status::Success`].
    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl From<&ConvError> for Status {
    fn from(err: &ConvError) -> Self {
        match err {
            ConvError::NotInitialized => Status::NotInitialized,
            ConvError::DimensionMismatch { .. } => Status::DimensionMismatch,
            ConvError::AllocationFailure { .. } => Status::AllocationFailure,
            ConvError::UnsupportedKernelSize { .. } => Status::UnsupportedKernelSize,
            ConvError::Validation(_) => Status::ValidationError,
            _ => Status::Failure,
        }
    }
}
