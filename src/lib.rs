//! # slidewin - Pipelined 2D Sliding-Window Convolution
//!
//! Convolves stacks of equally-shaped matrices with small dense kernels on an
//! emulated accelerator: kernels live in a double-banked constant cache,
//! source tiles are staged into ping-pong buffers on one stream while another
//! computes and a third drains, and each launch runs a stencil specialized
//! for the kernel's radius bucket.
//!
//! ## Architecture
//! - Radius buckets `(S,S)`, `(S,L)`, `(L,S)`, `(L,L)` with radii 8 and 16
//! - One device allocation per call, planned up front
//! - Exact stencils (kernel fills its bucket) use const-generic tap loops
//! - Two border policies: zero padding (`BC`) or valid-only output (`BI`)
//!
//! ## Usage
//! ```rust
//! use slidewin::{convolve_border_constant, Device, DeviceConfig, Location, Matrix};
//!
//! let device = Device::new(DeviceConfig::default()).unwrap();
//! let src: Vec<Matrix<f32>> = (0..4)
//!     .map(|i| Matrix::filled(32, 32, Location::Host, i as f32))
//!     .collect();
//! let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);
//! let mut dst = vec![Matrix::zeros(0, 0, Location::Host); 4];
//!
//! let report = convolve_border_constant(&device, &src, &kernel, &mut dst).unwrap();
//! assert_eq!(report.computes, 4);
//! assert_eq!(dst[2].get(10, 10), 18.0);
//! ```

pub mod bucket;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod element;
pub mod error;
pub mod matrix;
pub mod pingpong;
pub mod pipeline;
pub mod planner;
pub mod stencil;

#[cfg(feature = "gpu")]
pub mod gpu;

// Re-exports
pub use bucket::{select_bucket, BucketSelection, RadiusBucket, RadiusClass};
pub use config::{ConfigError, ConvConfig, ConvConfigBuilder, DeviceConfig, LARGE_RADIUS, SMALL_RADIUS};
pub use device::Device;
pub use dispatch::{convolve_border_constant, convolve_border_ignored, Convolver, Kernels};
pub use element::Element;
pub use error::{ConvError, ConvResult, Status};
pub use matrix::{Location, Matrix, MatrixArray};
pub use pipeline::{PipelineReport, PIPELINE_STREAMS};
pub use planner::{BufferPlan, PlanMode};
pub use stencil::{reference_correlate, BorderPolicy, CpuStencil, Specialization, StencilExecutor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
