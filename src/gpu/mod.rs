//! GPU stencil executor using wgpu.
//!
//! Only available with the `gpu` feature. The host pipeline keeps doing the
//! staging, ping-pong and draining; [`WgpuStencil`] replaces the per-tile
//! compute with a WGSL shader generated for the launch's specialization.
//!
//! # Example
//!
//! ```rust,no_run
//! use slidewin::gpu::{WgpuBackend, WgpuOptions, WgpuStencil};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = WgpuBackend::init(WgpuOptions::default())?;
//! let stencil = WgpuStencil::new(backend);
//! println!("{:?}", stencil);
//! # Ok(())
//! # }
//! ```
//!
//! # Public API
//!
//! - [`WgpuBackend`]: adapter and device bring-up
//! - [`WgpuStencil`]: the [`StencilExecutor`](crate::StencilExecutor) for `f32`
//! - [`GpuTile`]: pitched storage buffer with upload/download
//! - [`StencilUniforms`]: launch geometry uniform (std140 layout)
//! - [`shaders`]: WGSL generation per specialization

mod backend;
mod pipeline;
pub mod shaders;
mod stencil;
mod tile;
mod uniforms;

pub use backend::{WgpuBackend, WgpuOptions};
pub use pipeline::{workgroup_count, PipelineCache, ShaderKey};
pub use shaders::{generate_stencil_shader, STENCIL_ENTRY_POINT, STENCIL_WORKGROUP_EDGE};
pub use stencil::WgpuStencil;
pub use tile::GpuTile;
pub use uniforms::StencilUniforms;

/// Maximum VRAM allocation per buffer (2GB).
pub const MAX_VRAM_ALLOC: u64 = 2 * 1024 * 1024 * 1024;

/// Checks if a size in bytes exceeds the maximum VRAM allocation limit.
#[inline]
pub fn exceeds_vram_limit(size_bytes: u64) -> bool {
    size_bytes > MAX_VRAM_ALLOC
}
