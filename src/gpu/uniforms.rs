//! Uniform buffer structures for the stencil shader.
//!
//! `#[repr(C)]` structures matching the std140 layout WGSL expects for
//! uniform buffers: 4-byte scalars, struct size rounded up to 16 bytes.

use bytemuck::{Pod, Zeroable};

use crate::stencil::StencilLaunch;

/// Launch geometry of one stencil dispatch.
///
/// # Layout
///
/// Total size: 32 bytes (2 × vec4).
///
/// ```text
/// Offset  Size  Field
/// 0       4     out_width
/// 4       4     out_height
/// 8       4     src_pitch
/// 12      4     dst_pitch
/// 16      4     kernel_width
/// 20      4     kernel_height
/// 24      4     tap_x
/// 28      4     tap_y
/// ```
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct StencilUniforms {
    /// Output width.
    pub out_width: u32,
    /// Output height.
    pub out_height: u32,
    /// Source tile row pitch in elements.
    pub src_pitch: u32,
    /// Destination tile row pitch in elements.
    pub dst_pitch: u32,
    /// Kernel width.
    pub kernel_width: u32,
    /// Kernel height.
    pub kernel_height: u32,
    /// Horizontal tap offset into the source halo.
    pub tap_x: u32,
    /// Vertical tap offset into the source halo.
    pub tap_y: u32,
}

impl StencilUniforms {
    /// Uniforms for `launch`, or `None` if a field exceeds `u32`.
    pub fn from_launch(launch: &StencilLaunch) -> Option<Self> {
        let u = |v: usize| u32::try_from(v).ok();
        Some(Self {
            out_width: u(launch.out_width)?,
            out_height: u(launch.out_height)?,
            src_pitch: u(launch.src_pitch)?,
            dst_pitch: u(launch.dst_pitch)?,
            kernel_width: u(launch.kernel_width)?,
            kernel_height: u(launch.kernel_height)?,
            tap_x: u(launch.tap_offset.0)?,
            tap_y: u(launch.tap_offset.1)?,
        })
    }

    /// Returns the size of this structure in bytes.
    pub const fn size() -> usize {
        std::mem::size_of::<Self>()
    }
}
