//! Device buffer planning.
//!
//! A [`BufferPlan`] fixes, before anything is allocated, the shape of every
//! device tile an invocation needs and how one allocation is carved into
//! them. All arithmetic is checked; an overflow surfaces as
//! [`ConvError::Overflow`] instead of an undersized buffer.
//!
//! # Tile Geometry
//!
//! ```text
//!   src tile (alloc_width x alloc_height)
//!   ┌───────────────────────────────┐
//!   │ R_y halo rows                 │
//!   │   ┌───────────────────────┐   │
//!   │R_x│ dst tile              │R_x│   dst alloc = output rounded up
//!   │   │ (tile_w x tile_h grid)│   │   to the compute tile grid
//!   │   └───────────────────────┘   │
//!   │ R_y halo rows                 │
//!   └───────────────────────────────┘
//! ```
//!
//! Each axis uses the halo of its own radius class. Tiles start zeroed and
//! the halo is never written, so stencil reads past the source edge see zero.

use crate::bucket::BucketSelection;
use crate::config::ConvConfig;
use crate::device::{Device, DeviceArena, Region, RegionName};
use crate::element::Element;
use crate::error::{ConvError, ConvResult};
use crate::stencil::BorderPolicy;

/// Allocation layout strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanMode {
    /// Two source and two destination tiles for the three-stream ping-pong
    /// pipeline (host-resident stacks).
    Pipelined,
    /// One source and one destination tile (device-resident stacks).
    Resident,
}

/// Logical and allocated extent of one device tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileShape {
    /// Logical width.
    pub width: usize,
    /// Logical height.
    pub height: usize,
    /// Allocated width; also the row pitch.
    pub alloc_width: usize,
    /// Allocated height.
    pub alloc_height: usize,
}

impl TileShape {
    /// Elements in the allocation.
    pub fn alloc_elements(&self) -> ConvResult<usize> {
        self.alloc_width
            .checked_mul(self.alloc_height)
            .ok_or_else(|| ConvError::overflow("tile element count"))
    }
}

/// Full device layout of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPlan {
    /// Layout strategy.
    pub mode: PlanMode,
    /// Source tile shape; logical extent is the input matrix.
    pub src: TileShape,
    /// Destination tile shape; logical extent is the output matrix.
    pub dst: TileShape,
    /// Where the input matrix's `(0, 0)` lands inside a source tile.
    pub staging_origin: (usize, usize),
    regions: Vec<Region>,
    total_elements: usize,
}

fn align_up(value: usize, tile: usize, what: &str) -> ConvResult<usize> {
    value
        .checked_next_multiple_of(tile)
        .ok_or_else(|| ConvError::overflow(format!("{} aligned to {}", what, tile)))
}

impl BufferPlan {
    /// Plans the buffers for convolving `src_width x src_height` matrices
    /// with a kernel classified as `selection`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvError::Validation`] if the output would be empty and
    /// [`ConvError::Overflow`] if any size overflows `usize`.
    pub fn new(
        policy: BorderPolicy,
        selection: &BucketSelection,
        src_width: usize,
        src_height: usize,
        config: &ConvConfig,
        mode: PlanMode,
    ) -> ConvResult<Self> {
        let (out_width, out_height) = policy.output_dims(src_width, src_height, selection)?;
        let (radius_x, radius_y) = (selection.bucket.radius_x(), selection.bucket.radius_y());

        let dst = TileShape {
            width: out_width,
            height: out_height,
            alloc_width: align_up(out_width, config.tile_width, "destination width")?,
            alloc_height: align_up(out_height, config.tile_height, "destination height")?,
        };
        let src = TileShape {
            width: src_width,
            height: src_height,
            alloc_width: dst
                .alloc_width
                .checked_add(2 * radius_x)
                .ok_or_else(|| ConvError::overflow("source width"))?,
            alloc_height: dst
                .alloc_height
                .checked_add(2 * radius_y)
                .ok_or_else(|| ConvError::overflow("source height"))?,
        };

        let staging_origin = match policy {
            BorderPolicy::Constant => (radius_x, radius_y),
            BorderPolicy::Ignored => selection.tap_offset(),
        };

        let src_len = src.alloc_elements()?;
        let dst_len = dst.alloc_elements()?;
        let layout: &[(RegionName, usize)] = match mode {
            PlanMode::Pipelined => &[
                (RegionName::SrcA, src_len),
                (RegionName::SrcB, src_len),
                (RegionName::DstA, dst_len),
                (RegionName::DstB, dst_len),
            ],
            PlanMode::Resident => &[(RegionName::Src, src_len), (RegionName::Dst, dst_len)],
        };

        let mut regions = Vec::with_capacity(layout.len());
        let mut offset = 0usize;
        for &(name, len) in layout {
            regions.push(Region { name, offset, len });
            offset = offset
                .checked_add(len)
                .ok_or_else(|| ConvError::overflow("plan total size"))?;
        }

        log::debug!(
            "{:?} plan: src {}x{} (alloc {}x{}), dst {}x{} (alloc {}x{}), {} elements",
            mode,
            src.width,
            src.height,
            src.alloc_width,
            src.alloc_height,
            dst.width,
            dst.height,
            dst.alloc_width,
            dst.alloc_height,
            offset
        );

        Ok(Self {
            mode,
            src,
            dst,
            staging_origin,
            regions,
            total_elements: offset,
        })
    }

    /// Named regions in allocation order.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Total elements of the single allocation.
    pub fn total_elements(&self) -> usize {
        self.total_elements
    }

    /// Total bytes for element type `T`.
    pub fn total_bytes<T: Element>(&self) -> ConvResult<usize> {
        self.total_elements
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| ConvError::overflow("plan byte size"))
    }

    /// Performs the plan's single allocation on `device`.
    pub fn allocate<T: Element>(&self, device: &Device) -> ConvResult<DeviceArena<T>> {
        self.total_bytes::<T>()?;
        device.allocate::<T>(self.total_elements)
    }
}
