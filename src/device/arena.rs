//! Device allocations and named region views.
//!
//! One [`DeviceArena`] backs a whole invocation. The planner describes how it
//! is carved up as a list of [`Region`]s (offset + length, never raw pointer
//! arithmetic); [`DeviceArena::split`] hands back one disjoint mutable slice
//! per region.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::element::Element;
use crate::error::{ConvError, ConvResult};

/// Name of a region inside the pipeline allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionName {
    /// Source tile, ping slot.
    SrcA,
    /// Source tile, pong slot.
    SrcB,
    /// Destination tile, ping slot.
    DstA,
    /// Destination tile, pong slot.
    DstB,
    /// Single source tile (resident mode).
    Src,
    /// Single destination tile (resident mode).
    Dst,
}

/// A named `[offset, offset + len)` range of an arena, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Region name.
    pub name: RegionName,
    /// First element.
    pub offset: usize,
    /// Length in elements.
    pub len: usize,
}

impl Region {
    /// One past the last element.
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Returns reserved bytes to the device when dropped.
#[derive(Debug)]
pub(crate) struct Reservation {
    used: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    bytes: usize,
}

impl Reservation {
    pub(crate) fn new(used: Arc<AtomicUsize>, live: Arc<AtomicUsize>, bytes: usize) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        Self { used, live, bytes }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.used.fetch_sub(self.bytes, Ordering::AcqRel);
        self.live.fetch_sub(1, Ordering::AcqRel);
        log::debug!("released {} device bytes", self.bytes);
    }
}

/// One contiguous, zero-initialized device allocation.
///
/// Freed (and its bytes returned to the device budget) on drop, so an
/// invocation releases its memory on every exit path.
pub struct DeviceArena<T: Element> {
    data: Box<[T]>,
    _reservation: Reservation,
}

impl<T: Element> DeviceArena<T> {
    pub(crate) fn new(data: Box<[T]>, reservation: Reservation) -> Self {
        Self {
            data,
            _reservation: reservation,
        }
    }

    /// Length in elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for a zero-length arena.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size in bytes.
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<T>()
    }

    /// Read-only view of the whole arena.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Splits the arena into one mutable slice per region, in region order.
    ///
    /// # Errors
    ///
    /// Returns [`ConvError::Validation`] if regions overlap, are not sorted by
    /// offset, or extend past the arena.
    pub fn split(&mut self, regions: &[Region]) -> ConvResult<Vec<&mut [T]>> {
        let mut views = Vec::with_capacity(regions.len());
        let mut rest: &mut [T] = &mut self.data;
        let mut cursor = 0usize;

        for region in regions {
            if region.offset < cursor {
                return Err(ConvError::validation(format!(
                    "region {:?} at {} overlaps previous region ending at {}",
                    region.name, region.offset, cursor
                )));
            }
            let skip = region.offset - cursor;
            if skip + region.len > rest.len() {
                return Err(ConvError::validation(format!(
                    "region {:?} [{}, {}) exceeds arena of {} elements",
                    region.name,
                    region.offset,
                    region.end(),
                    cursor + rest.len()
                )));
            }
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(skip);
            let (view, tail) = tail.split_at_mut(region.len);
            views.push(view);
            rest = tail;
            cursor = region.end();
        }

        Ok(views)
    }
}

impl<T: Element> std::fmt::Debug for DeviceArena<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceArena")
            .field("type", &T::NAME)
            .field("len", &self.data.len())
            .field("bytes", &self.size_bytes())
            .finish()
    }
}
