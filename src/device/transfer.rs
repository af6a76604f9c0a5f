//! 2D copies between matrices and device tiles.
//!
//! Tiles are dense row-major buffers with their own pitch (the planned
//! allocation width). Only the logical extent of a matrix is ever copied;
//! matrix row padding stays on the matrix side.

use crate::element::Element;
use crate::error::{ConvError, ConvResult};
use crate::matrix::{Location, Matrix};

/// Direction of a copy, after the location of the matrix involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    /// Host matrix into a device tile.
    HostToDevice,
    /// Device tile into a host matrix.
    DeviceToHost,
    /// Device-resident matrix to or from a device tile.
    DeviceToDevice,
}

impl TransferKind {
    /// Kind of a copy from a matrix at `location` into a tile.
    pub fn inbound(location: Location) -> Self {
        match location {
            Location::Host => TransferKind::HostToDevice,
            Location::Device => TransferKind::DeviceToDevice,
        }
    }

    /// Kind of a copy from a tile into a matrix at `location`.
    pub fn outbound(location: Location) -> Self {
        match location {
            Location::Host => TransferKind::DeviceToHost,
            Location::Device => TransferKind::DeviceToDevice,
        }
    }
}

/// Copies `src` into `tile` with its top-left corner at `origin = (x, y)`.
///
/// Tile elements outside the copied rectangle are left as they are.
pub fn copy_to_tile<T: Element>(
    src: &Matrix<T>,
    tile: &mut [T],
    tile_pitch: usize,
    origin: (usize, usize),
) -> ConvResult<()> {
    let (ox, oy) = origin;
    if ox + src.width() > tile_pitch {
        return Err(ConvError::validation(format!(
            "{}-wide matrix at x={} overflows tile pitch {}",
            src.width(),
            ox,
            tile_pitch
        )));
    }
    if tile_pitch == 0 || (oy + src.height()) * tile_pitch > tile.len() {
        return Err(ConvError::validation(format!(
            "{}-tall matrix at y={} overflows tile of {} rows",
            src.height(),
            oy,
            tile.len().checked_div(tile_pitch).unwrap_or(0)
        )));
    }

    for (y, row) in src.rows().enumerate() {
        let start = (oy + y) * tile_pitch + ox;
        tile[start..start + row.len()].copy_from_slice(row);
    }
    log::trace!(
        "{:?}: {}x{} at ({}, {})",
        TransferKind::inbound(src.location()),
        src.width(),
        src.height(),
        ox,
        oy
    );
    Ok(())
}

/// Copies the top-left `dst.width() x dst.height()` rectangle of `tile`
/// into `dst`.
pub fn copy_from_tile<T: Element>(
    tile: &[T],
    tile_pitch: usize,
    dst: &mut Matrix<T>,
) -> ConvResult<()> {
    let (width, height) = dst.dims();
    if width > tile_pitch || height * tile_pitch > tile.len() {
        return Err(ConvError::validation(format!(
            "{}x{} matrix exceeds tile of pitch {} and {} elements",
            width,
            height,
            tile_pitch,
            tile.len()
        )));
    }

    for y in 0..height {
        let start = y * tile_pitch;
        dst.row_mut(y).copy_from_slice(&tile[start..start + width]);
    }
    log::trace!(
        "{:?}: {}x{}",
        TransferKind::outbound(dst.location()),
        width,
        height
    );
    Ok(())
}
