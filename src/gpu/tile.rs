//! GPU-resident tiles with upload/download helpers.

use crate::error::{ConvError, ConvResult};
use crate::gpu::{exceeds_vram_limit, MAX_VRAM_ALLOC};
use wgpu::util::DeviceExt;

/// A pitched `f32` tile in a storage buffer.
///
/// Rows are laid out back to back with `pitch` elements each, the same
/// layout as the host arena regions the stencil reads from.
pub struct GpuTile {
    /// The underlying wgpu buffer.
    pub buffer: wgpu::Buffer,
    /// Row pitch in elements.
    pub pitch: usize,
    /// Number of rows.
    pub rows: usize,
}

fn checked_bytes(elements: usize) -> ConvResult<u64> {
    let size_bytes = elements
        .checked_mul(std::mem::size_of::<f32>())
        .ok_or_else(|| ConvError::overflow("GPU tile size"))? as u64;
    if exceeds_vram_limit(size_bytes) {
        return Err(ConvError::allocation_failure(
            size_bytes as usize,
            MAX_VRAM_ALLOC as usize,
        ));
    }
    Ok(size_bytes)
}

impl GpuTile {
    /// Uploads the first `pitch * rows` elements of `data` as a read-only tile.
    pub fn upload(device: &wgpu::Device, data: &[f32], pitch: usize, rows: usize) -> ConvResult<Self> {
        let len = pitch
            .checked_mul(rows)
            .ok_or_else(|| ConvError::overflow("GPU tile extent"))?;
        if data.len() < len || len == 0 {
            return Err(ConvError::dimension_mismatch(&[pitch, rows], &[data.len()]));
        }
        checked_bytes(len)?;

        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuTile (src)"),
            contents: bytemuck::cast_slice(&data[..len]),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });

        Ok(Self { buffer, pitch, rows })
    }

    /// Creates a writable tile the shader fills.
    pub fn output(device: &wgpu::Device, pitch: usize, rows: usize) -> ConvResult<Self> {
        let len = pitch
            .checked_mul(rows)
            .ok_or_else(|| ConvError::overflow("GPU tile extent"))?;
        if len == 0 {
            return Err(ConvError::validation("empty GPU output tile"));
        }
        let size_bytes = checked_bytes(len)?;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuTile (dst)"),
            size: size_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        Ok(Self { buffer, pitch, rows })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.pitch * self.rows
    }

    /// Returns `true` for a zero-sized tile.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes.
    pub fn size_bytes(&self) -> u64 {
        (self.len() * std::mem::size_of::<f32>()) as u64
    }

    /// Reads the tile back into `out` through a mapped staging buffer.
    ///
    /// Blocks until the queue has drained.
    pub fn download_into(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        out: &mut [f32],
    ) -> ConvResult<()> {
        if out.len() < self.len() {
            return Err(ConvError::dimension_mismatch(&[self.len()], &[out.len()]));
        }
        let size_bytes = self.size_bytes();

        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuTile staging (download)"),
            size: size_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("GpuTile download encoder"),
        });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging_buffer, 0, size_bytes);
        queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| ConvError::stream_fault(format!("map callback dropped: {}", e)))??;

        {
            let mapped = buffer_slice.get_mapped_range();
            out[..self.len()].copy_from_slice(bytemuck::cast_slice(&mapped));
        }
        staging_buffer.unmap();

        Ok(())
    }
}

impl std::fmt::Debug for GpuTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuTile")
            .field("pitch", &self.pitch)
            .field("rows", &self.rows)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}
