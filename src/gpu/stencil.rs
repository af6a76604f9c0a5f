//! wgpu stencil executor.
//!
//! [`WgpuStencil`] runs each staged tile through a generated compute shader.
//! It plugs into [`Convolver::with_executor`](crate::Convolver::with_executor)
//! in place of the CPU stencil; staging, ping-pong and draining stay on the
//! host pipeline, only the per-tile compute moves to the GPU.

use std::sync::{Arc, Mutex};

use wgpu::util::DeviceExt;

use crate::error::{ConvError, ConvResult};
use crate::gpu::pipeline::{workgroup_count, PipelineCache};
use crate::gpu::shaders::{coefficient_vec4s, STENCIL_WORKGROUP_EDGE};
use crate::gpu::tile::GpuTile;
use crate::gpu::uniforms::StencilUniforms;
use crate::gpu::WgpuBackend;
use crate::stencil::{StencilExecutor, StencilLaunch};

/// GPU stencil executor for `f32` stacks.
///
/// # Example
///
/// ```rust,no_run
/// use slidewin::gpu::{WgpuBackend, WgpuOptions, WgpuStencil};
/// use slidewin::{ConvConfig, Convolver, Device, DeviceConfig, Location, Matrix};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = WgpuBackend::init(WgpuOptions::default())?;
/// let device = Device::new(DeviceConfig::default())?;
/// let conv = Convolver::with_executor(&device, ConvConfig::default(), WgpuStencil::new(backend))?;
///
/// let src = vec![Matrix::<f32>::filled(64, 64, Location::Host, 1.0)];
/// let kernel = Matrix::<f32>::filled(3, 3, Location::Host, 1.0);
/// let mut dst = vec![Matrix::zeros(0, 0, Location::Host)];
/// conv.convolve_border_constant(&src, (&kernel).into(), &mut dst)?;
/// # Ok(())
/// # }
/// ```
pub struct WgpuStencil {
    backend: Arc<WgpuBackend>,
    pipelines: Mutex<PipelineCache>,
}

impl WgpuStencil {
    /// Creates an executor on `backend`.
    pub fn new(backend: WgpuBackend) -> Self {
        Self::shared(Arc::new(backend))
    }

    /// Creates an executor on a backend shared with other users.
    pub fn shared(backend: Arc<WgpuBackend>) -> Self {
        let pipelines = Mutex::new(PipelineCache::new(Arc::clone(&backend.device)));
        Self { backend, pipelines }
    }

    /// The backend launches are submitted to.
    pub fn backend(&self) -> &WgpuBackend {
        &self.backend
    }

    /// Number of stencil pipelines compiled so far.
    pub fn compiled_pipelines(&self) -> usize {
        self.pipelines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn run(
        &self,
        launch: &StencilLaunch,
        coefficients: &[f32],
        src: &[f32],
        dst: &mut [f32],
    ) -> ConvResult<()> {
        launch.validate(coefficients.len(), src.len(), dst.len())?;
        if launch.output_elements() == 0 {
            return Ok(());
        }

        let uniforms = StencilUniforms::from_launch(launch)
            .ok_or_else(|| ConvError::overflow("launch geometry exceeds u32"))?;
        let device = self.backend.device();
        let queue = self.backend.queue();

        let src_tile = GpuTile::upload(device, src, launch.src_pitch, launch.src_rows)?;
        let dst_tile = GpuTile::output(device, launch.dst_pitch, launch.out_height)?;
        self.backend.validate_tile(src_tile.len())?;

        let mut packed = vec![0.0f32; coefficient_vec4s(launch.spec.bucket) * 4];
        packed[..coefficients.len()].copy_from_slice(coefficients);

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Stencil params"),
            contents: bytemuck::bytes_of(&uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let coeff_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Stencil coefficients"),
            contents: bytemuck::cast_slice(&packed),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut pipelines = self.pipelines.lock().unwrap_or_else(|e| e.into_inner());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Stencil bind group"),
            layout: pipelines.bind_group_layout(),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: coeff_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: src_tile.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: dst_tile.buffer.as_entire_binding(),
                },
            ],
        });
        let pipeline = pipelines.get_or_create(&launch.spec);

        let edge = STENCIL_WORKGROUP_EDGE as usize;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Stencil encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Stencil pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                workgroup_count(launch.out_width, edge),
                workgroup_count(launch.out_height, edge),
                1,
            );
        }
        queue.submit(std::iter::once(encoder.finish()));
        drop(pipelines);

        dst_tile.download_into(device, queue, dst)
    }
}

impl StencilExecutor<f32> for WgpuStencil {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn execute(
        &self,
        launch: &StencilLaunch,
        coefficients: &[f32],
        src: &[f32],
        dst: &mut [f32],
    ) -> ConvResult<()> {
        self.run(launch, coefficients, src, dst)
    }
}

impl StencilExecutor<f64> for WgpuStencil {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn execute(
        &self,
        _launch: &StencilLaunch,
        _coefficients: &[f64],
        _src: &[f64],
        _dst: &mut [f64],
    ) -> ConvResult<()> {
        Err(ConvError::UnsupportedElement("f64"))
    }
}

impl std::fmt::Debug for WgpuStencil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuStencil")
            .field("backend", &self.backend)
            .field("compiled_pipelines", &self.compiled_pipelines())
            .finish()
    }
}
