//! Compute pipeline cache for the stencil shaders.
//!
//! Pipelines are compiled lazily, once per `(bucket, exact)` pair; the
//! border policy only changes staging, never the shader.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bucket::RadiusBucket;
use crate::gpu::shaders::{generate_stencil_shader, STENCIL_ENTRY_POINT};
use crate::stencil::Specialization;

/// Key of a compiled stencil pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    /// Radius bucket.
    pub bucket: RadiusBucket,
    /// Exact variant.
    pub exact: bool,
}

impl From<&Specialization> for ShaderKey {
    fn from(spec: &Specialization) -> Self {
        Self {
            bucket: spec.bucket,
            exact: spec.exact,
        }
    }
}

/// Cached stencil pipelines sharing one bind group layout.
pub struct PipelineCache {
    device: Arc<wgpu::Device>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<ShaderKey, wgpu::ComputePipeline>,
}

fn layout_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl PipelineCache {
    /// Creates an empty cache.
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Stencil Bind Group Layout"),
            entries: &[
                layout_entry(0, wgpu::BufferBindingType::Uniform),
                layout_entry(1, wgpu::BufferBindingType::Uniform),
                layout_entry(2, wgpu::BufferBindingType::Storage { read_only: true }),
                layout_entry(3, wgpu::BufferBindingType::Storage { read_only: false }),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Stencil Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Self {
            device,
            bind_group_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
        }
    }

    /// The bind group layout every stencil pipeline uses.
    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    /// Gets or compiles the pipeline for `spec`.
    pub fn get_or_create(&mut self, spec: &Specialization) -> &wgpu::ComputePipeline {
        let key = ShaderKey::from(spec);
        let device = &self.device;
        let layout = &self.pipeline_layout;
        self.pipelines.entry(key).or_insert_with(|| {
            log::debug!("compiling stencil pipeline {}", spec);
            let source = generate_stencil_shader(spec);
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Stencil Shader"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Stencil Pipeline"),
                layout: Some(layout),
                module: &shader,
                entry_point: Some(STENCIL_ENTRY_POINT),
                compilation_options: Default::default(),
                cache: None,
            })
        })
    }

    /// Number of compiled pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Returns `true` if nothing has been compiled yet.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl std::fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCache")
            .field("compiled", &self.pipelines.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Computes the workgroup count for a given number of elements.
#[inline]
pub fn workgroup_count(total: usize, workgroup_size: usize) -> u32 {
    total.div_ceil(workgroup_size) as u32
}
