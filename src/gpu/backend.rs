//! Adapter selection and device bring-up for the stencil executor.

use std::sync::Arc;

use crate::error::{ConvError, ConvResult};

/// How [`WgpuBackend::init`] picks and configures an adapter.
#[derive(Debug, Clone)]
pub struct WgpuOptions {
    /// Adapter power class to ask for first.
    pub power_preference: wgpu::PowerPreference,
    /// Backends to enumerate; all of them by default.
    pub backends: wgpu::Backends,
    /// Case-insensitive substring the adapter name must contain.
    pub adapter_name: Option<String>,
    /// Largest source tile, in bytes, the device must be able to bind.
    /// `None` accepts the adapter's default limit.
    pub min_tile_bytes: Option<u32>,
}

impl Default for WgpuOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            backends: wgpu::Backends::all(),
            adapter_name: None,
            min_tile_bytes: None,
        }
    }
}

impl WgpuOptions {
    /// Prefers integrated or software adapters.
    pub fn low_power() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::LowPower,
            ..Self::default()
        }
    }

    /// Requires storage bindings of at least `bytes`.
    pub fn with_min_tile_bytes(mut self, bytes: u32) -> Self {
        self.min_tile_bytes = Some(bytes);
        self
    }

    fn required_limits(&self, adapter: &wgpu::Limits) -> ConvResult<wgpu::Limits> {
        let mut limits = wgpu::Limits::downlevel_defaults();
        if let Some(bytes) = self.min_tile_bytes {
            if adapter.max_storage_buffer_binding_size < bytes {
                return Err(ConvError::adapter_not_found(format!(
                    "adapter binds at most {} storage bytes, {} requested",
                    adapter.max_storage_buffer_binding_size, bytes
                )));
            }
            limits.max_storage_buffer_binding_size = bytes;
            limits.max_buffer_size = limits.max_buffer_size.max(bytes as u64);
        }
        Ok(limits)
    }
}

/// A wgpu device and queue shared by stencil launches.
pub struct WgpuBackend {
    /// Device for resource creation.
    pub device: Arc<wgpu::Device>,
    /// Queue for submissions.
    pub queue: Arc<wgpu::Queue>,
    info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
}

impl WgpuBackend {
    /// Selects an adapter and opens a device on it.
    ///
    /// # Errors
    ///
    /// - [`ConvError::AdapterNotFound`] if no adapter matches `options`
    /// - [`ConvError::DeviceRequestFailed`] if the device cannot be opened
    pub fn init(options: WgpuOptions) -> ConvResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: options.backends,
            ..Default::default()
        });
        let adapter = select_adapter(&instance, &options)?;
        let info = adapter.get_info();
        let required_limits = options.required_limits(&adapter.limits())?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("slidewin stencil device"),
                required_features: wgpu::Features::empty(),
                required_limits,
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))?;
        let limits = device.limits();

        log::info!(
            "wgpu stencil device: {} ({:?}, {:?}), {} MiB storage bindings",
            info.name,
            info.backend,
            info.device_type,
            limits.max_storage_buffer_binding_size >> 20
        );

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            info,
            limits,
        })
    }

    /// The adapter the device was opened on.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    /// Limits granted to the device.
    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Checks that a tile of `elements` f32 values can be bound as storage.
    pub fn validate_tile(&self, elements: usize) -> ConvResult<()> {
        let bytes = elements.saturating_mul(std::mem::size_of::<f32>());
        let limit = self.limits.max_storage_buffer_binding_size as usize;
        if bytes > limit {
            return Err(ConvError::allocation_failure(bytes, limit));
        }
        Ok(())
    }

    /// The device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

fn select_adapter(instance: &wgpu::Instance, options: &WgpuOptions) -> ConvResult<wgpu::Adapter> {
    if let Some(name) = &options.adapter_name {
        let wanted = name.to_lowercase();
        return instance
            .enumerate_adapters(options.backends)
            .into_iter()
            .find(|a| a.get_info().name.to_lowercase().contains(&wanted))
            .ok_or_else(|| ConvError::adapter_not_found(format!("no adapter named like '{}'", name)));
    }

    // preferred class first, then anything
    [options.power_preference, wgpu::PowerPreference::None]
        .into_iter()
        .find_map(|power_preference| {
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            }))
        })
        .ok_or_else(|| ConvError::adapter_not_found("no wgpu adapter available"))
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.info.name)
            .field("backend", &self.info.backend)
            .field("max_storage_binding", &self.limits.max_storage_buffer_binding_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = WgpuOptions::default();
        assert_eq!(opts.power_preference, wgpu::PowerPreference::HighPerformance);
        assert!(opts.adapter_name.is_none());
        assert!(opts.min_tile_bytes.is_none());
    }

    #[test]
    fn test_required_limits() {
        let adapter = wgpu::Limits::default();
        let opts = WgpuOptions::default().with_min_tile_bytes(64 << 20);
        let limits = opts.required_limits(&adapter).unwrap();
        assert_eq!(limits.max_storage_buffer_binding_size, 64 << 20);

        let too_big = WgpuOptions::default().with_min_tile_bytes(u32::MAX);
        assert!(matches!(
            too_big.required_limits(&adapter),
            Err(ConvError::AdapterNotFound(_))
        ));
    }

    #[test]
    #[ignore = "Requires GPU"]
    fn test_backend_init() {
        let backend = WgpuBackend::init(WgpuOptions::default()).expect("Failed to init backend");
        assert!(!backend.adapter_info().name.is_empty());
        assert!(backend.validate_tile(1024).is_ok());
    }
}
