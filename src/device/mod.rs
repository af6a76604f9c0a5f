//! Emulated accelerator device.
//!
//! A [`Device`] owns the state an invocation borrows from the backend:
//!
//! - a byte budget enforced by the allocator ([`Device::allocate`])
//! - the two-bank [`ConstantCache`]
//! - a single-flight lock ([`Device::begin_flight`]) serializing invocations,
//!   since the constant cache is shared
//!
//! Streams are not owned by the device; each invocation spawns its own
//! [`StreamSet`] inside a thread scope so jobs can borrow its buffers.
//!
//! # Example
//!
//! ```rust
//! use slidewin::{Device, DeviceConfig};
//!
//! let device = Device::new(DeviceConfig::default()).unwrap();
//! {
//!     let arena = device.allocate::<f32>(1024).unwrap();
//!     assert_eq!(device.allocated_bytes(), arena.size_bytes());
//! }
//! assert_eq!(device.allocated_bytes(), 0);
//! ```

pub mod arena;
pub mod constant;
pub mod stream;
pub mod transfer;

pub use arena::{DeviceArena, Region, RegionName};
pub use constant::{BankContents, ConstantCache, CONSTANT_BANKS};
pub use stream::{Event, Stream, StreamSet};
pub use transfer::{copy_from_tile, copy_to_tile, TransferKind};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::DeviceConfig;
use crate::element::Element;
use crate::error::{ConvError, ConvResult};
use arena::Reservation;

/// Handle to the emulated device.
pub struct Device {
    config: DeviceConfig,
    initialized: AtomicBool,
    used: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    constants: ConstantCache,
    flight: Mutex<()>,
}

impl Device {
    /// Brings up a device.
    ///
    /// # Errors
    ///
    /// Returns [`ConvError::Config`] if `config` is invalid.
    pub fn new(config: DeviceConfig) -> ConvResult<Self> {
        config.validate()?;
        log::info!(
            "device up: {} MiB budget, {} KiB constant cache",
            config.memory_limit >> 20,
            config.constant_cache_bytes >> 10
        );
        Ok(Self {
            constants: ConstantCache::new(config.constant_cache_bytes),
            config,
            initialized: AtomicBool::new(true),
            used: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            flight: Mutex::new(()),
        })
    }

    /// Device configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Returns `true` until [`Device::shutdown`] is called.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Fails with [`ConvError::NotInitialized`] after shutdown.
    pub fn ensure_initialized(&self) -> ConvResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ConvError::NotInitialized)
        }
    }

    /// Shuts the device down. Later invocations fail with
    /// [`ConvError::NotInitialized`]; an invocation already in flight
    /// completes normally.
    pub fn shutdown(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            self.constants.clear();
            log::info!("device shut down");
        }
    }

    /// Bytes currently held by live allocations.
    pub fn allocated_bytes(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Bytes still available under the budget.
    pub fn available_bytes(&self) -> usize {
        self.config.memory_limit.saturating_sub(self.allocated_bytes())
    }

    /// Allocates one zeroed arena of `elements` values of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvError::AllocationFailure`] when the request exceeds the
    /// remaining budget or the host cannot back it, and
    /// [`ConvError::Overflow`] if the byte size does not fit in `usize`.
    pub fn allocate<T: Element>(&self, elements: usize) -> ConvResult<DeviceArena<T>> {
        self.ensure_initialized()?;
        let bytes = elements
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| ConvError::overflow(format!("{} x {} bytes", elements, T::NAME)))?;

        let limit = self.config.memory_limit;
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= limit)
            })
            .map_err(|used| ConvError::allocation_failure(bytes, limit.saturating_sub(used)))?;
        let reservation = Reservation::new(Arc::clone(&self.used), Arc::clone(&self.live), bytes);

        let mut data: Vec<T> = Vec::new();
        if data.try_reserve_exact(elements).is_err() {
            // reservation drops here and returns the bytes
            return Err(ConvError::allocation_failure(bytes, self.available_bytes()));
        }
        data.resize(elements, T::ZERO);

        log::debug!("allocated {} bytes ({} x {})", bytes, elements, T::NAME);
        Ok(DeviceArena::new(data.into_boxed_slice(), reservation))
    }

    /// Acquires exclusive use of the device for one invocation.
    ///
    /// Blocks while another invocation holds the device.
    pub fn begin_flight(&self) -> ConvResult<FlightGuard<'_>> {
        self.ensure_initialized()?;
        let guard = self.flight.lock().unwrap_or_else(|e| e.into_inner());
        Ok(FlightGuard {
            device: self,
            _guard: guard,
        })
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("initialized", &self.is_initialized())
            .field("allocated_bytes", &self.allocated_bytes())
            .field("memory_limit", &self.config.memory_limit)
            .finish()
    }
}

/// Exclusive access to a device for the duration of one invocation.
///
/// The constant cache is only reachable through a guard.
pub struct FlightGuard<'d> {
    device: &'d Device,
    _guard: MutexGuard<'d, ()>,
}

impl<'d> FlightGuard<'d> {
    /// The device in flight.
    pub fn device(&self) -> &'d Device {
        self.device
    }

    /// The device's constant cache.
    pub fn constants(&self) -> &'d ConstantCache {
        &self.device.constants
    }
}

impl std::fmt::Debug for FlightGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_accounting() {
        let device = Device::new(DeviceConfig::with_memory_limit(4096)).unwrap();
        let a = device.allocate::<f32>(256).unwrap();
        assert_eq!(device.allocated_bytes(), 1024);
        assert_eq!(device.allocation_count(), 1);
        assert!(a.as_slice().iter().all(|&v| v == 0.0));

        let b = device.allocate::<f64>(128).unwrap();
        assert_eq!(device.allocated_bytes(), 2048);
        drop(a);
        drop(b);
        assert_eq!(device.allocated_bytes(), 0);
        assert_eq!(device.allocation_count(), 0);
    }

    #[test]
    fn test_allocation_over_budget() {
        let device = Device::new(DeviceConfig::with_memory_limit(1000)).unwrap();
        let _held = device.allocate::<f32>(200).unwrap();
        match device.allocate::<f32>(100) {
            Err(ConvError::AllocationFailure { requested, available }) => {
                assert_eq!(requested, 400);
                assert_eq!(available, 200);
            }
            other => panic!("expected allocation failure, got {:?}", other),
        }
        assert_eq!(device.allocated_bytes(), 800);
    }

    #[test]
    fn test_allocation_overflow() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        assert!(matches!(
            device.allocate::<f64>(usize::MAX / 2),
            Err(ConvError::Overflow(_))
        ));
    }

    #[test]
    fn test_shutdown() {
        let device = Device::new(DeviceConfig::default()).unwrap();
        assert!(device.begin_flight().is_ok());
        device.shutdown();
        assert!(!device.is_initialized());
        assert!(matches!(device.begin_flight(), Err(ConvError::NotInitialized)));
        assert!(matches!(device.allocate::<f32>(1), Err(ConvError::NotInitialized)));
    }

    #[test]
    fn test_invalid_config() {
        let config = DeviceConfig {
            constant_cache_bytes: 64,
            ..Default::default()
        };
        assert!(matches!(Device::new(config), Err(ConvError::Config(_))));
    }

    #[test]
    fn test_flight_serializes() {
        use std::sync::atomic::AtomicUsize;
        use std::thread;

        let device = Device::new(DeviceConfig::default()).unwrap();
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let _flight = device.begin_flight().unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(std::time::Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
