//! Engine and device configuration.
//!
//! This module provides [`ConvConfig`] for tuning the convolution engine
//! (compute tile granularity, parallel fan-out) and [`DeviceConfig`] for the
//! emulated device (memory budget, constant-cache size).
//!
//! # Example
//!
//! ```rust
//! use slidewin::ConvConfig;
//!
//! // Defaults match the reference tile layout (64x16)
//! let config = ConvConfig::default();
//! assert_eq!((config.tile_width, config.tile_height), (64, 16));
//!
//! // Or customize through the builder
//! let config = ConvConfig::builder()
//!     .tile_width(128)
//!     .tile_height(32)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.tile_width, 128);
//! ```
//!
//! # Radius Classes
//!
//! | Class | Max half-extent | Exact kernel extent |
//! |-------|-----------------|---------------------|
//! | small | [`SMALL_RADIUS`] (8) | 17 |
//! | large | [`LARGE_RADIUS`] (16) | 33 |
//!
//! The radii are compile-time constants: the exact stencil path is
//! instantiated over them with const generics.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest half-extent handled by the small radius class.
pub const SMALL_RADIUS: usize = 8;

/// Largest half-extent handled by the large radius class.
pub const LARGE_RADIUS: usize = 16;

/// Default compute tile width in elements.
pub const DEFAULT_TILE_WIDTH: usize = 64;

/// Default compute tile height in rows.
pub const DEFAULT_TILE_HEIGHT: usize = 16;

/// Default device memory budget (1 GiB).
pub const DEFAULT_MEMORY_LIMIT: usize = 1 << 30;

/// Default constant cache size (64 KiB, two banks of 32 KiB).
pub const DEFAULT_CONSTANT_CACHE_BYTES: usize = 64 * 1024;

/// Convolution engine configuration.
///
/// # Creating a Configuration
///
/// ```rust
/// use slidewin::ConvConfig;
///
/// let config = ConvConfig {
///     parallel_threshold: 1 << 14,
///     ..Default::default()
/// };
/// config.validate().expect("Invalid configuration");
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConvConfig {
    /// Compute tile width; destination allocations round their width up to it.
    /// Must be a non-zero multiple of 4 (vec4 rows on the device).
    pub tile_width: usize,

    /// Compute tile height; destination allocations round their height up to it.
    pub tile_height: usize,

    /// Output elements per launch above which the CPU stencil fans out over
    /// rayon workers. Smaller launches run on the stream thread itself.
    pub parallel_threshold: usize,

    /// Use the branch-free exact path when a kernel fills its bucket.
    /// Disabling it forces the within path (useful for parity checks).
    pub exact_fast_path: bool,
}

impl Default for ConvConfig {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_WIDTH,
            tile_height: DEFAULT_TILE_HEIGHT,
            parallel_threshold: 4096,
            exact_fast_path: true,
        }
    }
}

impl ConvConfig {
    /// Starts a builder from the default configuration.
    pub fn builder() -> ConvConfigBuilder {
        ConvConfigBuilder {
            config: Self::default(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a tile dimension is zero or `tile_width`
    /// is not a multiple of 4.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_width == 0 {
            return Err(ConfigError::InvalidTile("tile_width must be > 0"));
        }
        if self.tile_width % 4 != 0 {
            return Err(ConfigError::InvalidTile("tile_width must be a multiple of 4"));
        }
        if self.tile_height == 0 {
            return Err(ConfigError::InvalidTile("tile_height must be > 0"));
        }
        Ok(())
    }
}

/// Builder for [`ConvConfig`].
#[derive(Debug, Clone)]
pub struct ConvConfigBuilder {
    config: ConvConfig,
}

impl ConvConfigBuilder {
    /// Sets the compute tile width.
    pub fn tile_width(mut self, width: usize) -> Self {
        self.config.tile_width = width;
        self
    }

    /// Sets the compute tile height.
    pub fn tile_height(mut self, height: usize) -> Self {
        self.config.tile_height = height;
        self
    }

    /// Sets the parallel fan-out threshold.
    pub fn parallel_threshold(mut self, threshold: usize) -> Self {
        self.config.parallel_threshold = threshold;
        self
    }

    /// Enables or disables the exact fast path.
    pub fn exact_fast_path(mut self, enabled: bool) -> Self {
        self.config.exact_fast_path = enabled;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ConvConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Emulated device configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceConfig {
    /// Total bytes the device allocator may hand out.
    pub memory_limit: usize,

    /// Size of the constant cache in bytes, split into two banks.
    pub constant_cache_bytes: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            constant_cache_bytes: DEFAULT_CONSTANT_CACHE_BYTES,
        }
    }
}

impl DeviceConfig {
    /// Device with a custom memory budget and default constant cache.
    pub fn with_memory_limit(memory_limit: usize) -> Self {
        Self {
            memory_limit,
            ..Default::default()
        }
    }

    /// Bytes available to one constant-cache bank.
    #[inline]
    pub fn bank_bytes(&self) -> usize {
        self.constant_cache_bytes / 2
    }

    /// Validates the configuration.
    ///
    /// The constant cache must hold two banks, each large enough for the
    /// largest exact kernel in `f64`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let largest = (2 * LARGE_RADIUS + 1) * (2 * LARGE_RADIUS + 1) * std::mem::size_of::<f64>();
        if self.bank_bytes() < largest {
            return Err(ConfigError::ConstantCacheTooSmall {
                bytes: self.constant_cache_bytes,
                required: largest * 2,
            });
        }
        if self.constant_cache_bytes % 16 != 0 {
            return Err(ConfigError::InvalidDevice(
                "constant_cache_bytes must be a multiple of 16",
            ));
        }
        Ok(())
    }
}

/// Errors returned by [`ConvConfig::validate`] and [`DeviceConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A tile dimension is invalid.
    #[error("Invalid tile: {0}")]
    InvalidTile(&'static str),

    /// A device parameter is invalid.
    #[error("Invalid device parameter: {0}")]
    InvalidDevice(&'static str),

    /// Constant cache cannot hold two banks of the largest kernel.
    #[error("Constant cache of {bytes} bytes is too small, need at least {required}")]
    ConstantCacheTooSmall {
        /// Configured size.
        bytes: usize,
        /// Minimum size.
        required: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        assert!(ConvConfig::default().validate().is_ok());
        assert!(DeviceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ConvConfig::builder()
            .tile_width(32)
            .tile_height(8)
            .parallel_threshold(0)
            .exact_fast_path(false)
            .build()
            .unwrap();
        assert_eq!(config.tile_width, 32);
        assert_eq!(config.tile_height, 8);
        assert_eq!(config.parallel_threshold, 0);
        assert!(!config.exact_fast_path);
    }

    #[test]
    fn test_invalid_tile() {
        assert!(ConvConfig::builder().tile_width(0).build().is_err());
        assert!(ConvConfig::builder().tile_width(30).build().is_err());
        assert!(ConvConfig::builder().tile_height(0).build().is_err());
    }

    #[test]
    fn test_constant_cache_too_small() {
        let config = DeviceConfig {
            constant_cache_bytes: 1024,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ConstantCacheTooSmall { .. })
        ));
    }

    #[test]
    fn test_bank_bytes() {
        assert_eq!(DeviceConfig::default().bank_bytes(), 32 * 1024);
    }
}
