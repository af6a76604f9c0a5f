//! Radius bucketing for kernel specialization.
//!
//! A kernel's half-extents select one of four `(row class, column class)`
//! buckets. Each class caps the half-extent it accepts:
//!
//! | Class | Accepts half-extent | Halo per side |
//! |-------|---------------------|---------------|
//! | [`RadiusClass::Small`] | `0..=8`  | 8  |
//! | [`RadiusClass::Large`] | `9..=16` | 16 |
//!
//! Independently of the bucket, a kernel is *exact* on an axis when its
//! extent is precisely `2 * class_max + 1`. Kernels exact on both axes run the
//! branch-free stencil instantiated for that radius; all others run the
//! *within* stencil, which offsets into the bucket's halo at launch time.
//!
//! Selection is a pure function of the kernel extents.
//!
//! # Example
//!
//! ```rust
//! use slidewin::bucket::{select_bucket, RadiusBucket, RadiusClass};
//!
//! // 3x3 kernel: small on both axes, not exact
//! let sel = select_bucket(3, 3).unwrap();
//! assert_eq!(sel.bucket, RadiusBucket::new(RadiusClass::Small, RadiusClass::Small));
//! assert!(!sel.is_exact());
//!
//! // 17 wide, 33 tall: small columns, large rows, exact on both axes
//! let sel = select_bucket(17, 33).unwrap();
//! assert_eq!(sel.bucket.rows, RadiusClass::Large);
//! assert_eq!(sel.bucket.cols, RadiusClass::Small);
//! assert!(sel.is_exact());
//! ```

use crate::config::{LARGE_RADIUS, SMALL_RADIUS};
use crate::error::{ConvError, ConvResult};

/// Capacity class of one kernel axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RadiusClass {
    /// Half-extent up to [`SMALL_RADIUS`].
    Small,
    /// Half-extent up to [`LARGE_RADIUS`].
    Large,
}

impl RadiusClass {
    /// Largest half-extent this class accepts; also its halo width.
    #[inline]
    pub const fn max_radius(self) -> usize {
        match self {
            RadiusClass::Small => SMALL_RADIUS,
            RadiusClass::Large => LARGE_RADIUS,
        }
    }

    /// Kernel extent that exactly fills this class.
    #[inline]
    pub const fn exact_extent(self) -> usize {
        2 * self.max_radius() + 1
    }

    /// Smallest class accepting `half`, `None` if `half > LARGE_RADIUS`.
    #[inline]
    pub const fn classify(half: usize) -> Option<Self> {
        if half <= SMALL_RADIUS {
            Some(RadiusClass::Small)
        } else if half <= LARGE_RADIUS {
            Some(RadiusClass::Large)
        } else {
            None
        }
    }
}

/// One of the four `(rows, cols)` radius buckets.
///
/// `rows` classifies the kernel's half-height (vertical halo), `cols` its
/// half-width (horizontal halo).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RadiusBucket {
    /// Class of the vertical axis.
    pub rows: RadiusClass,
    /// Class of the horizontal axis.
    pub cols: RadiusClass,
}

impl RadiusBucket {
    /// `(S,S)`.
    pub const SMALL: Self = Self::new(RadiusClass::Small, RadiusClass::Small);
    /// `(L,L)`.
    pub const LARGE: Self = Self::new(RadiusClass::Large, RadiusClass::Large);

    /// All four buckets in dispatch order.
    pub const ALL: [Self; 4] = [
        Self::new(RadiusClass::Small, RadiusClass::Small),
        Self::new(RadiusClass::Small, RadiusClass::Large),
        Self::new(RadiusClass::Large, RadiusClass::Small),
        Self::new(RadiusClass::Large, RadiusClass::Large),
    ];

    /// Creates a bucket.
    #[inline]
    pub const fn new(rows: RadiusClass, cols: RadiusClass) -> Self {
        Self { rows, cols }
    }

    /// Horizontal halo in elements.
    #[inline]
    pub const fn radius_x(self) -> usize {
        self.cols.max_radius()
    }

    /// Vertical halo in rows.
    #[inline]
    pub const fn radius_y(self) -> usize {
        self.rows.max_radius()
    }
}

/// Compact label, e.g. `R8x16` (rows x cols).
impl std::fmt::Display for RadiusBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}x{}", self.radius_y(), self.radius_x())
    }
}

/// Outcome of bucket selection for one kernel shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketSelection {
    /// Selected bucket.
    pub bucket: RadiusBucket,
    /// Kernel height is exactly `2 * rows.max_radius() + 1`.
    pub exact_rows: bool,
    /// Kernel width is exactly `2 * cols.max_radius() + 1`.
    pub exact_cols: bool,
    /// `kernel_width / 2`.
    pub half_width: usize,
    /// `kernel_height / 2`.
    pub half_height: usize,
}

impl BucketSelection {
    /// Both axes fill their class exactly; the branch-free path applies.
    #[inline]
    pub fn is_exact(&self) -> bool {
        self.exact_rows && self.exact_cols
    }

    /// Offset of the first tap inside the bucket's halo, `(x, y)`.
    ///
    /// Zero for an exact kernel; positive when the kernel is smaller than
    /// its bucket.
    #[inline]
    pub fn tap_offset(&self) -> (usize, usize) {
        (
            self.bucket.radius_x() - self.half_width,
            self.bucket.radius_y() - self.half_height,
        )
    }
}

/// Classifies a kernel of `kernel_width x kernel_height`.
///
/// # Errors
///
/// Returns [`ConvError::UnsupportedKernelSize`] when either half-extent
/// exceeds [`LARGE_RADIUS`], and [`ConvError::Validation`] for an empty kernel.
pub fn select_bucket(kernel_width: usize, kernel_height: usize) -> ConvResult<BucketSelection> {
    if kernel_width == 0 || kernel_height == 0 {
        return Err(ConvError::validation(format!(
            "kernel must be non-empty, got {}x{}",
            kernel_width, kernel_height
        )));
    }

    let half_width = kernel_width / 2;
    let half_height = kernel_height / 2;

    let (rows, cols) = match (
        RadiusClass::classify(half_height),
        RadiusClass::classify(half_width),
    ) {
        (Some(rows), Some(cols)) => (rows, cols),
        _ => {
            return Err(ConvError::unsupported_kernel(
                half_width,
                half_height,
                LARGE_RADIUS,
            ))
        }
    };

    Ok(BucketSelection {
        bucket: RadiusBucket::new(rows, cols),
        exact_rows: kernel_height == rows.exact_extent(),
        exact_cols: kernel_width == cols.exact_extent(),
        half_width,
        half_height,
    })
}
