//! Pitch-padded matrices and homogeneous matrix stacks.
//!
//! This module provides the container types the engine consumes:
//!
//! - [`Matrix`]: one 2D matrix with a padded row stride (pitch)
//! - [`MatrixArray`]: an ordered stack of same-shaped matrices
//!
//! # Memory Layout
//!
//! Rows are stored back to back, each `pitch` elements long. Only the first
//! `width` elements of a row are logical data; the padding is kept zeroed and
//! is never read by the engine. `pitch` is `width` rounded up to
//! [`PITCH_ALIGN`].
//!
//! ```text
//!          width        pad
//!   ┌──────────────────┬────┐
//!   │ row 0            │0000│  ← pitch elements
//!   │ row 1            │0000│
//!   │ ...              │    │
//!   └──────────────────┴────┘
//! ```
//!
//! The [`Location`] tag tells the pipeline whether a stack lives in host
//! memory (staged through the three-stream ping-pong driver) or is already
//! device resident (processed by the resident driver).

use std::ops::{Deref, Index};

use crate::element::Element;
use crate::error::{ConvError, ConvResult};

/// Row stride alignment in elements.
pub const PITCH_ALIGN: usize = 8;

/// Where a matrix's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Location {
    /// Host (page-locked) memory.
    #[default]
    Host,
    /// Device-resident memory.
    Device,
}

/// Rounds `width` up to [`PITCH_ALIGN`].
#[inline]
pub const fn pitch_for(width: usize) -> usize {
    width.div_ceil(PITCH_ALIGN) * PITCH_ALIGN
}

/// A 2D matrix with a padded row stride.
///
/// # Example
///
/// ```rust
/// use slidewin::{Location, Matrix};
///
/// let m = Matrix::from_fn(3, 2, Location::Host, |x, y| (x + 10 * y) as f32);
/// assert_eq!(m.pitch(), 8);
/// assert_eq!(m.get(2, 1), 12.0);
/// assert_eq!(m.row(1), &[10.0, 11.0, 12.0]);
/// ```
#[derive(Clone, PartialEq)]
pub struct Matrix<T: Element> {
    width: usize,
    height: usize,
    pitch: usize,
    location: Location,
    data: Vec<T>,
}

impl<T: Element> Matrix<T> {
    /// Creates a zero-filled matrix.
    pub fn zeros(width: usize, height: usize, location: Location) -> Self {
        Self::filled(width, height, location, T::ZERO)
    }

    /// Creates a matrix with every logical element set to `value`.
    pub fn filled(width: usize, height: usize, location: Location, value: T) -> Self {
        Self::from_fn(width, height, location, |_, _| value)
    }

    /// Creates a matrix from a function of `(x, y)`.
    pub fn from_fn<F>(width: usize, height: usize, location: Location, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> T,
    {
        let pitch = pitch_for(width);
        let mut data = vec![T::ZERO; pitch * height];
        for y in 0..height {
            for x in 0..width {
                data[y * pitch + x] = f(x, y);
            }
        }
        Self {
            width,
            height,
            pitch,
            location,
            data,
        }
    }

    /// Creates a matrix from row-major values without padding.
    ///
    /// # Errors
    ///
    /// Returns [`ConvError::DimensionMismatch`] if `values.len() != width * height`.
    pub fn from_rows(
        width: usize,
        height: usize,
        location: Location,
        values: &[T],
    ) -> ConvResult<Self> {
        if values.len() != width * height {
            return Err(ConvError::dimension_mismatch(
                &[width * height],
                &[values.len()],
            ));
        }
        Ok(Self::from_fn(width, height, location, |x, y| {
            values[y * width + x]
        }))
    }

    /// Logical width in elements.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Logical height in rows.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row stride in elements, padding included.
    #[inline]
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Number of logical elements.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.width * self.height
    }

    /// Storage location tag.
    #[inline]
    pub fn location(&self) -> Location {
        self.location
    }

    /// `(width, height)`.
    #[inline]
    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Returns `true` if the matrix has no logical elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Element at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is outside the logical extent.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        assert!(x < self.width && y < self.height, "({}, {}) out of bounds", x, y);
        self.data[y * self.pitch + x]
    }

    /// Sets the element at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is outside the logical extent.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        assert!(x < self.width && y < self.height, "({}, {}) out of bounds", x, y);
        self.data[y * self.pitch + x] = value;
    }

    /// Logical elements of row `y`.
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        let start = y * self.pitch;
        &self.data[start..start + self.width]
    }

    /// Mutable logical elements of row `y`.
    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [T] {
        let start = y * self.pitch;
        &mut self.data[start..start + self.width]
    }

    /// Iterator over logical rows.
    pub fn rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        (0..self.height).map(move |y| self.row(y))
    }

    /// Raw pitch-padded storage.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Logical elements in row-major order, padding dropped.
    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.element_count());
        for row in self.rows() {
            out.extend_from_slice(row);
        }
        out
    }

    /// Copy of this matrix tagged with another location.
    pub fn to_location(&self, location: Location) -> Self {
        Self {
            location,
            ..self.clone()
        }
    }

    /// Re-shapes the matrix in place.
    ///
    /// Storage is reused untouched when the shape already matches (only the
    /// location tag changes); otherwise it is reallocated and zeroed.
    pub fn reshape(&mut self, width: usize, height: usize, location: Location) {
        if self.width == width && self.height == height {
            self.location = location;
            return;
        }
        *self = Self::zeros(width, height, location);
    }
}

impl<T: Element> std::fmt::Debug for Matrix<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matrix")
            .field("type", &T::NAME)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pitch", &self.pitch)
            .field("location", &self.location)
            .finish()
    }
}

/// An ordered stack of matrices sharing one shape.
///
/// Iteration order is insertion order, which is also the order the pipeline
/// processes (and alternates buffers over) the stack.
///
/// # Example
///
/// ```rust
/// use slidewin::{Location, Matrix, MatrixArray};
///
/// let mut stack = MatrixArray::new();
/// stack.push(Matrix::<f32>::zeros(4, 4, Location::Host)).unwrap();
/// assert!(stack.push(Matrix::<f32>::zeros(4, 5, Location::Host)).is_err());
/// assert_eq!(stack.len(), 1);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct MatrixArray<T: Element> {
    matrices: Vec<Matrix<T>>,
}

impl<T: Element> Default for MatrixArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> MatrixArray<T> {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self {
            matrices: Vec::new(),
        }
    }

    /// Creates a stack of `count` zeroed matrices.
    pub fn zeros(width: usize, height: usize, count: usize, location: Location) -> Self {
        Self {
            matrices: (0..count)
                .map(|_| Matrix::zeros(width, height, location))
                .collect(),
        }
    }

    /// Builds a stack, checking that all matrices share one shape and location.
    pub fn from_matrices(matrices: Vec<Matrix<T>>) -> ConvResult<Self> {
        let mut stack = Self::new();
        for m in matrices {
            stack.push(m)?;
        }
        Ok(stack)
    }

    /// Appends a matrix.
    ///
    /// # Errors
    ///
    /// Returns [`ConvError::DimensionMismatch`] if the matrix's shape differs
    /// from the stack's, or [`ConvError::Validation`] on a location mismatch.
    pub fn push(&mut self, matrix: Matrix<T>) -> ConvResult<()> {
        if let Some(first) = self.matrices.first() {
            if first.dims() != matrix.dims() {
                return Err(ConvError::dimension_mismatch(
                    &[first.width(), first.height()],
                    &[matrix.width(), matrix.height()],
                ));
            }
            if first.location() != matrix.location() {
                return Err(ConvError::validation(format!(
                    "stack is {:?}-resident, matrix is {:?}",
                    first.location(),
                    matrix.location()
                )));
            }
        }
        self.matrices.push(matrix);
        Ok(())
    }

    /// Shared shape of the stack, `None` when empty.
    pub fn dims(&self) -> Option<(usize, usize)> {
        self.matrices.first().map(Matrix::dims)
    }

    /// Mutable access to the matrices.
    ///
    /// The slice cannot change the stack length; shape changes made through
    /// it are the caller's responsibility.
    pub fn as_mut_slice(&mut self) -> &mut [Matrix<T>] {
        &mut self.matrices
    }

    /// Consumes the stack.
    pub fn into_vec(self) -> Vec<Matrix<T>> {
        self.matrices
    }
}

impl<T: Element> Deref for MatrixArray<T> {
    type Target = [Matrix<T>];

    fn deref(&self) -> &Self::Target {
        &self.matrices
    }
}

impl<T: Element> Index<usize> for Matrix<T> {
    type Output = T;

    /// Indexes raw storage (pitch-padded).
    fn index(&self, index: usize) -> &Self::Output {
        &self.data[index]
    }
}

/// Validates that a slice of matrices is a homogeneous, non-empty stack.
///
/// Returns the shared `(width, height)` and location.
pub fn stack_shape<T: Element>(stack: &[Matrix<T>]) -> ConvResult<(usize, usize, Location)> {
    let first = stack
        .first()
        .ok_or_else(|| ConvError::dimension_mismatch(&[1], &[0]))?;
    for m in &stack[1..] {
        if m.dims() != first.dims() {
            return Err(ConvError::dimension_mismatch(
                &[first.width(), first.height()],
                &[m.width(), m.height()],
            ));
        }
        if m.location() != first.location() {
            return Err(ConvError::validation("stack mixes host and device matrices"));
        }
    }
    Ok((first.width(), first.height(), first.location()))
}
