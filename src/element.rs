//! Numeric element abstraction.
//!
//! The engine is written once over [`Element`] and instantiated for `f32` and
//! `f64`. The only arithmetic the stencils need is a row-wise multiply-add,
//! which each implementation vectorizes with `wide`.

use std::fmt::Debug;

use wide::{f32x8, f64x4};

/// A numeric type the convolution engine can operate on.
///
/// `bytemuck::Pod` lets the constant cache store coefficients of any
/// element type in one untyped bank.
pub trait Element:
    bytemuck::Pod + Copy + Default + PartialEq + PartialOrd + Debug + Send + Sync + 'static
{
    /// Additive identity.
    const ZERO: Self;
    /// Multiplicative identity.
    const ONE: Self;
    /// Short type name used in logs and errors.
    const NAME: &'static str;

    /// `acc[i] += src[i] * coeff` for every `i` in `acc`.
    ///
    /// `src` must be at least as long as `acc`.
    fn mul_add_row(acc: &mut [Self], src: &[Self], coeff: Self);

    /// Lossy conversion used by tests and reference paths.
    fn from_f64(value: f64) -> Self;

    /// Widening conversion used by tests and reference paths.
    fn to_f64(self) -> f64;
}

impl Element for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const NAME: &'static str = "f32";

    #[inline]
    fn mul_add_row(acc: &mut [f32], src: &[f32], coeff: f32) {
        debug_assert!(src.len() >= acc.len());
        let src = &src[..acc.len()];
        let c = f32x8::splat(coeff);

        let mut acc_chunks = acc.chunks_exact_mut(8);
        let mut src_chunks = src.chunks_exact(8);
        for (a, s) in (&mut acc_chunks).zip(&mut src_chunks) {
            let av = f32x8::new(std::array::from_fn(|k| a[k]));
            let sv = f32x8::new(std::array::from_fn(|k| s[k]));
            a.copy_from_slice(&(sv * c + av).to_array());
        }
        for (a, s) in acc_chunks
            .into_remainder()
            .iter_mut()
            .zip(src_chunks.remainder())
        {
            *a += *s * coeff;
        }
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Element for f64 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const NAME: &'static str = "f64";

    #[inline]
    fn mul_add_row(acc: &mut [f64], src: &[f64], coeff: f64) {
        debug_assert!(src.len() >= acc.len());
        let src = &src[..acc.len()];
        let c = f64x4::splat(coeff);

        let mut acc_chunks = acc.chunks_exact_mut(4);
        let mut src_chunks = src.chunks_exact(4);
        for (a, s) in (&mut acc_chunks).zip(&mut src_chunks) {
            let av = f64x4::new(std::array::from_fn(|k| a[k]));
            let sv = f64x4::new(std::array::from_fn(|k| s[k]));
            a.copy_from_slice(&(sv * c + av).to_array());
        }
        for (a, s) in acc_chunks
            .into_remainder()
            .iter_mut()
            .zip(src_chunks.remainder())
        {
            *a += *s * coeff;
        }
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
}
