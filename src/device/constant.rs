//! Two-bank constant cache for kernel coefficients.
//!
//! Every stencil launch reads its coefficients from a bank rather than from
//! the caller's matrix. Single-kernel invocations use bank 0 only; per-matrix
//! kernels alternate banks with the source ping-pong slot so the next kernel
//! can be uploaded while the current one is still being read.

use std::sync::RwLock;

use crate::element::Element;
use crate::error::{ConvError, ConvResult};
use crate::matrix::Matrix;

/// Number of banks.
pub const CONSTANT_BANKS: usize = 2;

/// Shape and type of the coefficients currently held by a bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankContents {
    /// Kernel width.
    pub width: usize,
    /// Kernel height.
    pub height: usize,
    /// Element type name.
    pub element: &'static str,
}

struct Bank {
    words: Box<[u64]>,
    contents: Option<BankContents>,
}

/// The device's read-mostly coefficient store.
///
/// Banks are stored as `u64` words so any [`Element`] up to 8 bytes can be
/// viewed in place through `bytemuck`.
pub struct ConstantCache {
    banks: [RwLock<Bank>; CONSTANT_BANKS],
    bank_bytes: usize,
}

impl ConstantCache {
    /// Creates a cache of `total_bytes`, split evenly between the banks.
    pub fn new(total_bytes: usize) -> Self {
        let bank_bytes = total_bytes / CONSTANT_BANKS;
        let words = bank_bytes / std::mem::size_of::<u64>();
        let make = || {
            RwLock::new(Bank {
                words: vec![0u64; words].into_boxed_slice(),
                contents: None,
            })
        };
        Self {
            banks: [make(), make()],
            bank_bytes: words * std::mem::size_of::<u64>(),
        }
    }

    /// Capacity of one bank in bytes.
    #[inline]
    pub fn bank_bytes(&self) -> usize {
        self.bank_bytes
    }

    /// Largest number of `T` coefficients one bank holds.
    #[inline]
    pub fn capacity<T: Element>(&self) -> usize {
        self.bank_bytes / std::mem::size_of::<T>()
    }

    /// Checks that a `width x height` kernel of `T` fits into one bank.
    pub fn check_fits<T: Element>(&self, width: usize, height: usize) -> ConvResult<()> {
        let requested = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(std::mem::size_of::<T>()))
            .ok_or_else(|| ConvError::overflow("kernel byte size"))?;
        if requested > self.bank_bytes {
            return Err(ConvError::ConstantCacheOverflow {
                requested,
                capacity: self.bank_bytes,
            });
        }
        Ok(())
    }

    /// Uploads `kernel` into `bank`, row by row, dropping the row padding.
    ///
    /// Coefficients are stored densely as `height` rows of `width` values.
    pub fn load<T: Element>(&self, bank: usize, kernel: &Matrix<T>) -> ConvResult<()> {
        if kernel.is_empty() {
            return Err(ConvError::validation("cannot load an empty kernel"));
        }
        self.check_fits::<T>(kernel.width(), kernel.height())?;
        let lock = self.bank(bank)?;
        let mut guard = lock.write().unwrap_or_else(|e| e.into_inner());

        let dense = kernel.width() * kernel.height();
        let coeffs = view_mut::<T>(&mut guard.words)?;
        for (dst, row) in coeffs[..dense]
            .chunks_exact_mut(kernel.width())
            .zip(kernel.rows())
        {
            dst.copy_from_slice(row);
        }
        guard.contents = Some(BankContents {
            width: kernel.width(),
            height: kernel.height(),
            element: T::NAME,
        });

        log::trace!(
            "constant bank {} <- {}x{} {} kernel",
            bank,
            kernel.width(),
            kernel.height(),
            T::NAME
        );
        Ok(())
    }

    /// Runs `f` over the dense coefficients held by `bank`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvError::Validation`] if the bank is empty or holds
    /// coefficients of a different element type.
    pub fn with_coefficients<T: Element, R>(
        &self,
        bank: usize,
        f: impl FnOnce(&[T], BankContents) -> R,
    ) -> ConvResult<R> {
        let lock = self.bank(bank)?;
        let guard = lock.read().unwrap_or_else(|e| e.into_inner());
        let contents = guard
            .contents
            .ok_or_else(|| ConvError::validation(format!("constant bank {} is empty", bank)))?;
        if contents.element != T::NAME {
            return Err(ConvError::validation(format!(
                "constant bank {} holds {} coefficients, {} requested",
                bank,
                contents.element,
                T::NAME
            )));
        }
        let coeffs = view::<T>(&guard.words)?;
        Ok(f(&coeffs[..contents.width * contents.height], contents))
    }

    /// Shape of the kernel currently held by `bank`, if any.
    pub fn contents(&self, bank: usize) -> ConvResult<Option<BankContents>> {
        let lock = self.bank(bank)?;
        let guard = lock.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.contents)
    }

    /// Forgets the contents of every bank.
    pub fn clear(&self) {
        for lock in &self.banks {
            let mut guard = lock.write().unwrap_or_else(|e| e.into_inner());
            guard.contents = None;
        }
    }

    fn bank(&self, bank: usize) -> ConvResult<&RwLock<Bank>> {
        self.banks.get(bank).ok_or_else(|| {
            ConvError::validation(format!(
                "constant bank {} out of range (have {})",
                bank, CONSTANT_BANKS
            ))
        })
    }
}

fn view<T: Element>(words: &[u64]) -> ConvResult<&[T]> {
    bytemuck::try_cast_slice(words).map_err(|_| ConvError::UnsupportedElement(T::NAME))
}

fn view_mut<T: Element>(words: &mut [u64]) -> ConvResult<&mut [T]> {
    bytemuck::try_cast_slice_mut(words).map_err(|_| ConvError::UnsupportedElement(T::NAME))
}

impl std::fmt::Debug for ConstantCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstantCache")
            .field("banks", &CONSTANT_BANKS)
            .field("bank_bytes", &self.bank_bytes)
            .finish()
    }
}
