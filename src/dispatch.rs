//! Boundary dispatcher: the public convolution entry points.
//!
//! Every invocation runs the same steps while holding the device's
//! single-flight guard:
//!
//! 1. validate the stacks and kernels (no device work yet)
//! 2. size the destination for the border policy
//! 3. select the radius bucket and stencil specialization
//! 4. plan and perform the single device allocation
//! 5. reshape the destination and run the driver for the stack's location
//!
//! Only step 4 can fail once the request is known to be well formed, and it
//! fails before any destination matrix is touched.
//!
//! # Example
//!
//! ```rust
//! use slidewin::{Convolver, Device, DeviceConfig, Kernels, Location, Matrix};
//!
//! let device = Device::new(DeviceConfig::default()).unwrap();
//! let conv = Convolver::new(&device);
//!
//! let src = vec![Matrix::filled(5, 5, Location::Host, 1.0f32)];
//! let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);
//! let mut dst = vec![Matrix::zeros(0, 0, Location::Host)];
//!
//! conv.convolve_border_constant(&src, Kernels::Single(&kernel), &mut dst).unwrap();
//! assert_eq!(dst[0].get(0, 0), 4.0);
//! assert_eq!(dst[0].get(2, 2), 9.0);
//!
//! conv.convolve_border_ignored(&src, &kernel, &mut dst).unwrap();
//! assert_eq!(dst[0].dims(), (3, 3));
//! ```

use crate::bucket::select_bucket;
use crate::config::ConvConfig;
use crate::device::Device;
use crate::element::Element;
use crate::error::{ConvError, ConvResult};
use crate::matrix::{stack_shape, Location, Matrix};
use crate::pipeline::{run_pipelined, run_resident, Pass, PipelineReport};
use crate::planner::{BufferPlan, PlanMode};
use crate::stencil::{BorderPolicy, CpuStencil, Specialization, StencilExecutor, StencilLaunch};

/// Kernel argument of [`Convolver::convolve_border_constant`].
#[derive(Debug)]
pub enum Kernels<'a, T: Element> {
    /// One kernel for the whole stack.
    Single(&'a Matrix<T>),
    /// One kernel per matrix, all of one shape.
    PerMatrix(&'a [Matrix<T>]),
}

impl<T: Element> Clone for Kernels<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Element> Copy for Kernels<'_, T> {}

impl<'a, T: Element> From<&'a Matrix<T>> for Kernels<'a, T> {
    fn from(kernel: &'a Matrix<T>) -> Self {
        Kernels::Single(kernel)
    }
}

impl<'a, T: Element> Kernels<'a, T> {
    /// Returns `true` for [`Kernels::PerMatrix`].
    pub fn is_per_matrix(&self) -> bool {
        matches!(self, Kernels::PerMatrix(_))
    }

    /// Kernel applied to matrix `index`.
    pub fn get(&self, index: usize) -> ConvResult<&'a Matrix<T>> {
        match *self {
            Kernels::Single(kernel) => Ok(kernel),
            Kernels::PerMatrix(kernels) => kernels
                .get(index)
                .ok_or_else(|| ConvError::dimension_mismatch(&[index + 1], &[kernels.len()])),
        }
    }

    /// Checks the kernels against a stack of `count` matrices and returns
    /// the shared kernel `(width, height)`.
    pub fn validate(&self, count: usize) -> ConvResult<(usize, usize)> {
        match *self {
            Kernels::Single(kernel) => Ok(kernel.dims()),
            Kernels::PerMatrix(kernels) => {
                if kernels.len() != count {
                    return Err(ConvError::dimension_mismatch(&[count], &[kernels.len()]));
                }
                let (width, height, _) = stack_shape(kernels)?;
                Ok((width, height))
            }
        }
    }
}

/// Convolution engine bound to one device.
///
/// `E` computes the staged tiles; the default runs on the host CPU. With the
/// `gpu` feature, `crate::gpu::WgpuStencil` can be plugged in instead.
#[derive(Debug)]
pub struct Convolver<'d, E = CpuStencil> {
    device: &'d Device,
    config: ConvConfig,
    executor: E,
}

impl<'d> Convolver<'d, CpuStencil> {
    /// Engine with the default configuration and the CPU executor.
    pub fn new(device: &'d Device) -> Self {
        let config = ConvConfig::default();
        Self {
            device,
            executor: CpuStencil::from_config(&config),
            config,
        }
    }

    /// Engine with a custom configuration and the CPU executor.
    pub fn with_config(device: &'d Device, config: ConvConfig) -> ConvResult<Self> {
        let executor = CpuStencil::from_config(&config);
        Self::with_executor(device, config, executor)
    }
}

impl<'d, E> Convolver<'d, E> {
    /// Engine with a custom executor.
    pub fn with_executor(device: &'d Device, config: ConvConfig, executor: E) -> ConvResult<Self> {
        config.validate()?;
        Ok(Self {
            device,
            config,
            executor,
        })
    }

    /// The device.
    pub fn device(&self) -> &'d Device {
        self.device
    }

    /// The configuration.
    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    /// The executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Border-constant convolution: `dst[i]` gets the shape of `src[i]`;
    /// taps falling outside the source read zero.
    ///
    /// `dst` must have one matrix per source matrix. They are reshaped to the
    /// output shape and the source location once the device allocation has
    /// succeeded.
    ///
    /// # Errors
    ///
    /// - [`ConvError::NotInitialized`] if the device was shut down
    /// - [`ConvError::DimensionMismatch`] for an empty or mixed-shape stack,
    ///   a `dst` of the wrong length, or mismatched per-matrix kernels
    /// - [`ConvError::UnsupportedKernelSize`] for a kernel half-extent over 16
    /// - [`ConvError::AllocationFailure`] if the device budget is exhausted;
    ///   `dst` is left untouched
    pub fn convolve_border_constant<T>(
        &self,
        src: &[Matrix<T>],
        kernels: Kernels<'_, T>,
        dst: &mut [Matrix<T>],
    ) -> ConvResult<PipelineReport>
    where
        T: Element,
        E: StencilExecutor<T>,
    {
        self.invoke(BorderPolicy::Constant, src, kernels, dst)
    }

    /// Border-ignored convolution: `dst[i]` shrinks by twice the kernel's
    /// half-extent per axis so every window lies inside the source.
    ///
    /// # Errors
    ///
    /// As [`Convolver::convolve_border_constant`], plus
    /// [`ConvError::Validation`] when an output axis would be empty.
    pub fn convolve_border_ignored<T>(
        &self,
        src: &[Matrix<T>],
        kernel: &Matrix<T>,
        dst: &mut [Matrix<T>],
    ) -> ConvResult<PipelineReport>
    where
        T: Element,
        E: StencilExecutor<T>,
    {
        self.invoke(BorderPolicy::Ignored, src, Kernels::Single(kernel), dst)
    }

    /// Plans an invocation without running it.
    pub fn plan(
        &self,
        policy: BorderPolicy,
        src_dims: (usize, usize),
        kernel_dims: (usize, usize),
        location: Location,
    ) -> ConvResult<BufferPlan> {
        let selection = select_bucket(kernel_dims.0, kernel_dims.1)?;
        BufferPlan::new(
            policy,
            &selection,
            src_dims.0,
            src_dims.1,
            &self.config,
            plan_mode(location),
        )
    }

    fn invoke<T>(
        &self,
        policy: BorderPolicy,
        src: &[Matrix<T>],
        kernels: Kernels<'_, T>,
        dst: &mut [Matrix<T>],
    ) -> ConvResult<PipelineReport>
    where
        T: Element,
        E: StencilExecutor<T>,
    {
        let flight = self.device.begin_flight()?;

        let (width, height, location) = stack_shape(src)?;
        if width == 0 || height == 0 {
            return Err(ConvError::validation(format!(
                "source matrices are {}x{}, both extents must be non-zero",
                width, height
            )));
        }
        if dst.len() != src.len() {
            return Err(ConvError::dimension_mismatch(&[src.len()], &[dst.len()]));
        }
        let (kernel_width, kernel_height) = kernels.validate(src.len())?;
        let selection = select_bucket(kernel_width, kernel_height)?;
        flight.constants().check_fits::<T>(kernel_width, kernel_height)?;

        let spec = Specialization::select(&selection, policy, self.config.exact_fast_path);
        let mode = plan_mode(location);
        let plan = BufferPlan::new(policy, &selection, width, height, &self.config, mode)?;
        let launch = StencilLaunch::new(spec, &selection, kernel_width, kernel_height, &plan, &self.config);

        log::info!(
            "{:?}: {} x {}x{} {} ({:?}), {}x{} kernel -> {} on {}",
            policy,
            src.len(),
            width,
            height,
            T::NAME,
            location,
            kernel_width,
            kernel_height,
            spec,
            <E as StencilExecutor<T>>::name(&self.executor)
        );

        let mut arena = plan.allocate::<T>(self.device)?;
        for matrix in dst.iter_mut() {
            matrix.reshape(plan.dst.width, plan.dst.height, location);
        }

        let pass = Pass {
            constants: flight.constants(),
            executor: &self.executor,
            plan: &plan,
            launch,
        };
        match mode {
            PlanMode::Pipelined => run_pipelined(&pass, src, kernels, dst, &mut arena),
            PlanMode::Resident => run_resident(&pass, src, kernels, dst, &mut arena),
        }
    }
}

fn plan_mode(location: Location) -> PlanMode {
    match location {
        Location::Host => PlanMode::Pipelined,
        Location::Device => PlanMode::Resident,
    }
}

/// Border-constant convolution with a single kernel on the CPU executor.
pub fn convolve_border_constant<T: Element>(
    device: &Device,
    src: &[Matrix<T>],
    kernel: &Matrix<T>,
    dst: &mut [Matrix<T>],
) -> ConvResult<PipelineReport> {
    Convolver::new(device).convolve_border_constant(src, Kernels::Single(kernel), dst)
}

/// Border-ignored convolution on the CPU executor.
pub fn convolve_border_ignored<T: Element>(
    device: &Device,
    src: &[Matrix<T>],
    kernel: &Matrix<T>,
    dst: &mut [Matrix<T>],
) -> ConvResult<PipelineReport> {
    Convolver::new(device).convolve_border_ignored(src, kernel, dst)
}
