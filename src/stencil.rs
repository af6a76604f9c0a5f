//! Sliding-window stencils.
//!
//! Every stencil implements the same contract over one staged source tile:
//!
//! ```text
//! out(x, y) = Σ_ky Σ_kx K[ky][kx] · tile[y + off_y + ky][x + off_x + kx]
//! ```
//!
//! for `0 <= x < out_width`, `0 <= y < out_height`, where `off` is the
//! launch's tap offset. Taps are applied as stored (correlation, no flip).
//!
//! Two families implement it:
//!
//! - **exact**: the kernel fills its radius bucket on both axes, so
//!   `off = (0, 0)` and the loop bounds are compile-time constants. One
//!   instantiation per bucket via const generics.
//! - **within**: any smaller kernel. Loop bounds and the offset into the
//!   bucket's halo are runtime values.
//!
//! [`row_stencil`] is the dispatch table from [`Specialization`] to the
//! row routine. [`CpuStencil`] runs it over the output tile grid, fanning
//! out over rayon above a size threshold.

use rayon::prelude::*;

use crate::bucket::{BucketSelection, RadiusBucket, RadiusClass};
use crate::config::{ConvConfig, LARGE_RADIUS, SMALL_RADIUS};
use crate::element::Element;
use crate::error::{ConvError, ConvResult};
use crate::matrix::Matrix;
use crate::planner::BufferPlan;

/// How the output treats positions whose window leaves the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BorderPolicy {
    /// Output has the source's shape; out-of-range taps read zero.
    Constant,
    /// Output shrinks by twice the half-extent per axis; every window is
    /// fully inside the source.
    Ignored,
}

impl BorderPolicy {
    /// Output shape for a `src_width x src_height` source.
    ///
    /// # Errors
    ///
    /// Returns [`ConvError::Validation`] if [`BorderPolicy::Ignored`] would
    /// leave an axis with no output.
    pub fn output_dims(
        self,
        src_width: usize,
        src_height: usize,
        selection: &BucketSelection,
    ) -> ConvResult<(usize, usize)> {
        match self {
            BorderPolicy::Constant => Ok((src_width, src_height)),
            BorderPolicy::Ignored => {
                let width = src_width.checked_sub(2 * selection.half_width).unwrap_or(0);
                let height = src_height.checked_sub(2 * selection.half_height).unwrap_or(0);
                if width == 0 || height == 0 {
                    return Err(ConvError::validation(format!(
                        "{}x{} source leaves no output for half-extent {}x{}",
                        src_width, src_height, selection.half_width, selection.half_height
                    )));
                }
                Ok((width, height))
            }
        }
    }
}

/// Which stencil variant a launch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Specialization {
    /// Radius bucket.
    pub bucket: RadiusBucket,
    /// Branch-free exact path.
    pub exact: bool,
    /// Border policy.
    pub policy: BorderPolicy,
}

impl Specialization {
    /// Picks the variant for `selection`. The exact path is used only when
    /// the kernel fills its bucket and `allow_exact` is set.
    pub fn select(selection: &BucketSelection, policy: BorderPolicy, allow_exact: bool) -> Self {
        Self {
            bucket: selection.bucket,
            exact: allow_exact && selection.is_exact(),
            policy,
        }
    }
}

impl std::fmt::Display for Specialization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.exact { "exact" } else { "within" };
        let policy = match self.policy {
            BorderPolicy::Constant => "bc",
            BorderPolicy::Ignored => "bi",
        };
        write!(f, "{}/{}/{}", self.bucket, path, policy)
    }
}

/// Everything a stencil needs to process one staged tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilLaunch {
    /// Variant.
    pub spec: Specialization,
    /// Kernel width.
    pub kernel_width: usize,
    /// Kernel height.
    pub kernel_height: usize,
    /// `(x, y)` offset of the first tap into the source tile.
    pub tap_offset: (usize, usize),
    /// Source tile row pitch.
    pub src_pitch: usize,
    /// Source tile rows.
    pub src_rows: usize,
    /// Destination tile row pitch.
    pub dst_pitch: usize,
    /// Output width.
    pub out_width: usize,
    /// Output height.
    pub out_height: usize,
    /// Rows per compute tile.
    pub tile_height: usize,
}

impl StencilLaunch {
    /// Builds the launch for `plan`.
    pub fn new(
        spec: Specialization,
        selection: &BucketSelection,
        kernel_width: usize,
        kernel_height: usize,
        plan: &BufferPlan,
        config: &ConvConfig,
    ) -> Self {
        let tap_offset = if spec.exact { (0, 0) } else { selection.tap_offset() };
        Self {
            spec,
            kernel_width,
            kernel_height,
            tap_offset,
            src_pitch: plan.src.alloc_width,
            src_rows: plan.src.alloc_height,
            dst_pitch: plan.dst.alloc_width,
            out_width: plan.dst.width,
            out_height: plan.dst.height,
            tile_height: config.tile_height,
        }
    }

    /// Output elements written by the launch.
    #[inline]
    pub fn output_elements(&self) -> usize {
        self.out_width * self.out_height
    }

    /// Checks buffer sizes against the launch geometry.
    pub fn validate(&self, coefficients: usize, src_len: usize, dst_len: usize) -> ConvResult<()> {
        if self.kernel_width == 0 || self.kernel_height == 0 {
            return Err(ConvError::validation("empty kernel"));
        }
        if coefficients != self.kernel_width * self.kernel_height {
            return Err(ConvError::dimension_mismatch(
                &[self.kernel_width * self.kernel_height],
                &[coefficients],
            ));
        }
        if self.spec.exact
            && (self.kernel_width != self.spec.bucket.cols.exact_extent()
                || self.kernel_height != self.spec.bucket.rows.exact_extent())
        {
            return Err(ConvError::validation(format!(
                "{}x{} kernel cannot run the exact {} stencil",
                self.kernel_width, self.kernel_height, self.spec.bucket
            )));
        }
        let (ox, oy) = self.tap_offset;
        let last_col = self.out_width + ox + self.kernel_width - 1;
        let last_row = self.out_height + oy + self.kernel_height - 1;
        if last_col > self.src_pitch || last_row > self.src_rows {
            return Err(ConvError::validation(format!(
                "window reaches {}x{} but source tile is {}x{}",
                last_col, last_row, self.src_pitch, self.src_rows
            )));
        }
        if src_len < self.src_pitch * self.src_rows {
            return Err(ConvError::validation("source tile shorter than its geometry"));
        }
        if self.out_width > self.dst_pitch || dst_len < self.out_height * self.dst_pitch {
            return Err(ConvError::validation("destination tile smaller than the output"));
        }
        Ok(())
    }
}

/// Computes one staged tile into one destination tile.
///
/// `coefficients` is the dense `kernel_height x kernel_width` kernel as read
/// from the constant cache.
pub trait StencilExecutor<T: Element>: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Runs `launch` over `src` into `dst`.
    fn execute(
        &self,
        launch: &StencilLaunch,
        coefficients: &[T],
        src: &[T],
        dst: &mut [T],
    ) -> ConvResult<()>;
}

/// Computes output row `y` of a launch into `out` (`out_width` long).
pub type RowStencil<T> = fn(&StencilLaunch, &[T], &[T], usize, &mut [T]);

/// Dispatch table: the row routine for a specialization.
pub fn row_stencil<T: Element>(spec: &Specialization) -> RowStencil<T> {
    use RadiusClass::{Large, Small};

    if !spec.exact {
        return correlate_row_within::<T>;
    }
    match (spec.bucket.rows, spec.bucket.cols) {
        (Small, Small) => correlate_row_exact::<T, SMALL_RADIUS, SMALL_RADIUS>,
        (Small, Large) => correlate_row_exact::<T, SMALL_RADIUS, LARGE_RADIUS>,
        (Large, Small) => correlate_row_exact::<T, LARGE_RADIUS, SMALL_RADIUS>,
        (Large, Large) => correlate_row_exact::<T, LARGE_RADIUS, LARGE_RADIUS>,
    }
}

fn correlate_row_exact<T: Element, const RY: usize, const RX: usize>(
    launch: &StencilLaunch,
    coefficients: &[T],
    src: &[T],
    y: usize,
    out: &mut [T],
) {
    let taps_x = 2 * RX + 1;
    out.fill(T::ZERO);
    for ky in 0..2 * RY + 1 {
        let row = &src[(y + ky) * launch.src_pitch..];
        let k_row = &coefficients[ky * taps_x..(ky + 1) * taps_x];
        for (kx, &coeff) in k_row.iter().enumerate() {
            T::mul_add_row(out, &row[kx..], coeff);
        }
    }
}

fn correlate_row_within<T: Element>(
    launch: &StencilLaunch,
    coefficients: &[T],
    src: &[T],
    y: usize,
    out: &mut [T],
) {
    let (ox, oy) = launch.tap_offset;
    let kw = launch.kernel_width;
    out.fill(T::ZERO);
    for (ky, k_row) in coefficients.chunks_exact(kw).enumerate() {
        let row = &src[(y + oy + ky) * launch.src_pitch + ox..];
        for (kx, &coeff) in k_row.iter().enumerate() {
            T::mul_add_row(out, &row[kx..], coeff);
        }
    }
}

/// The host stencil executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuStencil {
    parallel_threshold: usize,
}

impl Default for CpuStencil {
    fn default() -> Self {
        Self::from_config(&ConvConfig::default())
    }
}

impl CpuStencil {
    /// Executor fanning out above `parallel_threshold` output elements.
    pub fn new(parallel_threshold: usize) -> Self {
        Self { parallel_threshold }
    }

    /// Executor using `config.parallel_threshold`.
    pub fn from_config(config: &ConvConfig) -> Self {
        Self::new(config.parallel_threshold)
    }
}

impl<T: Element> StencilExecutor<T> for CpuStencil {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn execute(
        &self,
        launch: &StencilLaunch,
        coefficients: &[T],
        src: &[T],
        dst: &mut [T],
    ) -> ConvResult<()> {
        launch.validate(coefficients.len(), src.len(), dst.len())?;
        if launch.output_elements() == 0 {
            return Ok(());
        }
        let stencil = row_stencil::<T>(&launch.spec);

        let pitch = launch.dst_pitch;
        let block = pitch * launch.tile_height.max(1);
        let rows_per_block = launch.tile_height.max(1);
        let body = &mut dst[..launch.out_height * pitch];

        let run_block = |(b, chunk): (usize, &mut [T])| {
            for (r, row) in chunk.chunks_mut(pitch).enumerate() {
                let y = b * rows_per_block + r;
                stencil(launch, coefficients, src, y, &mut row[..launch.out_width]);
            }
        };

        if launch.output_elements() >= self.parallel_threshold {
            body.par_chunks_mut(block).enumerate().for_each(run_block);
        } else {
            body.chunks_mut(block).enumerate().for_each(run_block);
        }
        Ok(())
    }
}

/// Direct correlation of one matrix, without tiling or streams.
///
/// Accumulates taps in the same order as the stencils. Used to check the
/// pipeline and as a baseline in benchmarks.
pub fn reference_correlate<T: Element>(
    src: &Matrix<T>,
    kernel: &Matrix<T>,
    policy: BorderPolicy,
) -> ConvResult<Matrix<T>> {
    let selection = crate::bucket::select_bucket(kernel.width(), kernel.height())?;
    let (out_w, out_h) = policy.output_dims(src.width(), src.height(), &selection)?;
    let (hw, hh) = (selection.half_width as isize, selection.half_height as isize);
    // output (x, y) is centred on source (x + shift_x, y + shift_y)
    let (shift_x, shift_y) = match policy {
        BorderPolicy::Constant => (0, 0),
        BorderPolicy::Ignored => (hw, hh),
    };

    let mut out = Matrix::zeros(out_w, out_h, src.location());
    for y in 0..out_h {
        for x in 0..out_w {
            let mut acc = T::ZERO;
            for ky in 0..kernel.height() {
                let sy = (y as isize) + shift_y + (ky as isize) - hh;
                if sy < 0 || sy >= src.height() as isize {
                    continue;
                }
                for kx in 0..kernel.width() {
                    let sx = (x as isize) + shift_x + (kx as isize) - hw;
                    if sx < 0 || sx >= src.width() as isize {
                        continue;
                    }
                    let mut term = [acc];
                    T::mul_add_row(&mut term, &[src.get(sx as usize, sy as usize)], kernel.get(kx, ky));
                    acc = term[0];
                }
            }
            out.set(x, y, acc);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::select_bucket;
    use crate::matrix::Location;
    use crate::planner::PlanMode;

    fn launch_for(
        kernel: (usize, usize),
        src: (usize, usize),
        policy: BorderPolicy,
        exact: bool,
    ) -> (StencilLaunch, BufferPlan) {
        let config = ConvConfig::default();
        let sel = select_bucket(kernel.0, kernel.1).unwrap();
        let plan = BufferPlan::new(policy, &sel, src.0, src.1, &config, PlanMode::Resident).unwrap();
        let spec = Specialization::select(&sel, policy, exact);
        (StencilLaunch::new(spec, &sel, kernel.0, kernel.1, &plan, &config), plan)
    }

    fn stage(m: &Matrix<f32>, plan: &BufferPlan) -> Vec<f32> {
        let mut tile = vec![0.0f32; plan.src.alloc_width * plan.src.alloc_height];
        crate::device::copy_to_tile(m, &mut tile, plan.src.alloc_width, plan.staging_origin).unwrap();
        tile
    }

    fn dense(kernel: &Matrix<f32>) -> Vec<f32> {
        kernel.to_vec()
    }

    #[test]
    fn test_output_dims() {
        let sel = select_bucket(5, 3).unwrap();
        assert_eq!(BorderPolicy::Constant.output_dims(10, 6, &sel).unwrap(), (10, 6));
        assert_eq!(BorderPolicy::Ignored.output_dims(10, 6, &sel).unwrap(), (6, 4));
        assert!(BorderPolicy::Ignored.output_dims(4, 6, &sel).is_err());
    }

    #[test]
    fn test_specialization_display() {
        let sel = select_bucket(17, 33).unwrap();
        let spec = Specialization::select(&sel, BorderPolicy::Constant, true);
        assert_eq!(spec.to_string(), "R16x8/exact/bc");
        let spec = Specialization::select(&sel, BorderPolicy::Ignored, false);
        assert_eq!(spec.to_string(), "R16x8/within/bi");
    }

    #[test]
    fn test_box_filter_border_constant() {
        let src = Matrix::filled(5, 5, Location::Host, 1.0f32);
        let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);
        let (launch, plan) = launch_for((3, 3), (5, 5), BorderPolicy::Constant, true);
        let tile = stage(&src, &plan);
        let mut dst = vec![0.0f32; plan.dst.alloc_width * plan.dst.alloc_height];

        CpuStencil::new(usize::MAX)
            .execute(&launch, &dense(&kernel), &tile, &mut dst)
            .unwrap();

        let at = |x: usize, y: usize| dst[y * launch.dst_pitch + x];
        assert_eq!(at(0, 0), 4.0);
        assert_eq!(at(2, 0), 6.0);
        assert_eq!(at(2, 2), 9.0);
        assert_eq!(at(4, 4), 4.0);
    }

    #[test]
    fn test_empty_launch_is_a_no_op() {
        let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);
        let (mut launch, plan) = launch_for((3, 3), (5, 5), BorderPolicy::Constant, true);
        launch.out_width = 0;
        let tile = vec![1.0f32; plan.src.alloc_width * plan.src.alloc_height];
        let mut dst = vec![-1.0f32; plan.dst.alloc_width * plan.dst.alloc_height];

        for threshold in [0, usize::MAX] {
            CpuStencil::new(threshold)
                .execute(&launch, &dense(&kernel), &tile, &mut dst)
                .unwrap();
        }
        assert!(dst.iter().all(|&v| v == -1.0));
    }

    #[test]
    fn test_exact_matches_within() {
        let src = Matrix::from_fn(40, 30, Location::Host, |x, y| ((x * 7 + y * 3) % 11) as f32);
        let kernel = Matrix::from_fn(17, 17, Location::Host, |x, y| ((x + 2 * y) % 5) as f32 - 2.0);

        let mut results = Vec::new();
        for exact in [true, false] {
            let (launch, plan) = launch_for((17, 17), (40, 30), BorderPolicy::Constant, exact);
            assert_eq!(launch.spec.exact, exact);
            let tile = stage(&src, &plan);
            let mut dst = vec![0.0f32; plan.dst.alloc_width * plan.dst.alloc_height];
            CpuStencil::new(0)
                .execute(&launch, &dense(&kernel), &tile, &mut dst)
                .unwrap();
            results.push(dst);
        }
        assert_eq!(results[0], results[1]);
    }

    #[test]
    fn test_matches_reference_border_ignored() {
        let src = Matrix::from_fn(23, 19, Location::Host, |x, y| (x as f32 * 0.5) - y as f32);
        let kernel = Matrix::from_fn(5, 3, Location::Host, |x, y| (x * 3 + y) as f32 * 0.25);
        let (launch, plan) = launch_for((5, 3), (23, 19), BorderPolicy::Ignored, true);
        let tile = stage(&src, &plan);
        let mut dst = vec![0.0f32; plan.dst.alloc_width * plan.dst.alloc_height];
        CpuStencil::new(64)
            .execute(&launch, &dense(&kernel), &tile, &mut dst)
            .unwrap();

        let expected = reference_correlate(&src, &kernel, BorderPolicy::Ignored).unwrap();
        assert_eq!(expected.dims(), (19, 17));
        for y in 0..17 {
            for x in 0..19 {
                let got = dst[y * launch.dst_pitch + x];
                assert!((got - expected.get(x, y)).abs() < 1e-4, "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_correlation_not_flipped() {
        // single off-centre tap at kernel (2, 1): output(x, y) = src(x + 1, y)
        let src = Matrix::from_fn(6, 3, Location::Host, |x, y| (10 * y + x) as f32);
        let kernel = Matrix::from_fn(3, 3, Location::Host, |x, y| if (x, y) == (2, 1) { 1.0 } else { 0.0 });
        let out = reference_correlate(&src, &kernel, BorderPolicy::Constant).unwrap();
        assert_eq!(out.get(0, 0), 1.0);
        assert_eq!(out.get(4, 2), 25.0);
        assert_eq!(out.get(5, 2), 0.0);
    }

    #[test]
    fn test_launch_validation() {
        let (launch, plan) = launch_for((3, 3), (8, 8), BorderPolicy::Constant, true);
        let tile = vec![0.0f32; plan.src.alloc_width * plan.src.alloc_height];
        let mut dst = vec![0.0f32; plan.dst.alloc_width * plan.dst.alloc_height];
        let exec = CpuStencil::default();

        let result = <CpuStencil as StencilExecutor<f32>>::execute(&exec, &launch, &[1.0; 8], &tile, &mut dst);
        assert!(matches!(result, Err(ConvError::DimensionMismatch { .. })));

        let result = <CpuStencil as StencilExecutor<f32>>::execute(&exec, &launch, &[1.0; 9], &tile[..10], &mut dst);
        assert!(matches!(result, Err(ConvError::Validation(_))));
    }

    #[test]
    fn test_dispatch_table_covers_buckets() {
        for bucket in RadiusBucket::ALL {
            for exact in [true, false] {
                let spec = Specialization {
                    bucket,
                    exact,
                    policy: BorderPolicy::Constant,
                };
                // every combination resolves to a routine
                let _ = row_stencil::<f64>(&spec);
            }
        }
    }
}
