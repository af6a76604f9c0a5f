//! Numerical correctness of both border policies against the direct
//! reference correlation.
//!
//! These tests verify:
//! - Random stacks match `reference_correlate` for every radius bucket
//! - Exact and within stencils agree on the same data
//! - Output shapes for both policies
//! - `f64` stacks take the same paths as `f32`

use rand::{rngs::StdRng, Rng, SeedableRng};
use slidewin::{
    reference_correlate, BorderPolicy, ConvConfig, Convolver, Device, DeviceConfig, Element,
    Kernels, Location, Matrix,
};

const EPSILON: f64 = 1e-4;

fn random_matrix<T: Element>(width: usize, height: usize, rng: &mut StdRng) -> Matrix<T> {
    Matrix::from_fn(width, height, Location::Host, |_, _| {
        T::from_f64(rng.gen_range(-1.0..1.0))
    })
}

fn empty_stack<T: Element>(count: usize) -> Vec<Matrix<T>> {
    vec![Matrix::zeros(0, 0, Location::Host); count]
}

fn assert_matrix_close<T: Element>(got: &Matrix<T>, want: &Matrix<T>, tol: f64) {
    assert_eq!(got.dims(), want.dims(), "shape mismatch");
    let (w, h) = want.dims();
    for y in 0..h {
        for x in 0..w {
            let (a, b) = (got.get(x, y).to_f64(), want.get(x, y).to_f64());
            assert!(
                (a - b).abs() <= tol * (1.0 + b.abs()),
                "({}, {}): got {}, want {}",
                x,
                y,
                a,
                b
            );
        }
    }
}

fn device() -> Device {
    Device::new(DeviceConfig::default()).unwrap()
}

// =============================================================================
// Known values
// =============================================================================

#[test]
fn test_box_filter_border_constant() {
    let device = device();
    let conv = Convolver::new(&device);
    let src = vec![Matrix::filled(5, 5, Location::Host, 1.0f32)];
    let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);
    let mut dst = empty_stack(1);

    conv.convolve_border_constant(&src, Kernels::Single(&kernel), &mut dst)
        .unwrap();

    assert_eq!(dst[0].dims(), (5, 5));
    assert_eq!(dst[0].get(0, 0), 4.0);
    assert_eq!(dst[0].get(2, 0), 6.0);
    assert_eq!(dst[0].get(2, 2), 9.0);
    assert_eq!(dst[0].get(4, 4), 4.0);
}

#[test]
fn test_box_filter_corner_and_centre_per_bucket() {
    let device = device();
    let conv = Convolver::new(&device);
    let src = vec![Matrix::filled(40, 40, Location::Host, 1.0f32)];

    // (rx, ry): within small, exact small, within large, exact large, mixed
    for (rx, ry) in [(1, 1), (8, 8), (12, 12), (16, 16), (8, 16), (16, 3)] {
        let kernel = Matrix::filled(2 * rx + 1, 2 * ry + 1, Location::Host, 1.0f32);
        let mut dst = empty_stack(1);

        conv.convolve_border_constant(&src, Kernels::Single(&kernel), &mut dst)
            .unwrap();

        let corner = ((rx + 1) * (ry + 1)) as f32;
        let full = ((2 * rx + 1) * (2 * ry + 1)) as f32;
        assert_eq!(dst[0].dims(), (40, 40));
        assert_eq!(dst[0].get(0, 0), corner, "corner, r = ({}, {})", rx, ry);
        assert_eq!(dst[0].get(39, 39), corner, "far corner, r = ({}, {})", rx, ry);
        assert_eq!(dst[0].get(20, 20), full, "centre, r = ({}, {})", rx, ry);
    }
}

#[test]
fn test_box_filter_border_ignored() {
    let device = device();
    let conv = Convolver::new(&device);
    let src = vec![Matrix::filled(5, 5, Location::Host, 1.0f32)];
    let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);
    let mut dst = empty_stack(1);

    conv.convolve_border_ignored(&src, &kernel, &mut dst).unwrap();

    assert_eq!(dst[0].dims(), (3, 3));
    assert!(dst[0].rows().flatten().all(|&v| v == 9.0));
}

#[test]
fn test_identity_kernel_preserves_source() {
    let device = device();
    let mut rng = StdRng::seed_from_u64(7);
    let src = vec![random_matrix::<f32>(37, 23, &mut rng)];
    let mut kernel = Matrix::zeros(5, 5, Location::Host);
    kernel.set(2, 2, 1.0f32);
    let mut dst = empty_stack(1);

    slidewin::convolve_border_constant(&device, &src, &kernel, &mut dst).unwrap();

    assert_eq!(dst[0], src[0]);
}

#[test]
fn test_correlation_is_not_flipped() {
    let device = device();
    let src = vec![Matrix::from_fn(6, 6, Location::Host, |x, y| (x + 10 * y) as f32)];
    // picks the right-hand neighbour
    let kernel = Matrix::from_rows(3, 1, Location::Host, &[0.0, 0.0, 1.0f32]).unwrap();
    let mut dst = empty_stack(1);

    slidewin::convolve_border_constant(&device, &src, &kernel, &mut dst).unwrap();

    assert_eq!(dst[0].get(0, 3), 31.0);
    assert_eq!(dst[0].get(4, 3), 35.0);
    assert_eq!(dst[0].get(5, 3), 0.0);
}

// =============================================================================
// Reference parity
// =============================================================================

#[test]
fn test_random_stack_matches_reference_all_buckets() {
    let device = device();
    let conv = Convolver::new(&device);
    let mut rng = StdRng::seed_from_u64(42);

    // (S,S), (S,L), (L,S), (L,L) and their exact shapes
    let kernels = [(3, 3), (5, 21), (21, 5), (25, 19), (17, 17), (33, 17), (17, 33), (33, 33)];

    for &(kw, kh) in &kernels {
        let src: Vec<Matrix<f32>> = (0..3).map(|_| random_matrix(71, 45, &mut rng)).collect();
        let kernel = random_matrix::<f32>(kw, kh, &mut rng);
        let mut dst = empty_stack(3);

        conv.convolve_border_constant(&src, Kernels::Single(&kernel), &mut dst)
            .unwrap();

        for (s, d) in src.iter().zip(&dst) {
            let want = reference_correlate(s, &kernel, BorderPolicy::Constant).unwrap();
            assert_matrix_close(d, &want, EPSILON);
        }
    }
}

#[test]
fn test_border_ignored_matches_reference() {
    let device = device();
    let conv = Convolver::new(&device);
    let mut rng = StdRng::seed_from_u64(3);

    for &(kw, kh) in &[(3, 3), (7, 19), (17, 17), (33, 9)] {
        let src: Vec<Matrix<f32>> = (0..2).map(|_| random_matrix(80, 66, &mut rng)).collect();
        let kernel = random_matrix::<f32>(kw, kh, &mut rng);
        let mut dst = empty_stack(2);

        conv.convolve_border_ignored(&src, &kernel, &mut dst).unwrap();

        for (s, d) in src.iter().zip(&dst) {
            assert_eq!(d.dims(), (80 - 2 * (kw / 2), 66 - 2 * (kh / 2)));
            let want = reference_correlate(s, &kernel, BorderPolicy::Ignored).unwrap();
            assert_matrix_close(d, &want, EPSILON);
        }
    }
}

#[test]
fn test_per_matrix_kernels_match_reference() {
    let device = device();
    let conv = Convolver::new(&device);
    let mut rng = StdRng::seed_from_u64(11);

    let src: Vec<Matrix<f32>> = (0..4).map(|_| random_matrix(30, 30, &mut rng)).collect();
    let kernels: Vec<Matrix<f32>> = (0..4).map(|_| random_matrix(5, 5, &mut rng)).collect();
    let mut dst = empty_stack(4);

    let report = conv
        .convolve_border_constant(&src, Kernels::PerMatrix(&kernels), &mut dst)
        .unwrap();

    assert_eq!(report.kernel_uploads, 4);
    for ((s, k), d) in src.iter().zip(&kernels).zip(&dst) {
        let want = reference_correlate(s, k, BorderPolicy::Constant).unwrap();
        assert_matrix_close(d, &want, EPSILON);
    }
}

// =============================================================================
// Exact vs within
// =============================================================================

#[test]
fn test_exact_and_within_paths_agree() {
    let device = device();
    let mut rng = StdRng::seed_from_u64(5);
    let src: Vec<Matrix<f32>> = (0..2).map(|_| random_matrix(50, 40, &mut rng)).collect();
    let kernel = random_matrix::<f32>(17, 17, &mut rng);

    let exact = Convolver::new(&device);
    let within_config = ConvConfig::builder().exact_fast_path(false).build().unwrap();
    let within = Convolver::with_config(&device, within_config).unwrap();

    let mut dst_exact = empty_stack(2);
    let mut dst_within = empty_stack(2);
    let r1 = exact
        .convolve_border_constant(&src, Kernels::Single(&kernel), &mut dst_exact)
        .unwrap();
    let r2 = within
        .convolve_border_constant(&src, Kernels::Single(&kernel), &mut dst_within)
        .unwrap();

    assert!(r1.specialization.exact);
    assert!(!r2.specialization.exact);
    assert_eq!(dst_exact, dst_within);
}

#[test]
fn test_exact_kernel_equals_zero_padded_smaller_kernel() {
    let device = device();
    let mut rng = StdRng::seed_from_u64(9);
    let src = vec![random_matrix::<f32>(40, 40, &mut rng)];
    let small = random_matrix::<f32>(15, 15, &mut rng);
    let padded = Matrix::from_fn(17, 17, Location::Host, |x, y| {
        if (1..16).contains(&x) && (1..16).contains(&y) {
            small.get(x - 1, y - 1)
        } else {
            0.0
        }
    });

    let mut dst_small = empty_stack(1);
    let mut dst_padded = empty_stack(1);
    slidewin::convolve_border_constant(&device, &src, &small, &mut dst_small).unwrap();
    slidewin::convolve_border_constant(&device, &src, &padded, &mut dst_padded).unwrap();

    assert_matrix_close(&dst_padded[0], &dst_small[0], EPSILON);
}

// =============================================================================
// Shapes and element types
// =============================================================================

#[test]
fn test_destination_is_resized_to_output() {
    let device = device();
    let src = vec![Matrix::filled(20, 12, Location::Host, 1.0f32); 2];
    let kernel = Matrix::filled(5, 3, Location::Host, 1.0f32);
    let mut dst = vec![Matrix::filled(3, 3, Location::Host, 7.0f32); 2];

    slidewin::convolve_border_ignored(&device, &src, &kernel, &mut dst).unwrap();

    for d in &dst {
        assert_eq!(d.dims(), (16, 10));
        assert_eq!(d.location(), Location::Host);
    }
}

#[test]
fn test_single_pixel_source() {
    let device = device();
    let src = vec![Matrix::filled(1, 1, Location::Host, 2.0f32)];
    let kernel = Matrix::filled(9, 9, Location::Host, 0.5f32);
    let mut dst = empty_stack(1);

    slidewin::convolve_border_constant(&device, &src, &kernel, &mut dst).unwrap();

    assert_eq!(dst[0].dims(), (1, 1));
    assert_eq!(dst[0].get(0, 0), 1.0);
}

#[test]
fn test_f64_stack_matches_reference() {
    let device = device();
    let mut rng = StdRng::seed_from_u64(13);
    let src: Vec<Matrix<f64>> = (0..3).map(|_| random_matrix(33, 29, &mut rng)).collect();
    let kernel = random_matrix::<f64>(11, 7, &mut rng);
    let mut dst = empty_stack(3);

    slidewin::convolve_border_constant(&device, &src, &kernel, &mut dst).unwrap();

    for (s, d) in src.iter().zip(&dst) {
        let want = reference_correlate(s, &kernel, BorderPolicy::Constant).unwrap();
        assert_matrix_close(d, &want, 1e-12);
    }
}
