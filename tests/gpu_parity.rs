//! GPU/CPU stencil parity tests.
//!
//! Run with: cargo test --features gpu --test gpu_parity -- --ignored

#![cfg(feature = "gpu")]

use rand::{rngs::StdRng, Rng, SeedableRng};
use slidewin::gpu::{WgpuBackend, WgpuOptions, WgpuStencil};
use slidewin::{ConvConfig, ConvError, Convolver, Device, DeviceConfig, Kernels, Location, Matrix};

/// Tolerance for floating-point comparison (the GPU may fuse multiply-adds).
const EPSILON: f32 = 1e-4;

fn assert_approx_eq(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "Length mismatch: {} vs {}", a.len(), b.len());
    let (idx, diff) = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .enumerate()
        .fold((0, 0.0f32), |best, (i, d)| if d > best.1 { (i, d) } else { best });
    assert!(
        diff <= tol,
        "Max difference {} at index {} exceeds tolerance {}",
        diff,
        idx,
        tol
    );
}

fn random_stack(count: usize, width: usize, height: usize, seed: u64) -> Vec<Matrix<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| Matrix::from_fn(width, height, Location::Host, |_, _| rng.gen_range(-1.0..1.0)))
        .collect()
}

#[test]
#[ignore = "Requires GPU"]
fn test_gpu_matches_cpu_all_buckets() {
    let device = Device::new(DeviceConfig::default()).unwrap();
    let backend = WgpuBackend::init(WgpuOptions::default()).expect("Failed to init backend");
    let gpu = Convolver::with_executor(&device, ConvConfig::default(), WgpuStencil::new(backend)).unwrap();
    let cpu = Convolver::new(&device);

    for (i, &(kw, kh)) in [(3, 3), (17, 17), (5, 25), (33, 33)].iter().enumerate() {
        let src = random_stack(3, 57, 41, i as u64);
        let kernel = random_stack(1, kw, kh, 100 + i as u64).remove(0);
        let mut dst_gpu = vec![Matrix::zeros(0, 0, Location::Host); 3];
        let mut dst_cpu = vec![Matrix::zeros(0, 0, Location::Host); 3];

        gpu.convolve_border_constant(&src, Kernels::Single(&kernel), &mut dst_gpu)
            .unwrap();
        cpu.convolve_border_constant(&src, Kernels::Single(&kernel), &mut dst_cpu)
            .unwrap();

        for (g, c) in dst_gpu.iter().zip(&dst_cpu) {
            assert_approx_eq(&g.to_vec(), &c.to_vec(), EPSILON * (kw * kh) as f32);
        }
    }
}

#[test]
#[ignore = "Requires GPU"]
fn test_gpu_border_ignored() {
    let device = Device::new(DeviceConfig::default()).unwrap();
    let backend = WgpuBackend::init(WgpuOptions::default()).expect("Failed to init backend");
    let gpu = Convolver::with_executor(&device, ConvConfig::default(), WgpuStencil::new(backend)).unwrap();

    let src = vec![Matrix::filled(20, 20, Location::Host, 1.0f32); 2];
    let kernel = Matrix::filled(5, 3, Location::Host, 1.0f32);
    let mut dst = vec![Matrix::zeros(0, 0, Location::Host); 2];

    gpu.convolve_border_ignored(&src, &kernel, &mut dst).unwrap();

    for d in &dst {
        assert_eq!(d.dims(), (16, 18));
        assert!(d.rows().flatten().all(|&v| v == 15.0));
    }
    assert!(gpu.executor().compiled_pipelines() >= 1);
}

#[test]
#[ignore = "Requires GPU"]
fn test_gpu_rejects_f64() {
    let device = Device::new(DeviceConfig::default()).unwrap();
    let backend = WgpuBackend::init(WgpuOptions::default()).expect("Failed to init backend");
    let gpu = Convolver::with_executor(&device, ConvConfig::default(), WgpuStencil::new(backend)).unwrap();

    let src = vec![Matrix::filled(8, 8, Location::Host, 1.0f64)];
    let kernel = Matrix::filled(3, 3, Location::Host, 1.0f64);
    let mut dst = vec![Matrix::zeros(0, 0, Location::Host)];

    let result = gpu.convolve_border_constant(&src, Kernels::Single(&kernel), &mut dst);
    assert!(matches!(result, Err(ConvError::UnsupportedElement("f64"))));
}
