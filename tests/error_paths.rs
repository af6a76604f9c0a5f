//! Failure modes of the convolution entry points.
//!
//! Every rejected call must leave the destination stack untouched and the
//! device with no outstanding allocation.

use slidewin::{
    ConvConfig, ConvError, Convolver, Device, DeviceConfig, Kernels, Location, Matrix, Status,
};

fn device() -> Device {
    Device::new(DeviceConfig::default()).unwrap()
}

fn sentinel_stack(count: usize) -> Vec<Matrix<f32>> {
    vec![Matrix::filled(2, 2, Location::Host, -1.0f32); count]
}

fn assert_untouched(dst: &[Matrix<f32>]) {
    for d in dst {
        assert_eq!(d.dims(), (2, 2));
        assert!(d.rows().flatten().all(|&v| v == -1.0));
    }
}

#[test]
fn test_not_initialized_after_shutdown() {
    let device = device();
    let conv = Convolver::new(&device);
    let src = vec![Matrix::filled(8, 8, Location::Host, 1.0f32)];
    let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);
    let mut dst = sentinel_stack(1);

    device.shutdown();
    let result = conv.convolve_border_constant(&src, Kernels::Single(&kernel), &mut dst);

    assert!(matches!(result, Err(ConvError::NotInitialized)));
    assert_eq!(Status::of(&result), Status::NotInitialized);
    assert_untouched(&dst);
}

#[test]
fn test_empty_stack_rejected() {
    let device = device();
    let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);
    let src: Vec<Matrix<f32>> = Vec::new();
    let mut dst: Vec<Matrix<f32>> = Vec::new();

    let result = slidewin::convolve_border_constant(&device, &src, &kernel, &mut dst);
    assert!(matches!(result, Err(ConvError::DimensionMismatch { .. })));
}

#[test]
fn test_mixed_shapes_rejected() {
    let device = device();
    let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);
    let src = vec![
        Matrix::filled(8, 8, Location::Host, 1.0f32),
        Matrix::filled(8, 9, Location::Host, 1.0f32),
    ];
    let mut dst = sentinel_stack(2);

    let result = slidewin::convolve_border_constant(&device, &src, &kernel, &mut dst);

    match result {
        Err(ConvError::DimensionMismatch { expected, got }) => {
            assert_eq!(expected, vec![8, 8]);
            assert_eq!(got, vec![8, 9]);
        }
        other => panic!("expected DimensionMismatch, got {:?}", other),
    }
    assert_untouched(&dst);
}

#[test]
fn test_mixed_locations_rejected() {
    let device = device();
    let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);
    let src = vec![
        Matrix::filled(8, 8, Location::Host, 1.0f32),
        Matrix::filled(8, 8, Location::Device, 1.0f32),
    ];
    let mut dst = sentinel_stack(2);

    let result = slidewin::convolve_border_ignored(&device, &src, &kernel, &mut dst);

    assert!(matches!(result, Err(ConvError::Validation(_))));
    assert_untouched(&dst);
}

#[test]
fn test_destination_count_mismatch() {
    let device = device();
    let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);
    let src = vec![Matrix::filled(8, 8, Location::Host, 1.0f32); 3];
    let mut dst = sentinel_stack(2);

    let result = slidewin::convolve_border_constant(&device, &src, &kernel, &mut dst);

    assert!(matches!(result, Err(ConvError::DimensionMismatch { .. })));
    assert_untouched(&dst);
}

#[test]
fn test_kernel_count_mismatch() {
    let device = device();
    let conv = Convolver::new(&device);
    let src = vec![Matrix::filled(8, 8, Location::Host, 1.0f32); 3];
    let kernels = vec![Matrix::filled(3, 3, Location::Host, 1.0f32); 2];
    let mut dst = sentinel_stack(3);

    let result = conv.convolve_border_constant(&src, Kernels::PerMatrix(&kernels), &mut dst);

    assert!(matches!(result, Err(ConvError::DimensionMismatch { .. })));
    assert_untouched(&dst);
}

#[test]
fn test_per_matrix_kernels_must_share_shape() {
    let device = device();
    let conv = Convolver::new(&device);
    let src = vec![Matrix::filled(8, 8, Location::Host, 1.0f32); 2];
    let kernels = vec![
        Matrix::filled(3, 3, Location::Host, 1.0f32),
        Matrix::filled(5, 5, Location::Host, 1.0f32),
    ];
    let mut dst = sentinel_stack(2);

    let result = conv.convolve_border_constant(&src, Kernels::PerMatrix(&kernels), &mut dst);

    assert!(matches!(result, Err(ConvError::DimensionMismatch { .. })));
    assert_untouched(&dst);
}

#[test]
fn test_oversized_kernel_rejected() {
    let device = device();
    let src = vec![Matrix::filled(64, 64, Location::Host, 1.0f32)];
    let mut dst = sentinel_stack(1);

    for (kw, kh) in [(35, 3), (3, 35), (40, 40)] {
        let kernel = Matrix::filled(kw, kh, Location::Host, 1.0f32);
        let result = slidewin::convolve_border_constant(&device, &src, &kernel, &mut dst);
        assert!(
            matches!(result, Err(ConvError::UnsupportedKernelSize { max_radius: 16, .. })),
            "{}x{} kernel",
            kw,
            kh
        );
        assert_eq!(Status::of(&result), Status::UnsupportedKernelSize);
    }
    assert_untouched(&dst);
}

#[test]
fn test_empty_kernel_rejected() {
    let device = device();
    let src = vec![Matrix::filled(8, 8, Location::Host, 1.0f32)];
    let kernel = Matrix::<f32>::zeros(0, 3, Location::Host);
    let mut dst = sentinel_stack(1);

    let result = slidewin::convolve_border_constant(&device, &src, &kernel, &mut dst);

    assert!(matches!(result, Err(ConvError::Validation(_))));
    assert_untouched(&dst);
}

#[test]
fn test_zero_extent_source_rejected() {
    let device = device();
    let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);

    for (w, h) in [(0, 5), (5, 0), (0, 0)] {
        let src = vec![Matrix::<f32>::zeros(w, h, Location::Host)];
        let mut dst = sentinel_stack(1);

        let result = slidewin::convolve_border_constant(&device, &src, &kernel, &mut dst);
        assert!(matches!(result, Err(ConvError::Validation(_))), "{}x{} source", w, h);
        assert_untouched(&dst);

        let result = slidewin::convolve_border_ignored(&device, &src, &kernel, &mut dst);
        assert!(result.is_err(), "{}x{} source", w, h);
        assert_untouched(&dst);
    }
    assert_eq!(device.allocated_bytes(), 0);
}

#[test]
fn test_border_ignored_without_output() {
    let device = device();
    let src = vec![Matrix::filled(6, 20, Location::Host, 1.0f32)];
    let kernel = Matrix::filled(7, 3, Location::Host, 1.0f32);
    let mut dst = sentinel_stack(1);

    let result = slidewin::convolve_border_ignored(&device, &src, &kernel, &mut dst);

    assert!(matches!(result, Err(ConvError::Validation(_))));
    assert_untouched(&dst);
}

#[test]
fn test_allocation_failure_leaves_destination_untouched() {
    let device = Device::new(DeviceConfig::with_memory_limit(4 * 1024)).unwrap();
    let src = vec![Matrix::filled(100, 100, Location::Host, 1.0f32); 2];
    let kernel = Matrix::filled(3, 3, Location::Host, 1.0f32);
    let mut dst = sentinel_stack(2);

    let result = slidewin::convolve_border_constant(&device, &src, &kernel, &mut dst);

    assert!(matches!(result, Err(ConvError::AllocationFailure { .. })));
    assert_eq!(Status::of(&result), Status::AllocationFailure);
    assert_untouched(&dst);
    assert_eq!(device.allocated_bytes(), 0);
    assert_eq!(device.allocation_count(), 0);
}

#[test]
fn test_device_usable_after_failure() {
    let device = device();
    let conv = Convolver::new(&device);
    let src = vec![Matrix::filled(8, 8, Location::Host, 1.0f32)];
    let mut dst = sentinel_stack(1);

    let bad = Matrix::filled(41, 41, Location::Host, 1.0f32);
    assert!(conv
        .convolve_border_constant(&src, Kernels::Single(&bad), &mut dst)
        .is_err());

    let good = Matrix::filled(1, 1, Location::Host, 2.0f32);
    conv.convolve_border_constant(&src, Kernels::Single(&good), &mut dst)
        .unwrap();
    assert_eq!(dst[0].dims(), (8, 8));
    assert!(dst[0].rows().flatten().all(|&v| v == 2.0));
}

#[test]
fn test_invalid_config_rejected() {
    let device = device();
    let config = ConvConfig {
        tile_width: 6,
        ..Default::default()
    };

    let result = Convolver::with_config(&device, config);
    assert!(matches!(result, Err(ConvError::Config(_))));
}
