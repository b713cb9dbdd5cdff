//! End-to-end strain mapping on synthetic nanobeam diffraction scans

use approx::assert_relative_eq;
use nalgebra::Matrix2;
use ndarray::{array, s, Array2, Array4};
use stemtools::image_proc::PeakFitConfig;
use stemtools::nbed::{PatternRegistrator, StrainComponents};
use stemtools::{
    aperture_image, extract_roi, fit_nbed_disks, strain_in_roi, strain_oldstyle, threshold_roi,
    ReferenceBasis, StrainConfig, StrainError, ThresholdMode,
};
use test_helpers::{
    add_uniform_noise, disk_template, stack_patterns, DiskProfile, SyntheticLattice,
};

const SHAPE: (usize, usize) = (64, 64);
const DISK_RADIUS: f64 = 4.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn disk_lattice() -> SyntheticLattice {
    SyntheticLattice::square(
        SHAPE,
        16.0,
        1,
        DiskProfile::TopHat {
            radius: DISK_RADIUS,
            edge_width: 0.8,
        },
    )
}

fn stretch_x(factor: f64) -> Matrix2<f64> {
    Matrix2::new(factor, 0.0, 0.0, 1.0)
}

fn assert_zero_strain(strain: &StrainComponents, tolerance: f64) {
    assert_relative_eq!(strain.e_xx, 0.0, epsilon = tolerance);
    assert_relative_eq!(strain.e_xy, 0.0, epsilon = tolerance);
    assert_relative_eq!(strain.e_theta, 0.0, epsilon = tolerance);
    assert_relative_eq!(strain.e_yy, 0.0, epsilon = tolerance);
}

#[test]
fn test_identical_patterns_have_zero_strain_direct() {
    init_logging();
    let lattice = disk_lattice();
    let pattern = lattice.pattern();
    let roi = stack_patterns(&[pattern.clone(), pattern]);
    let center_disk = disk_template(SHAPE, DISK_RADIUS);

    let strain = strain_oldstyle(
        roi.view(),
        center_disk.view(),
        &lattice.disk_positions(),
        &lattice.indices,
        &StrainConfig::default(),
    )
    .unwrap();

    assert_eq!(strain.len(), 2);
    for i in 0..strain.len() {
        assert_zero_strain(&strain.get(i).unwrap(), 1e-9);
    }
}

#[test]
fn test_identical_patterns_have_zero_strain_edge_enhanced() {
    init_logging();
    let lattice = disk_lattice();
    let mut pattern = lattice.pattern();
    // Detector noise keeps the median edge response above zero
    add_uniform_noise(&mut pattern, 2.0, 42);
    let roi = stack_patterns(&[pattern.clone(), pattern]);
    let center_disk = disk_template(SHAPE, DISK_RADIUS);

    let strain = strain_in_roi(
        roi.view(),
        center_disk.view(),
        &lattice.disk_positions(),
        &lattice.indices,
        &StrainConfig::default(),
    )
    .unwrap();

    for i in 0..strain.len() {
        assert_zero_strain(&strain.get(i).unwrap(), 1e-9);
    }
}

#[test]
fn test_uniaxial_stretch_from_disk_fits() {
    let reference = SyntheticLattice::square(SHAPE, 16.0, 1, DiskProfile::Gaussian { sigma: 1.8 });
    let stretched = reference.deformed(&stretch_x(1.02));
    let config = PeakFitConfig::default();

    let fit = |lattice: &SyntheticLattice| {
        fit_nbed_disks(
            lattice.pattern().view(),
            DISK_RADIUS,
            &reference.disk_positions(),
            &reference.indices,
            &config,
        )
        .unwrap()
        .lattice_basis
    };
    let inverse = fit(&reference).try_inverse().unwrap();
    let strain = StrainComponents::from_bases(&fit(&stretched), &inverse);

    // Reciprocal-space stretch reads as real-space compression
    assert_relative_eq!(strain.e_xx, -0.02, epsilon = 1e-4);
    assert_relative_eq!(strain.e_yy, 0.0, epsilon = 1e-4);
    assert_relative_eq!(strain.e_xy, 0.0, epsilon = 1e-4);
    assert_relative_eq!(strain.e_theta, 0.0, epsilon = 1e-4);
}

#[test]
fn test_pure_rotation_shows_up_in_e_theta() {
    let reference = SyntheticLattice::square(SHAPE, 16.0, 1, DiskProfile::Gaussian { sigma: 1.8 });
    let angle: f64 = 1.5_f64.to_radians();
    let (sin, cos) = angle.sin_cos();
    let rotated = reference.deformed(&Matrix2::new(cos, sin, -sin, cos));
    let config = PeakFitConfig::default();

    let fit = |lattice: &SyntheticLattice| {
        fit_nbed_disks(
            lattice.pattern().view(),
            DISK_RADIUS,
            &reference.disk_positions(),
            &reference.indices,
            &config,
        )
        .unwrap()
        .lattice_basis
    };
    let inverse = fit(&reference).try_inverse().unwrap();
    let strain = StrainComponents::from_bases(&fit(&rotated), &inverse);

    assert_relative_eq!(strain.e_theta, 2.0 * sin, epsilon = 1e-4);
    assert_relative_eq!(strain.e_xy, 0.0, epsilon = 1e-4);
    assert_relative_eq!(strain.e_xx, 1.0 - cos, epsilon = 1e-4);
}

/// 2x2 scan: (1, 1) is stretched 2% along x, the rest are unstrained
fn stretched_scan(lattice: &SyntheticLattice) -> Array4<f64> {
    let reference = lattice.pattern();
    let stretched = lattice.deformed(&stretch_x(1.02)).pattern();
    let mut data = Array4::<f64>::zeros((SHAPE.0, SHAPE.1, 2, 2));
    for r in 0..2 {
        for c in 0..2 {
            let pattern = if (r, c) == (1, 1) { &stretched } else { &reference };
            data.slice_mut(s![.., .., r, c]).assign(pattern);
        }
    }
    data
}

#[test]
fn test_supplied_reference_maps_stretched_pixel() {
    init_logging();
    let lattice = disk_lattice();
    let data = stretched_scan(&lattice);
    let mask = array![[true, false], [true, true]];
    let roi = extract_roi(data.view(), mask.view()).unwrap();
    assert_eq!(roi.dim(), (64, 64, 3));

    let center_disk = disk_template(SHAPE, DISK_RADIUS);
    let positions = lattice.disk_positions();
    let base = StrainConfig::default();
    let registrator =
        PatternRegistrator::direct(center_disk.view(), &positions, &lattice.indices, &base)
            .unwrap();
    let reference_axes = registrator.lattice_basis(lattice.pattern().view()).unwrap();

    let config = StrainConfig {
        reference: ReferenceBasis::Supplied(reference_axes),
        threads: Some(2),
        ..base
    };
    let strain = strain_oldstyle(
        roi.view(),
        center_disk.view(),
        &positions,
        &lattice.indices,
        &config,
    )
    .unwrap();
    let maps = strain.to_maps(mask.view()).unwrap();

    assert_relative_eq!(maps.e_xx[[0, 0]], 0.0, epsilon = 1e-9);
    assert_relative_eq!(maps.e_xx[[1, 0]], 0.0, epsilon = 1e-9);
    assert_eq!(maps.e_xx[[0, 1]], 0.0);
    assert_relative_eq!(maps.e_xx[[1, 1]], -0.02, epsilon = 1e-3);
    assert_relative_eq!(maps.e_yy[[1, 1]], 0.0, epsilon = 1e-3);
    assert_relative_eq!(maps.e_xy[[1, 1]], 0.0, epsilon = 1e-3);
    assert_relative_eq!(maps.e_theta[[1, 1]], 0.0, epsilon = 1e-3);
}

#[test]
fn test_edge_enhanced_recovers_stretch() {
    init_logging();
    // Sharp disks on a noisy detector, with the second-order disks included
    // so the basis is fitted from 25 peaks
    let shape = (256, 256);
    let radius = 12.0;
    let mut lattice = SyntheticLattice::square(
        shape,
        48.0,
        2,
        DiskProfile::TopHat {
            radius,
            edge_width: 0.3,
        },
    );
    lattice.background = 50.0;

    let mut reference = lattice.pattern();
    add_uniform_noise(&mut reference, 5.0, 1);
    let mut stretched = lattice.deformed(&stretch_x(1.02)).pattern();
    add_uniform_noise(&mut stretched, 5.0, 2);

    let center_disk = disk_template(shape, radius);
    let positions = lattice.disk_positions();
    let base = StrainConfig::default();
    let registrator =
        PatternRegistrator::edge_enhanced(center_disk.view(), &positions, &lattice.indices, &base)
            .unwrap();
    let reference_axes = registrator.lattice_basis(reference.view()).unwrap();

    let config = StrainConfig {
        reference: ReferenceBasis::Supplied(reference_axes),
        ..base
    };
    let roi = stack_patterns(&[reference, stretched]);
    let strain = strain_in_roi(
        roi.view(),
        center_disk.view(),
        &positions,
        &lattice.indices,
        &config,
    )
    .unwrap();

    assert_zero_strain(&strain.get(0).unwrap(), 1e-9);
    let strain = strain.get(1).unwrap();
    assert_relative_eq!(strain.e_xx, -0.02, epsilon = 2e-3);
    assert_relative_eq!(strain.e_yy, 0.0, epsilon = 2e-3);
    assert_relative_eq!(strain.e_xy, 0.0, epsilon = 2e-3);
    assert_relative_eq!(strain.e_theta, 0.0, epsilon = 2e-3);
}

#[test]
fn test_results_do_not_depend_on_thread_count() {
    let lattice = disk_lattice();
    let data = stretched_scan(&lattice);
    let mask = Array2::from_elem((2, 2), true);
    let roi = extract_roi(data.view(), mask.view()).unwrap();
    let center_disk = disk_template(SHAPE, DISK_RADIUS);
    let positions = lattice.disk_positions();

    let run = |threads| {
        let config = StrainConfig {
            threads,
            ..Default::default()
        };
        strain_oldstyle(
            roi.view(),
            center_disk.view(),
            &positions,
            &lattice.indices,
            &config,
        )
        .unwrap()
    };
    assert_eq!(run(Some(1)), run(Some(3)));
    assert_eq!(run(Some(1)), run(None));
}

#[test]
fn test_failing_pattern_aborts_with_its_index() {
    let lattice = disk_lattice();
    let pattern = lattice.pattern();
    let blank = Array2::<f64>::zeros(SHAPE);
    let roi = stack_patterns(&[pattern.clone(), blank, pattern]);
    let center_disk = disk_template(SHAPE, DISK_RADIUS);

    let config = StrainConfig {
        reference: ReferenceBasis::Supplied(Matrix2::new(16.0, 0.0, 0.0, 16.0)),
        ..Default::default()
    };
    let result = strain_oldstyle(
        roi.view(),
        center_disk.view(),
        &lattice.disk_positions(),
        &lattice.indices,
        &config,
    );
    assert!(
        matches!(result, Err(StrainError::Pattern { index: 1, .. })),
        "{result:?}"
    );
}

#[test]
fn test_roi_from_virtual_dark_field() {
    let lattice = disk_lattice();
    let bright = lattice.pattern();
    let dim = bright.mapv(|v| v * 0.1);

    // Scan pixels on the diagonal are bright
    let mut data = Array4::<f64>::zeros((SHAPE.0, SHAPE.1, 3, 3));
    for r in 0..3 {
        for c in 0..3 {
            let pattern = if r == c { &bright } else { &dim };
            data.slice_mut(s![.., .., r, c]).assign(pattern);
        }
    }

    let center = lattice.center;
    let dark_field = aperture_image(data.view(), center, DISK_RADIUS).unwrap();
    let mask = threshold_roi(dark_field.view(), 2.0, ThresholdMode::Over).unwrap();
    assert_eq!(mask, Array2::from_shape_fn((3, 3), |(r, c)| r == c));

    let roi = extract_roi(data.view(), mask.view()).unwrap();
    assert_eq!(roi.dim(), (64, 64, 3));
    assert_eq!(roi.slice(s![.., .., 1]), bright);
}
