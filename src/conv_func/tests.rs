// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use marlu::UVW;

use super::*;
use crate::{config::PrimaryBeamConfig, image::stokes::*};

fn geometry(n: usize) -> ImageGeometry {
    ImageGeometry {
        nx: n,
        ny: n,
        cell_x: 2e-3,
        cell_y: 2e-3,
        freqs_hz: vec![150e6],
        chan_width_hz: 1e6,
        stokes: StokesType::I,
    }
}

fn grid_shape(g: &ImageGeometry) -> GridShape {
    GridShape {
        nx: g.nx,
        ny: g.ny,
        cell_x: g.cell_x,
        cell_y: g.cell_y,
    }
}

fn buffer(num_rows: usize, freqs: &[f64]) -> VisBuffer {
    VisBuffer::new(
        vec![UVW::default(); num_rows],
        Array3::zeros((num_rows, freqs.len(), 2)),
        Array2::ones((num_rows, freqs.len())),
        freqs.to_vec(),
        vec![Correlation::XX, Correlation::YY],
    )
    .unwrap()
}

fn pb() -> PrimaryBeamConfig {
    PrimaryBeamConfig {
        fwhm_deg: Some(10.0),
        reference_freq_hz: Some(150e6),
        ..Default::default()
    }
}

#[test]
fn test_conv_sampling() {
    assert_eq!(conv_sampling(10, 10), 100);
    assert_eq!(conv_sampling(49, 3), 100);
    assert_eq!(conv_sampling(50, 50), 100);
    assert_eq!(conv_sampling(1000, 200), 5);
    assert_eq!(conv_sampling(3000, 10), 2);
    assert_eq!(conv_sampling(6000, 10), 1);
}

#[test]
fn test_required_conv_size() {
    assert_eq!(ConvFuncBundle::required_conv_size(0, 1), 1);
    assert_eq!(ConvFuncBundle::required_conv_size(1, 1), 3);
    assert_eq!(ConvFuncBundle::required_conv_size(3, 10), 71);
}

#[test]
fn test_pillbox_bundle() {
    let g = geometry(8);
    let vb = buffer(3, &[150e6, 151e6]);
    let bundle = PillboxConvFunc
        .find_conv_function(&g, grid_shape(&g), &vb)
        .unwrap();
    assert!(!bundle.is_empty());
    assert_eq!(bundle.support, 0);
    assert_eq!(bundle.conv_size(), 1);
    assert_eq!(bundle.num_pols(), 1);
    assert!(bundle.validate(&vb).is_ok());

    // The maps don't fit a different buffer.
    let other = buffer(4, &[150e6, 151e6]);
    assert!(matches!(
        bundle.validate(&other),
        Err(ConvFuncError::BadMapLength { map: "row", .. })
    ));
}

#[test]
fn test_empty_bundle() {
    let bundle = ConvFuncBundle::empty(4);
    assert!(bundle.is_empty());
    assert!(bundle.validate(&buffer(2, &[150e6])).is_ok());
}

#[test]
fn test_gaussian_kernel_shape() {
    let g = geometry(64);
    let vb = buffer(5, &[150e6, 300e6]);
    let mut provider = GaussianPbConvFunc::new(pb(), Some(4));
    let bundle = provider
        .find_conv_function(&g, grid_shape(&g), &vb)
        .unwrap();
    assert!(bundle.validate(&vb).is_ok());
    assert_eq!(bundle.sampling, 4);
    assert!(bundle.support >= 1);
    assert_eq!(bundle.chan_map, vec![0, 1]);

    let c = bundle.conv_size() / 2;
    // Unit peak, real at the centre with no pointing offset.
    assert_abs_diff_eq!(bundle.conv[(c, c, 0, 0, 0)].re, 1.0);
    assert_abs_diff_eq!(bundle.conv[(c, c, 0, 0, 0)].im, 0.0);
    // Symmetric.
    let s = bundle.sampling;
    assert_abs_diff_eq!(
        bundle.conv[(c + s, c, 0, 0, 0)].re,
        bundle.conv[(c - s, c, 0, 0, 0)].re,
        epsilon = 1e-6
    );
    // Smaller beams at higher frequencies have wider kernels.
    assert!(bundle.conv[(c + s, c, 0, 1, 0)].re > bundle.conv[(c + s, c, 0, 0, 0)].re);
    // The weight kernel is wider than the gridding kernel.
    let conv_ratio = bundle.conv[(c + s, c, 0, 0, 0)].re / bundle.conv[(c, c, 0, 0, 0)].re;
    let weight_ratio =
        bundle.weight_conv[(c + s, c, 0, 0, 0)].re / bundle.weight_conv[(c, c, 0, 0, 0)].re;
    assert!(weight_ratio > conv_ratio);
}

#[test]
fn test_gaussian_pointing_off_image_is_empty() {
    let g = geometry(64);
    let mut vb = buffer(2, &[150e6]);
    // 10 degree FWHM; the image is ~7 degrees across.
    vb.pointing_offset = (1.0, 0.0);
    let mut provider = GaussianPbConvFunc::new(pb(), Some(4));
    let bundle = provider
        .find_conv_function(&g, grid_shape(&g), &vb)
        .unwrap();
    assert!(bundle.is_empty());
}

#[test]
fn test_gaussian_kernel_cache() {
    let g = geometry(64);
    let vb = buffer(2, &[150e6]);
    let mut provider = GaussianPbConvFunc::new(pb(), Some(4));
    assert!(provider.changed(&vb));
    let b1 = provider
        .find_conv_function(&g, grid_shape(&g), &vb)
        .unwrap();
    assert!(!provider.changed(&vb));
    let b2 = provider
        .find_conv_function(&g, grid_shape(&g), &vb)
        .unwrap();
    assert!(Arc::ptr_eq(&b1, &b2));

    // A different number of rows shares the kernels, but not the maps.
    let vb3 = buffer(7, &[150e6]);
    let b3 = provider
        .find_conv_function(&g, grid_shape(&g), &vb3)
        .unwrap();
    assert!(!Arc::ptr_eq(&b1, &b3));
    assert_eq!(b3.row_map.len(), 7);
    assert_eq!(b3.conv.as_ptr(), b1.conv.as_ptr());

    // A new pointing means new kernels.
    let mut vb4 = buffer(2, &[150e6]);
    vb4.pointing_offset = (0.01, 0.0);
    assert!(provider.changed(&vb4));
    let b4 = provider
        .find_conv_function(&g, grid_shape(&g), &vb4)
        .unwrap();
    assert_ne!(b4.conv.as_ptr(), b1.conv.as_ptr());
    // Off-centre pointings have a phase gradient across the kernel.
    let c = b4.conv_size() / 2;
    assert!(b4.conv[(c + b4.sampling, c, 0, 0, 0)].im.abs() > 0.0);

    provider.reset();
    assert!(provider.changed(&vb4));
}
