// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use marlu::UVW;
use serial_test::serial;

use super::*;
use crate::{
    config::PrimaryBeamConfig,
    constants::VEL_C,
    image::{
        stokes::{Correlation, StokesType},
        MemoryImageStore,
    },
    normalization::NormalizationError,
    vis::MemoryVisIter,
};

const FREQS: [f64; 2] = [150e6, 151e6];
const N: usize = 8;
const CELL: f64 = 0.01;

fn geometry() -> ImageGeometry {
    ImageGeometry {
        nx: N,
        ny: N,
        cell_x: CELL,
        cell_y: CELL,
        freqs_hz: FREQS.to_vec(),
        chan_width_hz: 1e6,
        stokes: StokesType::I,
    }
}

fn config() -> GridderConfig {
    GridderConfig {
        num_threads: Some(2),
        memory_kib: Some(16 * 1024 * 1024),
        conv_sampling: Some(4),
        primary_beam: PrimaryBeamConfig {
            fwhm_deg: Some(20.0),
            reference_freq_hz: Some(FREQS[0]),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn field(kind: FtKind, model: Option<Array4<f32>>) -> ImagingField {
    let mut store = MemoryImageStore::new(geometry()).unwrap();
    if let Some(model) = model {
        store = store.with_model(model).unwrap();
    }
    ImagingField::new(kind, &config(), Box::new(store)).unwrap()
}

fn sky(kind: FtKind) -> SkyEquation {
    SkyEquation::new(vec![field(kind, None)], config()).unwrap()
}

/// A centred point source of `flux` in every channel.
fn point_model(flux: f32) -> Array4<f32> {
    let mut model = Array4::zeros(geometry().shape());
    model.slice_mut(s![N / 2, N / 2, 0, ..]).fill(flux);
    model
}

/// A buffer with a row at each (u, v), in grid cells at the first
/// frequency.
fn buffer(cells: &[(f64, f64)], value: c32) -> VisBuffer {
    let metres = VEL_C / FREQS[0] / (N as f64 * CELL);
    let uvw = cells
        .iter()
        .map(|&(kx, ky)| UVW {
            u: kx * metres,
            v: ky * metres,
            w: 0.0,
        })
        .collect::<Vec<_>>();
    let num_rows = uvw.len();
    VisBuffer::new(
        uvw,
        Array3::from_elem((num_rows, FREQS.len(), 2), value),
        Array2::ones((num_rows, FREQS.len())),
        FREQS.to_vec(),
        vec![Correlation::XX, Correlation::YY],
    )
    .unwrap()
}

fn vis_iter(value: c32) -> MemoryVisIter {
    MemoryVisIter::new(vec![
        buffer(&[(1.0, 0.0), (0.0, 2.0)], value),
        buffer(&[(-1.0, 1.0), (2.0, -2.0), (0.0, 0.0)], value),
    ])
    .unwrap()
}

#[test]
fn test_dd_change_tracker() {
    let mut tracker = DdChangeTracker::new(5.0);
    let mut vb = buffer(&[(1.0, 0.0)], c32::new(1.0, 0.0));
    assert!(!tracker.changed(&vb));
    assert!(!tracker.changed(&vb));

    vb.pointing_offset = (0.01, 0.0);
    assert!(tracker.changed(&vb));
    assert!(!tracker.changed(&vb));

    vb.field_id = 3;
    assert!(tracker.changed(&vb));

    // Drifts add up until they pass the tolerance.
    vb.parallactic_angle = 3.0_f64.to_radians();
    assert!(!tracker.changed(&vb));
    vb.parallactic_angle = 6.0_f64.to_radians();
    assert!(tracker.changed(&vb));
    vb.parallactic_angle = 9.0_f64.to_radians();
    assert!(!tracker.changed(&vb));

    tracker.reset();
    vb.field_id = 0;
    assert!(!tracker.changed(&vb));
}

#[test]
fn test_new_checks_fields() {
    assert!(matches!(
        SkyEquation::new(vec![], config()),
        Err(SkyEquationError::NoFields)
    ));

    let other = MemoryImageStore::new(ImageGeometry {
        freqs_hz: vec![150e6],
        ..geometry()
    })
    .unwrap();
    let fields = vec![
        field(FtKind::Grid, None),
        ImagingField::new(FtKind::Grid, &config(), Box::new(other)).unwrap(),
    ];
    assert!(matches!(
        SkyEquation::new(fields, config()),
        Err(SkyEquationError::MismatchedFields {
            field: 1,
            expected: 2,
            got: 1
        })
    ));

    let bad = GridderConfig {
        padding: 0.5,
        ..config()
    };
    assert!(matches!(
        SkyEquation::new(vec![field(FtKind::Grid, None)], bad),
        Err(SkyEquationError::Config(_))
    ));
}

#[test]
fn test_make_psf() {
    let mut sky = sky(FtKind::Grid);
    assert_eq!(sky.slicing().num_slices, 1);
    let mut vi = vis_iter(c32::new(1.0, 0.0));
    sky.make_psf(&mut vi, &AtomicCell::new(false)).unwrap();

    let store = &sky.fields()[0].store;
    let psf = store.psf();
    for chan in 0..FREQS.len() {
        assert_abs_diff_eq!(psf[(N / 2, N / 2, 0, chan)], 1.0, epsilon = 1e-5);
        assert!(psf
            .slice(s![.., .., 0, chan])
            .iter()
            .all(|&v| v <= 1.0 + 1e-5));
        // 5 rows, 2 correlations, unit weights.
        assert_abs_diff_eq!(store.sumwt()[(0, chan)], 10.0);
    }
    // Without a primary beam, the coverage is flat.
    assert!(store.weight().iter().all(|&w| (w - 10.0).abs() < 1e-4));
    assert!(sky.fields()[0].ft.done_weight_image());
}

#[test]
fn test_make_psf_of_nothing() {
    let mut sky = sky(FtKind::Grid);
    let mut vi = MemoryVisIter::new(vec![]).unwrap();
    assert!(matches!(
        sky.make_psf(&mut vi, &AtomicCell::new(false)),
        Err(SkyEquationError::Normalization {
            field: 0,
            err: NormalizationError::NonPositivePsfPeak { .. }
        })
    ));

    // Fine for multi-term imaging.
    let config = GridderConfig {
        num_taylor_terms: 2,
        ..config()
    };
    let mut sky = SkyEquation::new(vec![field(FtKind::Grid, None)], config).unwrap();
    sky.make_psf(&mut vi, &AtomicCell::new(false)).unwrap();
}

#[test]
fn test_mosaic_psf_and_coverage() {
    let mut sky = sky(FtKind::Mosaic);
    let mut vi = vis_iter(c32::new(1.0, 0.0));
    sky.make_psf(&mut vi, &AtomicCell::new(false)).unwrap();

    let store = &sky.fields()[0].store;
    for chan in 0..FREQS.len() {
        let psf = store.psf();
        let psf = psf.slice(s![.., .., 0, chan]);
        assert_abs_diff_eq!(psf[(N / 2, N / 2)], 1.0, epsilon = 1e-5);
        assert!(psf.iter().all(|&v| v <= 1.0 + 1e-5));

        let weight = store.weight();
        let weight = weight.slice(s![.., .., 0, chan]);
        let centre = weight[(N / 2, N / 2)];
        assert!(centre > 0.0);
        assert!(weight.iter().all(|&w| w <= centre * (1.0 + 1e-4)));
        assert!(store.sumwt()[(0, chan)] > 0.0);
    }
}

#[test]
fn test_residuals_without_a_model() {
    // A single visibility at the origin images to a flat plane.
    let mut vi = MemoryVisIter::new(vec![buffer(&[(0.0, 0.0)], c32::new(3.0, 4.0))]).unwrap();
    let mut sky = sky(FtKind::Grid);
    sky.compute_residuals_and_grid(&mut vi, &AtomicCell::new(false))
        .unwrap();
    let store = &sky.fields()[0].store;
    for &r in store.residual().iter() {
        assert_abs_diff_eq!(r, 3.0, epsilon = 1e-5);
    }
    // Nothing was predicted.
    assert!(vi.buffers()[0].model.iter().all(|&m| m == c32::default()));
}

#[test]
fn test_predict_then_residuals_vanish() {
    let mut sky = SkyEquation::new(
        vec![field(FtKind::Grid, Some(point_model(2.0)))],
        config(),
    )
    .unwrap();
    let stop = AtomicCell::new(false);

    let mut vi = vis_iter(c32::new(2.0, 0.0));
    sky.predict_visibilities(&mut vi, false, &stop).unwrap();
    for vb in vi.buffers() {
        for m in vb.model.iter() {
            assert_abs_diff_eq!(m.re, 2.0, epsilon = 1e-5);
            assert_abs_diff_eq!(m.im, 0.0, epsilon = 1e-5);
        }
    }
    sky.predict_visibilities(&mut vi, true, &stop).unwrap();
    for m in vi.buffers()[1].model.iter() {
        assert_abs_diff_eq!(m.re, 4.0, epsilon = 1e-5);
    }

    // The observed visibilities are exactly the model.
    sky.compute_residuals_and_grid(&mut vi, &stop).unwrap();
    let store = &sky.fields()[0].store;
    assert!(store.residual().iter().all(|&r| r.abs() < 1e-5));
    for m in vi.buffers()[0].model.iter() {
        assert_abs_diff_eq!(m.re, 2.0, epsilon = 1e-5);
    }
}

#[test]
fn test_predictions_add_across_fields() {
    let fields = vec![
        field(FtKind::Grid, Some(point_model(1.0))),
        field(FtKind::Grid, None),
        field(FtKind::Grid, Some(point_model(0.5))),
    ];
    let mut sky = SkyEquation::new(fields, config()).unwrap();
    let mut vi = vis_iter(c32::new(1.0, 1.0));
    sky.predict_visibilities(&mut vi, false, &AtomicCell::new(false))
        .unwrap();
    for vb in vi.buffers() {
        for m in vb.model.iter() {
            assert_abs_diff_eq!(m.re, 1.5, epsilon = 1e-5);
        }
    }
}

#[test]
fn test_slicing_doesnt_change_results() {
    let stop = AtomicCell::new(false);
    let mut whole = sky(FtKind::Grid);
    let mut vi = vis_iter(c32::new(3.0, -1.0));
    whole.make_psf(&mut vi, &stop).unwrap();
    whole.compute_residuals_and_grid(&mut vi, &stop).unwrap();

    let mut sliced = sky(FtKind::Grid).with_chans_per_slice(1);
    assert_eq!(sliced.slicing().num_slices, 2);
    let mut vi = vis_iter(c32::new(3.0, -1.0));
    sliced.make_psf(&mut vi, &stop).unwrap();
    sliced.compute_residuals_and_grid(&mut vi, &stop).unwrap();
    assert_eq!(vi.channel_selection(), None);

    let (a, b) = (&whole.fields()[0].store, &sliced.fields()[0].store);
    for (x, y) in a.residual().iter().zip(b.residual().iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-5);
    }
    for (x, y) in a.psf().iter().zip(b.psf().iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-5);
    }
    assert_eq!(a.sumwt(), b.sumwt());
}

#[test]
fn test_cancelling_restores_the_selection() {
    let mut sky = sky(FtKind::Grid);
    let mut vi = vis_iter(c32::new(1.0, 0.0));
    vi.select_channels(Some(0..2)).unwrap();
    let result = sky.make_psf(&mut vi, &AtomicCell::new(true));
    assert!(matches!(result, Err(SkyEquationError::Cancelled)));
    assert_eq!(vi.channel_selection(), Some(0..2));

    let result = sky.predict_visibilities(&mut vi, false, &AtomicCell::new(true));
    // Nothing to predict, so there's nothing to cancel.
    assert!(result.is_ok());
}

#[test]
fn test_pointing_changes_flush_the_grid() {
    let stop = AtomicCell::new(false);
    let value = c32::new(1.0, 2.0);

    let mut steady = sky(FtKind::Grid);
    let mut vi = vis_iter(value);
    steady.compute_residuals_and_grid(&mut vi, &stop).unwrap();

    // The same visibilities with the second buffer pointing elsewhere. The
    // unit kernels don't care, so the images must agree.
    let mut moving = sky(FtKind::Grid);
    let mut buffers = vis_iter(value).into_buffers();
    buffers[1].pointing_offset = (0.02, -0.01);
    let mut vi = MemoryVisIter::new(buffers).unwrap();
    moving.compute_residuals_and_grid(&mut vi, &stop).unwrap();

    let (a, b) = (&steady.fields()[0].store, &moving.fields()[0].store);
    for (x, y) in a.residual().iter().zip(b.residual().iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-5);
    }
    assert_eq!(a.sumwt(), b.sumwt());
    for (x, y) in a.weight().iter().zip(b.weight().iter()) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-4);
    }
}

#[test]
#[serial]
fn test_progress_bars_can_be_drawn() {
    PROGRESS_BARS.store(true);
    let mut sky = sky(FtKind::Grid);
    let mut vi = vis_iter(c32::new(1.0, 0.0));
    let result = sky.make_psf(&mut vi, &AtomicCell::new(false));
    PROGRESS_BARS.store(false);
    result.unwrap();
}
