// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Whole imaging cycles: simulate, make the PSF, grid residuals.

use approx::assert_abs_diff_eq;

use super::*;
use hypergrid::{ImageStore, Precision, VisIter};

const SOURCE: (usize, usize) = (N / 2 + 3, N / 2 - 2);

#[test]
fn test_dirty_image_of_a_point_source() {
    init_logging();
    let mut vi = simulate(FtKind::Grid, point_model(SOURCE.0, SOURCE.1, 1.0));
    let stop = AtomicCell::new(false);

    let mut sky = SkyEquation::new(vec![field(FtKind::Grid, &config(), None)], config()).unwrap();
    sky.make_psf(&mut vi, &stop).unwrap();
    sky.compute_residuals_and_grid(&mut vi, &stop).unwrap();

    let store = &sky.fields()[0].store;
    for ((pos, peak), (psf_pos, psf_peak)) in peaks(store.residual())
        .into_iter()
        .zip(peaks(store.psf()))
    {
        assert_eq!(pos, SOURCE);
        assert_abs_diff_eq!(peak, 1.0, epsilon = 1e-3);
        assert_eq!(psf_pos, (N / 2, N / 2));
        assert_abs_diff_eq!(psf_peak, 1.0, epsilon = 1e-5);
    }
    // 40 rows with two correlations each.
    assert!(store.sumwt().iter().all(|&w| w == 80.0));
}

#[test]
fn test_the_true_model_leaves_no_residual() {
    init_logging();
    let model = point_model(SOURCE.0, SOURCE.1, 2.5);
    let mut vi = simulate(FtKind::Grid, model.clone());

    let mut sky =
        SkyEquation::new(vec![field(FtKind::Grid, &config(), Some(model))], config()).unwrap();
    sky.compute_residuals_and_grid(&mut vi, &AtomicCell::new(false))
        .unwrap();
    let store = &sky.fields()[0].store;
    assert!(store.residual().iter().all(|r| r.abs() < 1e-3));
    // The model visibilities were written back for the caller.
    for vb in vi.buffers() {
        for (m, v) in vb.model.iter().zip(vb.vis.iter()) {
            assert_abs_diff_eq!(m.re, v.re, epsilon = 1e-4);
            assert_abs_diff_eq!(m.im, v.im, epsilon = 1e-4);
        }
    }
}

#[test]
fn test_slices_and_precisions_agree() {
    init_logging();
    let stop = AtomicCell::new(false);
    let mut results = vec![];
    for (precision, chans_per_slice) in [
        (Precision::Double, 4),
        (Precision::Double, 3),
        (Precision::Single, 1),
    ] {
        let config = GridderConfig {
            precision,
            ..config()
        };
        let mut vi = simulate(FtKind::Grid, point_model(SOURCE.0, SOURCE.1, 1.0));
        let mut sky = SkyEquation::new(vec![field(FtKind::Grid, &config, None)], config)
            .unwrap()
            .with_chans_per_slice(chans_per_slice);
        sky.make_psf(&mut vi, &stop).unwrap();
        sky.compute_residuals_and_grid(&mut vi, &stop).unwrap();
        assert_eq!(vi.channel_selection(), None);
        results.push(sky.into_fields().remove(0).store);
    }
    let (first, rest) = results.split_first().unwrap();
    for other in rest {
        for (a, b) in first.residual().iter().zip(other.residual().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-4);
        }
        for (a, b) in first.psf().iter().zip(other.psf().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-4);
        }
        assert_eq!(first.sumwt(), other.sumwt());
    }
}

#[test]
fn test_mosaic_imaging() {
    init_logging();
    let centre = (N / 2, N / 2);
    let mut vi = simulate(FtKind::Mosaic, point_model(centre.0, centre.1, 1.0));
    let stop = AtomicCell::new(false);

    let mut sky =
        SkyEquation::new(vec![field(FtKind::Mosaic, &config(), None)], config()).unwrap();
    sky.make_psf(&mut vi, &stop).unwrap();
    sky.compute_residuals_and_grid(&mut vi, &stop).unwrap();

    let store = &sky.fields()[0].store;
    for (pos, peak) in peaks(store.residual()) {
        assert_eq!(pos, centre);
        assert!(peak > 0.0);
    }
    for (pos, peak) in peaks(store.weight()) {
        assert_eq!(pos, centre);
        assert!(peak > 0.0);
    }
    assert!(store.residual().iter().all(|v| v.is_finite()));
}

/// A beam about ten pixels across, narrow enough for pointings to separate.
fn narrow_beam_config() -> GridderConfig {
    GridderConfig {
        primary_beam: PrimaryBeamConfig {
            fwhm_deg: Some((10.0 * CELL).to_degrees()),
            reference_freq_hz: Some(FREQS[0]),
            ..Default::default()
        },
        ..config()
    }
}

/// Buffers pointing `offsets` pixels along l, in turn.
fn pointed_buffers(offsets: &[f64]) -> Vec<VisBuffer> {
    empty_buffers(4, 10)
        .into_iter()
        .enumerate()
        .map(|(i, mut vb)| {
            vb.pointing_offset = (offsets[i % offsets.len()] * CELL, 0.0);
            vb
        })
        .collect()
}

#[test]
fn test_mosaic_off_centre_pointing() {
    init_logging();
    let config = narrow_beam_config();
    // Positive l is towards smaller x.
    let pointed = (N / 2 - 5, N / 2);
    let model = point_model(pointed.0, pointed.1, 1.0);
    let mut vi = simulate_buffers(
        FtKind::Mosaic,
        &config,
        pointed_buffers(&[5.0]),
        model.clone(),
    );
    let stop = AtomicCell::new(false);

    let mut sky =
        SkyEquation::new(vec![field(FtKind::Mosaic, &config, None)], config.clone()).unwrap();
    sky.make_psf(&mut vi, &stop).unwrap();
    sky.compute_residuals_and_grid(&mut vi, &stop).unwrap();
    let store = &sky.fields()[0].store;
    for (pos, peak) in peaks(store.weight()) {
        assert_eq!(pos, pointed);
        assert!(peak > 0.0);
    }
    for (pos, peak) in peaks(store.residual()) {
        assert_eq!(pos, pointed);
        assert!(peak > 0.0);
    }

    // Predicting the true model through the shifted beam leaves nothing.
    let mut sky =
        SkyEquation::new(vec![field(FtKind::Mosaic, &config, Some(model))], config).unwrap();
    sky.compute_residuals_and_grid(&mut vi, &stop).unwrap();
    let store = &sky.fields()[0].store;
    assert!(store.residual().iter().all(|r| r.abs() < 1e-3));
    for vb in vi.buffers() {
        assert_eq!(vb.pointing_offset, (5.0 * CELL, 0.0));
        for (m, v) in vb.model.iter().zip(vb.vis.iter()) {
            assert_abs_diff_eq!(m.re, v.re, epsilon = 1e-4);
            assert_abs_diff_eq!(m.im, v.im, epsilon = 1e-4);
        }
    }
}

#[test]
fn test_mosaic_of_two_pointings_has_two_lobes() {
    init_logging();
    let config = narrow_beam_config();
    let mut vi = MemoryVisIter::new(pointed_buffers(&[5.0, -5.0])).unwrap();
    let mut sky =
        SkyEquation::new(vec![field(FtKind::Mosaic, &config, None)], config).unwrap();
    sky.make_psf(&mut vi, &AtomicCell::new(false)).unwrap();

    let weight = sky.fields()[0].store.weight();
    let (left, right) = (N / 2 - 5, N / 2 + 5);
    for chan in 0..FREQS.len() {
        let row = weight.slice(s![.., N / 2, 0, chan]);
        for x in [left, right] {
            assert!(row[x] > row[x - 1] && row[x] > row[x + 1]);
        }
        assert_abs_diff_eq!(row[left], row[right], epsilon = 1e-3 * row[left]);
        // The beams overlap, but not enough to fill the gap.
        assert!(row[N / 2] > 0.0);
        assert!(row[N / 2] < 0.8 * row[left]);
    }
}

#[test]
fn test_two_fields_predict_their_sum() {
    init_logging();
    let a = point_model(SOURCE.0, SOURCE.1, 1.0);
    let b = point_model(N / 2, N / 2, 0.5);
    let mut truth = simulate(FtKind::Grid, &a + &b);

    let mut sky = SkyEquation::new(
        vec![
            field(FtKind::Grid, &config(), Some(a)),
            field(FtKind::Grid, &config(), Some(b)),
        ],
        config(),
    )
    .unwrap();
    sky.predict_visibilities(&mut truth, false, &AtomicCell::new(false))
        .unwrap();
    for vb in truth.buffers() {
        for (m, v) in vb.model.iter().zip(vb.vis.iter()) {
            assert_abs_diff_eq!(m.re, v.re, epsilon = 1e-4);
            assert_abs_diff_eq!(m.im, v.im, epsilon = 1e-4);
        }
    }
}
