// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Imaging driven by config files.

use std::io::Write;

use indoc::indoc;
use tempfile::Builder;

use super::*;
use hypergrid::{config::FluxScaleScheme, HypergridError, ImageStore};

fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut f = Builder::new().suffix(suffix).tempfile().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn test_image_with_a_toml_config() {
    init_logging();
    let f = write_config(
        ".toml",
        indoc! {r#"
            precision = "single"
            num_threads = 2
            memory_kib = 8000000
            norm_type = "flatsky"

            [flux_scale]
            scheme = "sault"
            const_pb = 0.5
            min_pb = 0.1

            [primary_beam]
            fwhm_deg = 3.0
            reference_freq_hz = 150e6
        "#},
    );
    let config = GridderConfig::from_file(f.path()).unwrap();
    assert!(matches!(config.flux_scale, FluxScaleScheme::Sault { .. }));

    let mut vi = simulate(FtKind::Mosaic, point_model(N / 2, N / 2, 1.0));
    let mut sky =
        SkyEquation::new(vec![field(FtKind::Mosaic, &config, None)], config.clone()).unwrap();
    let stop = AtomicCell::new(false);
    sky.make_psf(&mut vi, &stop).unwrap();
    sky.compute_residuals_and_grid(&mut vi, &stop).unwrap();

    let store = &sky.fields()[0].store;
    // Sault weighting leaves a flux-scale image between 0 and 1.
    assert!(store
        .flux_scale()
        .iter()
        .all(|&f| (0.0..=1.0 + 1e-6).contains(&f)));
    assert!(store.flux_scale().iter().any(|&f| f > 0.0));
    assert!(store.residual().iter().all(|v| v.is_finite()));
}

#[test]
fn test_bad_config_files_are_rejected() {
    let f = write_config(".json", r#"{"padding": 0.5}"#);
    let result = GridderConfig::from_file(f.path()).map_err(HypergridError::from);
    assert!(result.is_err());

    let f = write_config(".toml", "not_a_setting = true");
    assert!(GridderConfig::from_file(f.path()).is_err());

    let f = write_config(".yaml", "padding: 2.0");
    assert!(GridderConfig::from_file(f.path()).is_err());
}
