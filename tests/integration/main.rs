// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod config_files;
mod imaging;

use crossbeam_utils::atomic::AtomicCell;
use ndarray::prelude::*;

use hypergrid::{
    config::PrimaryBeamConfig, constants::VEL_C, Correlation, FtKind, GridderConfig,
    ImageGeometry, ImagingField, MemoryImageStore, MemoryVisIter, SkyEquation, StokesType,
    VisBuffer, UVW,
};

const N: usize = 32;
const CELL: f64 = 1e-3;
const FREQS: [f64; 4] = [150e6, 151e6, 152e6, 153e6];

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

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
            fwhm_deg: Some(3.0),
            reference_freq_hz: Some(FREQS[0]),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn field(kind: FtKind, config: &GridderConfig, model: Option<Array4<f32>>) -> ImagingField {
    let mut store = MemoryImageStore::new(geometry()).unwrap();
    if let Some(model) = model {
        store = store.with_model(model).unwrap();
    }
    ImagingField::new(kind, config, Box::new(store)).unwrap()
}

fn point_model(x: usize, y: usize, flux: f32) -> Array4<f32> {
    let mut model = Array4::zeros(geometry().shape());
    model.slice_mut(s![x, y, 0, ..]).fill(flux);
    model
}

/// Buffers of rows sitting on grid cells (at the first frequency), with
/// zeroed visibilities.
fn empty_buffers(num_buffers: usize, rows_per_buffer: usize) -> Vec<VisBuffer> {
    let metres = VEL_C / FREQS[0] / (N as f64 * CELL);
    (0..num_buffers)
        .map(|b| {
            let uvw = (0..rows_per_buffer)
                .map(|r| {
                    let i = b * rows_per_buffer + r;
                    UVW {
                        u: (((i * 7) % 13) as f64 - 6.0) * metres,
                        v: (((i * 5) % 11) as f64 - 5.0) * metres,
                        w: 0.0,
                    }
                })
                .collect();
            VisBuffer::new(
                uvw,
                Array3::zeros((rows_per_buffer, FREQS.len(), 2)),
                Array2::ones((rows_per_buffer, FREQS.len())),
                FREQS.to_vec(),
                vec![Correlation::XX, Correlation::YY],
            )
            .unwrap()
        })
        .collect()
}

/// Predict `model` with a `kind` machine and make that the observed data.
fn simulate(kind: FtKind, model: Array4<f32>) -> MemoryVisIter {
    simulate_buffers(kind, &config(), empty_buffers(4, 10), model)
}

fn simulate_buffers(
    kind: FtKind,
    config: &GridderConfig,
    buffers: Vec<VisBuffer>,
    model: Array4<f32>,
) -> MemoryVisIter {
    let mut vi = MemoryVisIter::new(buffers).unwrap();
    let mut sky =
        SkyEquation::new(vec![field(kind, config, Some(model))], config.clone()).unwrap();
    sky.predict_visibilities(&mut vi, false, &AtomicCell::new(false))
        .unwrap();
    let buffers = vi
        .into_buffers()
        .into_iter()
        .map(|mut vb| {
            let zeros = Array3::zeros(vb.model.dim());
            vb.vis = std::mem::replace(&mut vb.model, zeros);
            vb
        })
        .collect();
    MemoryVisIter::new(buffers).unwrap()
}

/// The position and value of the brightest pixel of each channel's first
/// Stokes plane.
fn peaks(image: ArrayView4<f32>) -> Vec<((usize, usize), f32)> {
    (0..image.len_of(Axis(3)))
        .map(|chan| {
            image
                .slice(s![.., .., 0, chan])
                .indexed_iter()
                .fold(((0, 0), f32::MIN), |best, (pos, &v)| {
                    if v > best.1 {
                        (pos, v)
                    } else {
                        best
                    }
                })
        })
        .collect()
}
