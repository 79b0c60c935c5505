// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Where visibility samples land on the grid.

use std::ops::Range;

use marlu::c64;
use ndarray::{prelude::*, Zip};

use crate::{constants::*, conv_func::GridShape, math::cexp, vis::VisBuffer};

/// A visibility sample's place on the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Located {
    /// The image channel.
    pub(super) chan: usize,

    /// The grid cell nearest the sample.
    pub(super) loc: [usize; 2],

    /// The offset of the sample from `loc` in units of kernel samples.
    pub(super) off: [isize; 2],

    /// Shifts the phase centre by the row's delay.
    pub(super) phasor: c64,
}

/// The grid coordinate of a uv distance \[wavelengths\]. u and v are
/// negated, so that pixel x corresponds to -l.
#[inline]
fn grid_pos(uv_lambda: f64, n: usize, cell: f64) -> f64 {
    -uv_lambda * (n as f64 * cell) + (n / 2) as f64
}

/// The nearest cell and fractional offset of a grid position, or `None` if
/// any part of a kernel with `support` around it would be off the grid.
#[inline]
fn cell_and_offset(pos: f64, n: usize, sampling: usize, support: usize) -> Option<(usize, isize)> {
    if !pos.is_finite() {
        return None;
    }
    let loc = pos.round();
    let support = support as f64;
    if loc - support < 0.0 || loc + support > (n - 1) as f64 {
        return None;
    }
    let half = (sampling / 2) as isize;
    let off = (((loc - pos) * sampling as f64).round() as isize).clamp(-half, half);
    Some((loc as usize, off))
}

/// Locate every (row, channel) sample of `rows` in `vb`. Flagged rows,
/// channels that don't map to an image channel and samples whose kernel
/// footprint isn't entirely on the grid are `None`.
pub(super) fn locate(
    vb: &VisBuffer,
    rows: Range<usize>,
    chan_map: &[Option<usize>],
    grid: GridShape,
    sampling: usize,
    support: usize,
    use_zero_baselines: bool,
) -> Array2<Option<Located>> {
    let mut located = Array2::from_elem((vb.num_rows(), vb.num_chans()), None);
    let row_skip: Vec<bool> = (0..vb.num_rows())
        .map(|row| !rows.contains(&row) || vb.row_is_flagged(row, use_zero_baselines))
        .collect();

    Zip::indexed(located.rows_mut()).par_for_each(|row, mut out| {
        if row_skip[row] {
            return;
        }
        let uvw = vb.uvw[row];
        let dphase = vb.dphase[row];
        for ((out, &freq), chan) in out.iter_mut().zip(vb.freqs_hz.iter()).zip(chan_map) {
            let Some(chan) = *chan else {
                continue;
            };
            let scale = freq / VEL_C;
            let x = cell_and_offset(
                grid_pos(uvw.u * scale, grid.nx, grid.cell_x),
                grid.nx,
                sampling,
                support,
            );
            let y = cell_and_offset(
                grid_pos(uvw.v * scale, grid.ny, grid.cell_y),
                grid.ny,
                sampling,
                support,
            );
            if let (Some((lx, ox)), Some((ly, oy))) = (x, y) {
                *out = Some(Located {
                    chan,
                    loc: [lx, ly],
                    off: [ox, oy],
                    phasor: cexp(TAU * dphase * scale),
                });
            }
        }
    });

    located
}
