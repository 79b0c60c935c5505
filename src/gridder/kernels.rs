// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The inner loops of gridding and degridding.

use marlu::{c32, c64};
use ndarray::prelude::*;
use num_complex::Complex;

use super::{locate::Located, partition::Region, GridFloat, VisType};
use crate::{conv_func::ConvFuncBundle, vis::VisBuffer};

/// Everything a gridding thread reads.
pub(super) struct GridContext<'a> {
    pub(super) vb: &'a VisBuffer,
    pub(super) bundle: &'a ConvFuncBundle,
    pub(super) located: &'a Array2<Option<Located>>,
    pub(super) pol_map: &'a [Option<usize>],
    pub(super) do_psf: bool,
    pub(super) vis_type: VisType,
    /// The centre cell of the whole grid, where weights are gridded.
    pub(super) grid_centre: [usize; 2],
}

#[inline]
fn widen(c: c32) -> c64 {
    c64::new(c.re as f64, c.im as f64)
}

#[inline]
fn narrow<T: GridFloat>(c: c64) -> Complex<T> {
    Complex::new(T::from_f64_lossy(c.re), T::from_f64_lossy(c.im))
}

/// The kernel tap for a grid cell `d` cells from a sample's nearest cell.
#[inline]
fn tap_index(centre: isize, d: isize, sampling: isize, off: isize) -> usize {
    (centre + d * sampling + off) as usize
}

/// The sum of the tap magnitudes that a sample at `loc` touches.
fn footprint_norm(conv: ArrayView2<c32>, loc: &Located, support: isize, sampling: isize) -> f64 {
    let centre = (conv.len_of(Axis(0)) / 2) as isize;
    let mut norm = 0.0;
    for dx in -support..=support {
        let tx = tap_index(centre, dx, sampling, loc.off[0]);
        for dy in -support..=support {
            let ty = tap_index(centre, dy, sampling, loc.off[1]);
            norm += conv[(tx, ty)].norm() as f64;
        }
    }
    norm
}

/// Grid every located sample into `region`. Returns the sums of weights,
/// indexed by (grid plane, image channel), of the samples centred in this
/// region.
pub(super) fn grid_region<T: GridFloat>(mut region: Region<T>, ctx: &GridContext) -> Array2<f64> {
    let (_, _, num_planes, num_chans) = region.grid.dim();
    let mut sumwt = Array2::zeros((num_planes, num_chans));
    let bundle = ctx.bundle;
    let support = bundle.support as isize;
    let sampling = bundle.sampling as isize;
    let centre = (bundle.conv_size() / 2) as isize;
    let (x0, y0) = (region.x0 as isize, region.y0 as isize);

    for ((row, vis_chan), located) in ctx.located.indexed_iter() {
        let Some(loc) = located else {
            continue;
        };
        let weight = ctx.vb.weights[(row, vis_chan)];
        if weight == 0.0 || !weight.is_finite() {
            continue;
        }
        let weight = weight as f64;
        let (lx, ly) = (loc.loc[0] as isize, loc.loc[1] as isize);
        let owns = region.contains(loc.loc[0], loc.loc[1]);
        let (x_lo, x_hi) = region.clip(0, lx - support, lx + support);
        let (y_lo, y_hi) = region.clip(1, ly - support, ly + support);
        // Weights go around the grid centre, whatever the sample's uv.
        let (cx, cy) = (ctx.grid_centre[0] as isize, ctx.grid_centre[1] as isize);
        let (wx_lo, wx_hi) = region.clip(0, cx - support, cx + support);
        let (wy_lo, wy_hi) = region.clip(1, cy - support, cy + support);
        let touches_values = x_lo <= x_hi && y_lo <= y_hi;
        let touches_weights = region.weight.is_some() && wx_lo <= wx_hi && wy_lo <= wy_hi;
        if !owns && !touches_values && !touches_weights {
            continue;
        }
        let k_plane = bundle.row_map[row];
        let k_chan = bundle.chan_map[vis_chan];

        for (corr, plane) in ctx.pol_map.iter().enumerate() {
            let Some(plane) = *plane else {
                continue;
            };
            if ctx.vb.flags[(row, vis_chan, corr)] {
                continue;
            }
            let k_pol = bundle.pol_map[corr];
            let conv = bundle.conv.slice(s![.., .., k_pol, k_chan, k_plane]);
            let weight_conv = bundle.weight_conv.slice(s![.., .., k_pol, k_chan, k_plane]);

            let nvalue = if ctx.do_psf || ctx.vis_type == VisType::Psf {
                c64::new(weight, 0.0)
            } else {
                let value = match ctx.vis_type {
                    VisType::Observed => ctx.vb.vis[(row, vis_chan, corr)],
                    VisType::Model => ctx.vb.model[(row, vis_chan, corr)],
                    VisType::Residual => {
                        ctx.vb.vis[(row, vis_chan, corr)] - ctx.vb.model[(row, vis_chan, corr)]
                    }
                    VisType::Psf => c32::new(1.0, 0.0),
                };
                widen(value) * loc.phasor * weight
            };

            for x in x_lo..=x_hi {
                let tx = tap_index(centre, x - lx, sampling, loc.off[0]);
                let gx = (x - x0) as usize;
                for y in y_lo..=y_hi {
                    let ty = tap_index(centre, y - ly, sampling, loc.off[1]);
                    let gy = (y - y0) as usize;
                    region.grid[(gx, gy, plane, loc.chan)] +=
                        narrow::<T>(widen(conv[(tx, ty)]) * nvalue);
                }
            }

            if let Some(w) = region.weight.as_mut() {
                for x in wx_lo..=wx_hi {
                    let tx = tap_index(centre, x - cx, sampling, 0);
                    let gx = (x - x0) as usize;
                    for y in wy_lo..=wy_hi {
                        let ty = tap_index(centre, y - cy, sampling, 0);
                        let gy = (y - y0) as usize;
                        w[(gx, gy, plane, loc.chan)] +=
                            narrow::<T>(widen(weight_conv[(tx, ty)]) * weight);
                    }
                }
            }

            if owns {
                sumwt[(plane, loc.chan)] += weight * footprint_norm(conv, loc, support, sampling);
            }
        }
    }

    sumwt
}

/// Everything a degridding thread reads.
pub(super) struct DegridContext<'a, T> {
    pub(super) grid: ArrayView4<'a, Complex<T>>,
    pub(super) bundle: &'a ConvFuncBundle,
    pub(super) located: &'a Array2<Option<Located>>,
    pub(super) pol_map: &'a [Option<usize>],
}

/// Interpolate the grid at every located sample of `row`, writing into that
/// row's model visibilities (indexed by channel, correlation). Samples that
/// aren't located keep their values.
pub(super) fn degrid_row<T: GridFloat>(
    row: usize,
    mut model: ArrayViewMut2<c32>,
    ctx: &DegridContext<T>,
) {
    let bundle = ctx.bundle;
    let support = bundle.support as isize;
    let sampling = bundle.sampling as isize;
    let centre = (bundle.conv_size() / 2) as isize;
    let k_plane = bundle.row_map[row];

    for (vis_chan, located) in ctx.located.row(row).iter().enumerate() {
        let Some(loc) = located else {
            continue;
        };
        let k_chan = bundle.chan_map[vis_chan];
        let (lx, ly) = (loc.loc[0] as isize, loc.loc[1] as isize);

        for (corr, plane) in ctx.pol_map.iter().enumerate() {
            let Some(plane) = *plane else {
                continue;
            };
            let conv = bundle.conv.slice(s![.., .., bundle.pol_map[corr], k_chan, k_plane]);
            let mut sum = c64::default();
            let mut norm = 0.0;
            for dx in -support..=support {
                let tx = tap_index(centre, dx, sampling, loc.off[0]);
                let gx = (lx + dx) as usize;
                for dy in -support..=support {
                    let ty = tap_index(centre, dy, sampling, loc.off[1]);
                    let gy = (ly + dy) as usize;
                    let tap = widen(conv[(tx, ty)]);
                    let g = ctx.grid[(gx, gy, plane, loc.chan)];
                    sum += tap.conj() * c64::new(g.re.into_f64(), g.im.into_f64());
                    norm += tap.norm();
                }
            }
            if norm > 0.0 {
                let v = sum / norm * loc.phasor.conj();
                model[(vis_chan, corr)] = c32::new(v.re as f32, v.im as f32);
            }
        }
    }
}
