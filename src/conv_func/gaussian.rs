// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Convolution functions from a Gaussian primary beam.
//!
//! The gridding kernel is the Fourier transform of the primary beam, shifted
//! to the antenna pointing; gridding with it weights each visibility's
//! contribution to the image by the beam. The weight kernel is the transform
//! of the beam squared, so the gridded weights become the sky coverage.

use std::{f64::consts::PI, sync::Arc};

use log::{debug, trace, warn};
use marlu::c32;
use ndarray::prelude::*;

use super::{conv_sampling, ConvFuncBundle, ConvFuncError, ConvFuncProvider, GridShape};
use crate::{
    config::PrimaryBeamConfig, constants::*, image::ImageGeometry, math::cexp, vis::VisBuffer,
};

/// Kernel planes bigger than this are made by lowering the oversampling.
const MAX_CONV_SIZE: usize = 1025;

/// Identifies the kernels; everything here is compared bit-for-bit.
#[derive(Debug, Clone, PartialEq)]
struct KernelKey {
    field_id: usize,
    pointing: (u64, u64),
    freqs: Vec<u64>,
    grid: (usize, usize, u64, u64),
}

impl KernelKey {
    fn new(vb: &VisBuffer, grid: GridShape) -> KernelKey {
        KernelKey {
            field_id: vb.field_id,
            pointing: (vb.pointing_offset.0.to_bits(), vb.pointing_offset.1.to_bits()),
            freqs: vb.freqs_hz.iter().map(|f| f.to_bits()).collect(),
            grid: (grid.nx, grid.ny, grid.cell_x.to_bits(), grid.cell_y.to_bits()),
        }
    }
}

pub struct GaussianPbConvFunc {
    pb: PrimaryBeamConfig,
    sampling: Option<usize>,
    cache: Option<(KernelKey, Arc<ConvFuncBundle>)>,
}

impl GaussianPbConvFunc {
    /// `sampling` overrides the oversampling that would otherwise be chosen
    /// from the image size.
    pub fn new(pb: PrimaryBeamConfig, sampling: Option<usize>) -> GaussianPbConvFunc {
        GaussianPbConvFunc {
            pb,
            sampling,
            cache: None,
        }
    }

    fn make_bundle(
        &self,
        geometry: &ImageGeometry,
        grid: GridShape,
        vb: &VisBuffer,
    ) -> Result<ConvFuncBundle, ConvFuncError> {
        let mut sampling = self
            .sampling
            .unwrap_or_else(|| conv_sampling(geometry.nx, geometry.ny));
        if sampling == 0 {
            return Err(ConvFuncError::ZeroSampling);
        }

        let fwhms = vb
            .freqs_hz
            .iter()
            .map(|&f| {
                let fwhm = self.pb.fwhm_rad(f);
                if fwhm.is_finite() && fwhm > 0.0 {
                    Ok(fwhm)
                } else {
                    Err(ConvFuncError::BadFwhm(fwhm))
                }
            })
            .collect::<Result<Vec<f64>, _>>()?;
        let max_fwhm = fwhms.iter().copied().fold(0.0, f64::max);

        // Nothing to do if the beam can't reach the image.
        let (l0, m0) = vb.pointing_offset;
        let half_l = geometry.nx as f64 * geometry.cell_x / 2.0;
        let half_m = geometry.ny as f64 * geometry.cell_y / 2.0;
        if l0.abs() > half_l + 2.0 * max_fwhm || m0.abs() > half_m + 2.0 * max_fwhm {
            debug!(
                "Pointing offset ({l0}, {m0}) is off the image; field {} won't be gridded",
                vb.field_id
            );
            return Ok(ConvFuncBundle::empty(sampling));
        }

        // The beam is exp(-r^2 / 2s^2); its transform is a Gaussian with
        // sigma 1 / (2 pi s) in wavelengths, and the beam squared has a
        // transform sqrt(2) times wider.
        let uv_sigmas: Vec<f64> = fwhms
            .iter()
            .map(|fwhm| 1.0 / (2.0 * PI * fwhm / FWHM_FACTOR))
            .collect();
        let (du, dv) = grid.uv_cell();
        let widest = uv_sigmas.iter().copied().fold(0.0, f64::max) * 2.0_f64.sqrt();
        let mut support = (CONV_SUPPORT_SIGMAS * widest / du.min(dv)).ceil() as usize;
        let max_support = (grid.nx.min(grid.ny).saturating_sub(1)) / 2;
        if support > max_support {
            warn!(
                "Primary-beam convolution support ({support} cells) is too big for a {}x{} grid; truncating to {max_support}",
                grid.nx, grid.ny
            );
            support = max_support;
        }
        while sampling > 1 && ConvFuncBundle::required_conv_size(support, sampling) > MAX_CONV_SIZE
        {
            sampling -= 1;
        }
        let conv_size = ConvFuncBundle::required_conv_size(support, sampling);
        let centre = conv_size / 2;
        let num_chans = vb.num_chans();
        trace!(
            "Making Gaussian convolution functions: support {support}, sampling {sampling}, {num_chans} channels"
        );

        let num_elems = conv_size * conv_size * num_chans;
        let mut conv_buf = Vec::new();
        let mut weight_buf = Vec::new();
        for buf in [&mut conv_buf, &mut weight_buf] {
            buf.try_reserve_exact(num_elems)
                .map_err(|_| ConvFuncError::InsufficientMemory {
                    need_gib: num_elems * std::mem::size_of::<c32>() / 1024_usize.pow(3),
                })?;
            buf.resize(num_elems, c32::default());
        }
        let shape = (conv_size, conv_size, 1, num_chans, 1);
        let mut conv = Array5::from_shape_vec(shape, conv_buf)?;
        let mut weight_conv = Array5::from_shape_vec(shape, weight_buf)?;

        for (i_chan, &sigma) in uv_sigmas.iter().enumerate() {
            let sigma_sq = 2.0 * sigma * sigma;
            let sigma2_sq = 2.0 * sigma_sq;
            let mut conv_sum = 0.0;
            let mut weight_sum = 0.0;
            for ix in 0..conv_size {
                let u = (ix as f64 - centre as f64) / sampling as f64 * du;
                for iy in 0..conv_size {
                    let v = (iy as f64 - centre as f64) / sampling as f64 * dv;
                    let r_sq = u * u + v * v;
                    let phase = cexp(2.0 * PI * (u * l0 + v * m0));
                    let c = (-r_sq / sigma_sq).exp();
                    let w = (-r_sq / sigma2_sq).exp();
                    conv[(ix, iy, 0, i_chan, 0)] = c32::new((c * phase.re) as f32, (c * phase.im) as f32);
                    weight_conv[(ix, iy, 0, i_chan, 0)] =
                        c32::new((w * phase.re) as f32, (w * phase.im) as f32);
                    // Sums over the taps that land on grid cells when there's
                    // no fractional offset.
                    let on_cell = (ix as isize - centre as isize) % sampling as isize == 0
                        && (iy as isize - centre as isize) % sampling as isize == 0;
                    let in_support = ix.abs_diff(centre) <= support * sampling
                        && iy.abs_diff(centre) <= support * sampling;
                    if on_cell && in_support {
                        conv_sum += c;
                        weight_sum += w;
                    }
                }
            }
            // Scale the weight kernel so that a single pointing's coverage
            // peaks at the sum of weights.
            if weight_sum > 0.0 {
                let scale = (conv_sum / weight_sum) as f32;
                weight_conv
                    .slice_mut(s![.., .., 0, i_chan, 0])
                    .mapv_inplace(|w| w * scale);
            }
        }

        Ok(ConvFuncBundle {
            conv: conv.into_shared(),
            weight_conv: weight_conv.into_shared(),
            row_map: vec![0; vb.num_rows()],
            chan_map: (0..num_chans).collect(),
            pol_map: vec![0; vb.num_corrs()],
            support,
            sampling,
        })
    }
}

impl ConvFuncProvider for GaussianPbConvFunc {
    fn find_conv_function(
        &mut self,
        geometry: &ImageGeometry,
        grid: GridShape,
        vb: &VisBuffer,
    ) -> Result<Arc<ConvFuncBundle>, ConvFuncError> {
        let key = KernelKey::new(vb, grid);
        if let Some((cached_key, bundle)) = &self.cache {
            if *cached_key == key {
                if bundle.row_map.len() == vb.num_rows() && bundle.pol_map.len() == vb.num_corrs()
                {
                    return Ok(Arc::clone(bundle));
                }
                // Same kernels, different buffer shape; the kernel arrays are
                // shared.
                let bundle = Arc::new(ConvFuncBundle {
                    conv: bundle.conv.clone(),
                    weight_conv: bundle.weight_conv.clone(),
                    row_map: vec![0; vb.num_rows()],
                    chan_map: bundle.chan_map.clone(),
                    pol_map: vec![0; vb.num_corrs()],
                    support: bundle.support,
                    sampling: bundle.sampling,
                });
                self.cache = Some((key, Arc::clone(&bundle)));
                return Ok(bundle);
            }
        }

        debug!(
            "Computing convolution functions for field {} (pointing offset {:?})",
            vb.field_id, vb.pointing_offset
        );
        let bundle = Arc::new(self.make_bundle(geometry, grid, vb)?);
        self.cache = Some((key, Arc::clone(&bundle)));
        Ok(bundle)
    }

    fn changed(&self, vb: &VisBuffer) -> bool {
        match &self.cache {
            Some((key, _)) => {
                key.field_id != vb.field_id
                    || key.pointing
                        != (vb.pointing_offset.0.to_bits(), vb.pointing_offset.1.to_bits())
                    || key.freqs.len() != vb.freqs_hz.len()
                    || key
                        .freqs
                        .iter()
                        .zip(vb.freqs_hz.iter())
                        .any(|(a, b)| *a != b.to_bits())
            }
            None => true,
        }
    }

    fn reset(&mut self) {
        self.cache = None;
    }
}
