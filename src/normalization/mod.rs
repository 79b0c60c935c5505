// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Turning gridded images into something with sensible units.
//!
//! PSF planes are scaled to unit peak. Residual images are divided by their
//! sums of weights and then by the sky-coverage (weight) image, either
//! directly or with Sault weighting. Pixels with too little coverage are
//! zeroed rather than divided.

mod error;

pub use error::NormalizationError;

use log::{debug, info, warn};
use ndarray::prelude::*;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    config::{FluxScaleScheme, GridderConfig},
    image::ImageStore,
    slicer::{plane, plane_mut},
};

/// How the weight image is applied to residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, EnumString)]
pub enum NormType {
    /// Divide by the square root of the coverage; the noise is uniform.
    #[default]
    #[strum(serialize = "flatnoise")]
    FlatNoise,

    /// Divide by the coverage; sources have their true flux density.
    #[strum(serialize = "flatsky")]
    FlatSky,
}

fn check_shape(
    what: &'static str,
    expected: (usize, usize, usize, usize),
    received: (usize, usize, usize, usize),
) -> Result<(), NormalizationError> {
    if expected == received {
        Ok(())
    } else {
        Err(NormalizationError::BadShape {
            what,
            expected: format!("{expected:?}"),
            received: format!("{received:?}"),
        })
    }
}

fn plane_peak(p: ArrayView2<f32>) -> f32 {
    p.iter().copied().fold(f32::NEG_INFINITY, f32::max)
}

/// Scale every (Stokes plane, channel) plane of `psf` to a unit peak. Planes
/// whose peak isn't positive are left alone.
///
/// Returns the peaks before scaling, indexed by (Stokes plane, channel).
pub fn normalize_psf(mut psf: ArrayViewMut4<f32>) -> Result<Array2<f32>, NormalizationError> {
    let (_, _, npol, nchan) = psf.dim();
    let mut peaks = Array2::zeros((npol, nchan));
    for pol in 0..npol {
        for chan in 0..nchan {
            let mut p = plane_mut(psf.view_mut(), pol, chan)?;
            let peak = plane_peak(p.view());
            peaks[(pol, chan)] = peak;
            if peak > 0.0 {
                p.mapv_inplace(|v| v / peak);
            } else {
                info!("Skipping normalisation of PSF plane (Stokes {pol}, channel {chan}); its peak is {peak}");
            }
        }
    }
    Ok(peaks)
}

/// Check the PSF peaks found by [`normalize_psf`]. A PSF without a positive
/// peak means nothing was gridded, which is fatal for single-term imaging.
/// Multi-term residual PSFs can legitimately have non-positive peaks.
pub fn check_psf_peak(
    peaks: ArrayView2<f32>,
    num_taylor_terms: usize,
) -> Result<(), NormalizationError> {
    let Some(((pol, chan), &peak)) = peaks
        .indexed_iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
    else {
        return Ok(());
    };
    if peak > 0.0 {
        return Ok(());
    }
    if num_taylor_terms > 1 {
        info!("The PSF peak is {peak}; this is expected for higher-order Taylor terms");
        return Ok(());
    }
    Err(NormalizationError::NonPositivePsfPeak { peak, pol, chan })
}

/// The factor that brings a weight plane to a unit-peak primary beam: the
/// square root of the plane's peak.
pub fn pb_scale_factor(weight: ArrayView2<f32>) -> f32 {
    let peak = plane_peak(weight);
    if peak > 0.0 {
        peak.sqrt()
    } else {
        0.0
    }
}

/// Divide `image` by the `weight` image, plane by plane.
///
/// For [`NormType::FlatNoise`] the denominator is `sqrt(|weight|)` times the
/// plane's [`pb_scale_factor`]; for [`NormType::FlatSky`] it's the weight
/// itself. Only pixels whose denominator exceeds `pb_limit` times the square
/// of the scale factor are divided; the rest are zeroed. Planes whose weight
/// is exactly 1 everywhere are left alone.
///
/// Returns whether any plane was divided.
pub fn divide_by_weight(
    mut image: ArrayViewMut4<f32>,
    weight: ArrayView4<f32>,
    pb_limit: f64,
    norm_type: NormType,
) -> Result<bool, NormalizationError> {
    check_shape("weight image", image.dim(), weight.dim())?;
    let (_, _, npol, nchan) = image.dim();
    let pb_limit = pb_limit as f32;
    let mut divided = false;

    for pol in 0..npol {
        for chan in 0..nchan {
            let w = plane(weight, pol, chan)?;
            if w.iter().all(|&v| v == 1.0) {
                continue;
            }
            let scale = pb_scale_factor(w);
            let threshold = (pb_limit * scale * scale).abs();
            let mut p = plane_mut(image.view_mut(), pol, chan)?;
            p.zip_mut_with(&w, |v, &w| {
                let deno = match norm_type {
                    NormType::FlatNoise => w.abs().sqrt() * scale,
                    NormType::FlatSky => w,
                };
                *v = if deno > threshold { *v / deno } else { 0.0 };
            });
            divided = true;
        }
    }

    if divided {
        debug!("Divided by the weight image ({norm_type})");
    } else {
        info!("No normalisation by the weight image was needed");
    }
    Ok(divided)
}

/// Divide every plane of `image` by its sum of weights. Planes with no
/// weight are zeroed.
pub fn divide_by_sum_weights(
    mut image: ArrayViewMut4<f32>,
    sumwt: ArrayView2<f64>,
) -> Result<(), NormalizationError> {
    let (nx, ny, npol, nchan) = image.dim();
    if sumwt.dim() != (npol, nchan) {
        return Err(NormalizationError::BadShape {
            what: "sum of weights",
            expected: format!("{:?}", (npol, nchan)),
            received: format!("{:?}", sumwt.dim()),
        });
    }
    for ((pol, chan), &w) in sumwt.indexed_iter() {
        let mut p = plane_mut(image.view_mut(), pol, chan)?;
        if w == 0.0 {
            warn!("Stokes plane {pol}, channel {chan} has no weight; zeroing {nx}x{ny} pixels");
            p.fill(0.0);
        } else {
            let w = w as f32;
            p.mapv_inplace(|v| v / w);
        }
    }
    Ok(())
}

/// The Sault flux scale of a pixel with weight `w`, given the floors
/// `gg_s_min1` (full flux) and `gg_s_min2` (no flux).
#[inline]
pub fn sault_flux_scale(w: f32, gg_s_min1: f32, gg_s_min2: f32) -> f32 {
    if w < gg_s_min2 {
        0.0
    } else if w < gg_s_min1 {
        (w / gg_s_min1).sqrt()
    } else {
        1.0
    }
}

/// Sault weighting. Pixels of `weight` below `gg_s_max * min_pb^2` get no
/// flux, those above `gg_s_max * const_pb^2` get all of it, and those in
/// between are tapered. The weight is then floored at
/// `gg_s_max * const_pb^2`.
///
/// Returns the flux-scale image.
pub fn sault_clamp(
    mut weight: ArrayViewMut4<f32>,
    gg_s_max: f32,
    const_pb: f64,
    min_pb: f64,
) -> Result<Array4<f32>, NormalizationError> {
    if !(min_pb > 0.0 && min_pb <= const_pb && const_pb <= 1.0) {
        return Err(NormalizationError::BadSault { const_pb, min_pb });
    }
    let gg_s_min1 = gg_s_max * (const_pb * const_pb) as f32;
    let gg_s_min2 = gg_s_max * (min_pb * min_pb) as f32;
    let flux_scale = weight.map(|&w| sault_flux_scale(w, gg_s_min1, gg_s_min2));
    weight.mapv_inplace(|w| w.max(gg_s_min1));
    debug!("Sault weighting: floors {gg_s_min1} (full flux) and {gg_s_min2} (no flux)");
    Ok(flux_scale)
}

/// Wide-band normalisation: `image / sqrt(weight)` wherever the weight is
/// above `pb_limit` times its plane's peak, zero elsewhere.
pub fn wb_normalize(
    mut image: ArrayViewMut4<f32>,
    weight: ArrayView4<f32>,
    pb_limit: f64,
) -> Result<(), NormalizationError> {
    check_shape("weight image", image.dim(), weight.dim())?;
    let (_, _, npol, nchan) = image.dim();
    for pol in 0..npol {
        for chan in 0..nchan {
            let w = plane(weight, pol, chan)?;
            let threshold = pb_limit as f32 * plane_peak(w).max(0.0);
            plane_mut(image.view_mut(), pol, chan)?.zip_mut_with(&w, |v, &gg| {
                *v = if gg > threshold && gg > 0.0 {
                    *v / gg.sqrt()
                } else {
                    0.0
                };
            });
        }
    }
    Ok(())
}

/// Normalise the residual image of `store` after gridding: divide by the sums
/// of weights, then apply the sky coverage the way `config` says.
///
/// Returns whether the residual was divided by the coverage.
pub fn normalize_residual(
    store: &mut dyn ImageStore,
    config: &GridderConfig,
) -> Result<bool, NormalizationError> {
    let sumwt = store.sumwt().to_owned();
    divide_by_sum_weights(store.residual_mut(), sumwt.view())?;

    // The coverage is in the same units as the un-normalised residual.
    let mut weight = store.weight().to_owned();
    divide_by_sum_weights(weight.view_mut(), sumwt.view())?;

    match config.flux_scale {
        FluxScaleScheme::PbDivide => divide_by_weight(
            store.residual_mut(),
            weight.view(),
            config.pb_limit,
            config.norm_type(),
        ),

        FluxScaleScheme::Sault { const_pb, min_pb } => {
            let gg_s_max = weight.iter().copied().fold(0.0, f32::max);
            let flux_scale = sault_clamp(weight.view_mut(), gg_s_max, const_pb, min_pb)?;
            let mut residual = store.residual_mut();
            ndarray::Zip::from(&mut residual)
                .and(&weight)
                .and(&flux_scale)
                .for_each(|r, &w, &f| {
                    *r = if f > 0.0 && w > 0.0 { *r / w } else { 0.0 };
                });
            store.flux_scale_mut().assign(&flux_scale);
            Ok(true)
        }
    }
}
