// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mapping between visibility correlations, grid planes and Stokes images.
//!
//! Every correlation needed by the requested Stokes parameters gets its own
//! grid plane, except for Stokes I alone, where both parallel hands are
//! gridded into the same plane.

use log::warn;
use marlu::c32;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use super::StokesError;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
pub enum Correlation {
    XX,
    XY,
    YX,
    YY,
    RR,
    RL,
    LR,
    LL,
}

impl Correlation {
    fn is_linear(self) -> bool {
        matches!(
            self,
            Correlation::XX | Correlation::XY | Correlation::YX | Correlation::YY
        )
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
pub enum StokesType {
    #[default]
    I,
    Q,
    U,
    V,
    IV,
    QU,
    IQ,
    IQUV,
    RRLL,
    XXYY,
}

/// A single output plane of a [`StokesType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Param {
    I,
    Q,
    U,
    V,
    /// A correlation imaged directly.
    Corr(Correlation),
}

impl StokesType {
    fn params(self) -> Vec<Param> {
        use Param::*;
        match self {
            StokesType::I => vec![I],
            StokesType::Q => vec![Q],
            StokesType::U => vec![U],
            StokesType::V => vec![V],
            StokesType::IV => vec![I, V],
            StokesType::QU => vec![Q, U],
            StokesType::IQ => vec![I, Q],
            StokesType::IQUV => vec![I, Q, U, V],
            StokesType::RRLL => vec![Corr(Correlation::RR), Corr(Correlation::LL)],
            StokesType::XXYY => vec![Corr(Correlation::XX), Corr(Correlation::YY)],
        }
    }

    /// The number of image planes.
    pub fn num_planes(self) -> usize {
        self.params().len()
    }
}

/// How to combine correlations into a Stokes parameter: (correlation,
/// coefficient) pairs. The inverse is in [`param_to_corr`].
fn param_from_corrs(param: Param, linear: bool) -> Vec<(Correlation, c32)> {
    use Correlation::*;
    let h = c32::new(0.5, 0.0);
    let ih = c32::new(0.0, 0.5);
    match (param, linear) {
        (Param::I, true) => vec![(XX, h), (YY, h)],
        (Param::Q, true) => vec![(XX, h), (YY, -h)],
        (Param::U, true) => vec![(XY, h), (YX, h)],
        (Param::V, true) => vec![(XY, -ih), (YX, ih)],
        (Param::I, false) => vec![(RR, h), (LL, h)],
        (Param::V, false) => vec![(RR, h), (LL, -h)],
        (Param::Q, false) => vec![(RL, h), (LR, h)],
        (Param::U, false) => vec![(RL, -ih), (LR, ih)],
        (Param::Corr(c), _) => vec![(c, c32::new(1.0, 0.0))],
    }
}

/// The contribution of a unit Stokes parameter to a correlation.
fn param_to_corr(param: Param, corr: Correlation) -> c32 {
    use Correlation::*;
    let one = c32::new(1.0, 0.0);
    let i = c32::new(0.0, 1.0);
    let zero = c32::new(0.0, 0.0);
    match (param, corr) {
        (Param::I, XX | YY | RR | LL) => one,
        (Param::Q, XX) => one,
        (Param::Q, YY) => -one,
        (Param::U, XY | YX) => one,
        (Param::V, XY) => i,
        (Param::V, YX) => -i,
        (Param::V, RR) => one,
        (Param::V, LL) => -one,
        (Param::Q, RL | LR) => one,
        (Param::U, RL) => i,
        (Param::U, LR) => -i,
        (Param::Corr(c), d) if c == d => one,
        _ => zero,
    }
}

/// The grid layout for a Stokes type and a set of visibility correlations.
#[derive(Debug, Clone, PartialEq)]
pub struct StokesPlan {
    stokes: StokesType,

    /// The correlation gridded into each grid plane. For Stokes I alone this
    /// is the first parallel hand, but both hands share the plane.
    plane_corrs: Vec<Correlation>,

    /// For each visibility correlation, the grid plane it's gridded into.
    pol_map: Vec<Option<usize>>,

    /// For each Stokes plane, (grid plane, coefficient) pairs.
    to_stokes: Vec<Vec<(usize, c32)>>,
}

impl StokesPlan {
    pub fn new(stokes: StokesType, vis_corrs: &[Correlation]) -> Result<StokesPlan, StokesError> {
        let unsupported = || StokesError::Unsupported {
            stokes,
            correlations: vis_corrs.iter().map(|c| c.to_string()).collect(),
        };
        let has_linear = vis_corrs.iter().any(|c| c.is_linear());
        let has_circular = vis_corrs.iter().any(|c| !c.is_linear());
        let linear = match (has_linear, has_circular) {
            (true, false) => true,
            (false, true) => false,
            _ => return Err(unsupported()),
        };

        // Stokes I alone: both parallel hands go into one plane.
        if stokes == StokesType::I {
            let (a, b) = if linear {
                (Correlation::XX, Correlation::YY)
            } else {
                (Correlation::RR, Correlation::LL)
            };
            let pol_map: Vec<Option<usize>> = vis_corrs
                .iter()
                .map(|&c| if c == a || c == b { Some(0) } else { None })
                .collect();
            if pol_map.iter().all(|p| p.is_none()) {
                return Err(unsupported());
            }
            if pol_map.iter().filter(|p| p.is_some()).count() == 1 {
                warn!("Only one parallel-hand correlation is available to make Stokes I");
            }
            return Ok(StokesPlan {
                stokes,
                plane_corrs: vec![a],
                pol_map,
                to_stokes: vec![vec![(0, c32::new(1.0, 0.0))]],
            });
        }

        let params = stokes.params();
        let needed: Vec<Vec<(Correlation, c32)>> = params
            .iter()
            .map(|&p| param_from_corrs(p, linear))
            .collect();
        // Grid planes in the order the correlations appear in the data.
        let plane_corrs: Vec<Correlation> = vis_corrs
            .iter()
            .copied()
            .filter(|c| needed.iter().flatten().any(|(n, _)| n == c))
            .collect();
        let mut to_stokes = Vec::with_capacity(params.len());
        for combo in &needed {
            let mut terms = Vec::with_capacity(combo.len());
            for (corr, coeff) in combo {
                let plane = plane_corrs
                    .iter()
                    .position(|c| c == corr)
                    .ok_or_else(unsupported)?;
                terms.push((plane, *coeff));
            }
            to_stokes.push(terms);
        }
        let pol_map = vis_corrs
            .iter()
            .map(|c| plane_corrs.iter().position(|p| p == c))
            .collect();

        Ok(StokesPlan {
            stokes,
            plane_corrs,
            pol_map,
            to_stokes,
        })
    }

    pub fn stokes(&self) -> StokesType {
        self.stokes
    }

    /// The number of planes on the Fourier grid.
    pub fn num_grid_planes(&self) -> usize {
        self.plane_corrs.len()
    }

    pub fn num_stokes_planes(&self) -> usize {
        self.to_stokes.len()
    }

    /// For each visibility correlation, the grid plane it's gridded into (if
    /// any).
    pub fn pol_map(&self) -> &[Option<usize>] {
        &self.pol_map
    }

    /// Convert a complex (x, y, grid plane, chan) image into real Stokes
    /// planes.
    pub fn correlation_to_stokes(&self, image: ArrayView4<c32>) -> Array4<f32> {
        let (nx, ny, _, nchan) = image.dim();
        let mut out = Array4::zeros((nx, ny, self.num_stokes_planes(), nchan));
        for (i_stokes, terms) in self.to_stokes.iter().enumerate() {
            let mut out_plane = out.index_axis_mut(Axis(2), i_stokes);
            for &(i_plane, coeff) in terms {
                let in_plane = image.index_axis(Axis(2), i_plane);
                out_plane.zip_mut_with(&in_plane, |o, &v| *o += (v * coeff).re);
            }
        }
        out
    }

    /// Convert real Stokes planes into a complex (x, y, grid plane, chan)
    /// image suitable for degridding.
    pub fn stokes_to_correlation(&self, image: ArrayView4<f32>) -> Array4<c32> {
        let (nx, ny, _, nchan) = image.dim();
        let mut out = Array4::zeros((nx, ny, self.num_grid_planes(), nchan));
        if self.stokes == StokesType::I {
            out.index_axis_mut(Axis(2), 0)
                .zip_mut_with(&image.index_axis(Axis(2), 0), |o, &v| {
                    *o = c32::new(v, 0.0)
                });
            return out;
        }
        let params = self.stokes.params();
        for (i_plane, &corr) in self.plane_corrs.iter().enumerate() {
            let mut out_plane = out.index_axis_mut(Axis(2), i_plane);
            for (i_stokes, &param) in params.iter().enumerate() {
                let coeff = param_to_corr(param, corr);
                if coeff.norm_sqr() == 0.0 {
                    continue;
                }
                let in_plane = image.index_axis(Axis(2), i_stokes);
                out_plane.zip_mut_with(&in_plane, |o, &v| *o += coeff * v);
            }
        }
        out
    }

    /// Turn a complex (x, y, grid plane, chan) coverage image into a real
    /// weight image per Stokes plane. If the convolution functions only
    /// know about one polarisation, or there's only one grid plane, the
    /// coverage of grid plane 0 is used for every Stokes plane. Otherwise each
    /// Stokes plane gets the mean coverage of the planes it's made from.
    pub fn coverage_to_stokes(&self, coverage: ArrayView4<c32>, kernel_num_pols: usize) -> Array4<f32> {
        let (nx, ny, _, nchan) = coverage.dim();
        let mut out = Array4::zeros((nx, ny, self.num_stokes_planes(), nchan));
        if kernel_num_pols <= 1 || self.num_grid_planes() == 1 {
            let plane0 = coverage.index_axis(Axis(2), 0);
            for mut out_plane in out.axis_iter_mut(Axis(2)) {
                out_plane.zip_mut_with(&plane0, |o, v| *o = v.re);
            }
            return out;
        }
        for (i_stokes, terms) in self.to_stokes.iter().enumerate() {
            let mut out_plane = out.index_axis_mut(Axis(2), i_stokes);
            let n = terms.len() as f32;
            for &(i_plane, _) in terms {
                out_plane.zip_mut_with(&coverage.index_axis(Axis(2), i_plane), |o, v| {
                    *o += v.re / n
                });
            }
        }
        out
    }

    /// Turn sums of weights per grid plane (pol, chan) into sums per Stokes
    /// plane: the mean of the grid planes each Stokes plane is made from.
    pub fn sum_weights_to_stokes(&self, sumwt: ArrayView2<f64>) -> Array2<f64> {
        let nchan = sumwt.len_of(Axis(1));
        let mut out = Array2::zeros((self.num_stokes_planes(), nchan));
        for (i_stokes, terms) in self.to_stokes.iter().enumerate() {
            let n = terms.len() as f64;
            for &(i_plane, _) in terms {
                out.row_mut(i_stokes)
                    .zip_mut_with(&sumwt.row(i_plane), |o, &w| *o += w / n);
            }
        }
        out
    }
}
