// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Convolution functions used to grid and degrid visibilities.
//!
//! A [`ConvFuncProvider`] hands out [`ConvFuncBundle`]s for a visibility
//! buffer. Bundles are shared behind an [`Arc`] and never mutated; when the
//! antenna response changes, a provider makes a new bundle.

mod error;
mod gaussian;
#[cfg(test)]
mod tests;

pub use error::ConvFuncError;
pub use gaussian::GaussianPbConvFunc;

use std::sync::Arc;

use marlu::c32;
use ndarray::prelude::*;

use crate::{constants::*, image::ImageGeometry, vis::VisBuffer};

/// The size of the Fourier grid an image is gridded onto, along with the
/// image's pixel sizes. Together these give the uv cell size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridShape {
    pub nx: usize,
    pub ny: usize,
    /// \[radians\]
    pub cell_x: f64,
    /// \[radians\]
    pub cell_y: f64,
}

impl GridShape {
    /// The size of a grid cell \[wavelengths\].
    pub fn uv_cell(&self) -> (f64, f64) {
        (
            1.0 / (self.nx as f64 * self.cell_x),
            1.0 / (self.ny as f64 * self.cell_y),
        )
    }
}

/// Oversampled convolution kernels along with the maps that say which kernel
/// applies to a visibility sample.
#[derive(Debug, Clone)]
pub struct ConvFuncBundle {
    /// Gridding kernels, indexed by (x, y, pol, chan, plane). The centre tap
    /// of each plane is at `(conv_size / 2, conv_size / 2)`.
    pub conv: ArcArray<c32, Ix5>,

    /// Kernels used to grid weights into the sky-coverage image. Same shape
    /// as `conv`.
    pub weight_conv: ArcArray<c32, Ix5>,

    /// For each visibility row, the kernel plane to use.
    pub row_map: Vec<usize>,

    /// For each visibility channel, the kernel channel to use.
    pub chan_map: Vec<usize>,

    /// For each visibility correlation, the kernel polarisation to use.
    pub pol_map: Vec<usize>,

    /// Kernel half-width \[grid cells\].
    pub support: usize,

    /// The number of kernel samples per grid cell.
    pub sampling: usize,
}

impl ConvFuncBundle {
    /// A bundle that grids nothing. Gridding and degridding skip buffers
    /// that get one of these.
    pub fn empty(sampling: usize) -> ConvFuncBundle {
        ConvFuncBundle {
            conv: Array5::zeros((0, 0, 0, 0, 0)).into_shared(),
            weight_conv: Array5::zeros((0, 0, 0, 0, 0)).into_shared(),
            row_map: vec![],
            chan_map: vec![],
            pol_map: vec![],
            support: 0,
            sampling,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conv.is_empty()
    }

    /// The number of taps along each side of a kernel plane.
    pub fn conv_size(&self) -> usize {
        self.conv.len_of(Axis(0))
    }

    /// The number of polarisations the kernels distinguish.
    pub fn num_pols(&self) -> usize {
        self.conv.len_of(Axis(2))
    }

    /// The smallest kernel plane that can hold `support` and `sampling`.
    pub fn required_conv_size(support: usize, sampling: usize) -> usize {
        2 * (support * sampling + sampling / 2) + 1
    }

    /// Check that the kernels and maps are usable with `vb`.
    pub fn validate(&self, vb: &VisBuffer) -> Result<(), ConvFuncError> {
        if self.is_empty() {
            return Ok(());
        }
        if self.sampling == 0 {
            return Err(ConvFuncError::ZeroSampling);
        }
        let (sx, sy, npol, nchan, nplane) = self.conv.dim();
        let required = Self::required_conv_size(self.support, self.sampling);
        if sx != sy || sx < required {
            return Err(ConvFuncError::KernelTooSmall {
                got: (sx, sy),
                required,
            });
        }
        if self.weight_conv.dim() != self.conv.dim() {
            return Err(ConvFuncError::WeightKernelShape {
                conv: format!("{:?}", self.conv.dim()),
                weight: format!("{:?}", self.weight_conv.dim()),
            });
        }
        let check = |name: &'static str, map: &[usize], len: usize, bound: usize| {
            if map.len() != len {
                return Err(ConvFuncError::BadMapLength {
                    map: name,
                    expected: len,
                    got: map.len(),
                });
            }
            if let Some(&bad) = map.iter().find(|&&i| i >= bound) {
                return Err(ConvFuncError::BadMapIndex {
                    map: name,
                    index: bad,
                    bound,
                });
            }
            Ok(())
        };
        check("row", &self.row_map, vb.num_rows(), nplane)?;
        check("channel", &self.chan_map, vb.num_chans(), nchan)?;
        check("polarisation", &self.pol_map, vb.num_corrs(), npol)?;
        Ok(())
    }
}

/// The convolution-function oversampling for an image: plenty for small
/// images, less as they grow.
pub fn conv_sampling(nx: usize, ny: usize) -> usize {
    let n = nx.max(ny);
    if n < SMALL_IMAGE_PIXELS {
        SMALL_IMAGE_CONV_SAMPLING
    } else {
        ((CONV_SAMPLING_NUMERATOR as f64 / n as f64).ceil() as usize).max(1)
    }
}

/// Something that makes convolution functions.
pub trait ConvFuncProvider: Send + Sync {
    /// Get the kernels for a visibility buffer. Implementations may return a
    /// cached bundle if nothing relevant changed since the last call.
    fn find_conv_function(
        &mut self,
        geometry: &ImageGeometry,
        grid: GridShape,
        vb: &VisBuffer,
    ) -> Result<Arc<ConvFuncBundle>, ConvFuncError>;

    /// Would `vb` need different kernels to the cached ones?
    fn changed(&self, vb: &VisBuffer) -> bool;

    /// Forget any cached kernels.
    fn reset(&mut self);
}

/// A single unit tap: each visibility lands in exactly one grid cell.
#[derive(Debug, Clone, Default)]
pub struct PillboxConvFunc;

impl ConvFuncProvider for PillboxConvFunc {
    fn find_conv_function(
        &mut self,
        _geometry: &ImageGeometry,
        _grid: GridShape,
        vb: &VisBuffer,
    ) -> Result<Arc<ConvFuncBundle>, ConvFuncError> {
        let unit = Array5::from_elem((1, 1, 1, 1, 1), c32::new(1.0, 0.0)).into_shared();
        Ok(Arc::new(ConvFuncBundle {
            conv: unit.clone(),
            weight_conv: unit,
            row_map: vec![0; vb.num_rows()],
            chan_map: vec![0; vb.num_chans()],
            pol_map: vec![0; vb.num_corrs()],
            support: 0,
            sampling: 1,
        }))
    }

    fn changed(&self, _vb: &VisBuffer) -> bool {
        false
    }

    fn reset(&mut self) {}
}
