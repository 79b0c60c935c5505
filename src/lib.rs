// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Mosaic gridding and degridding of radio-interferometric visibilities.

Visibilities are convolved onto a regular Fourier grid with a primary-beam
kernel (and predicted back off it), image cubes are sliced along frequency to
fit in memory, and the resulting dirty images are normalised by the
accumulated sky coverage.
 */

pub mod config;
pub mod constants;
pub mod conv_func;
mod error;
pub mod ft_machine;
pub mod gridder;
pub mod image;
pub(crate) mod math;
pub mod normalization;
pub mod sky_equation;
pub mod slicer;
pub mod vis;

use crossbeam_utils::atomic::AtomicCell;

/// Draw progress bars while iterating over visibilities? Hidden by default.
pub static PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);

// Re-exports.
pub use config::{GridderConfig, Precision};
pub use conv_func::{ConvFuncBundle, ConvFuncProvider, GaussianPbConvFunc, PillboxConvFunc};
pub use error::HypergridError;
pub use ft_machine::{new_ft_machine, FtKind, FtMachine, FtMachineState, MosaicFt};
pub use gridder::{GridAccumulator, GridError, GridFloat, Rows, VisType};
pub use normalization::NormType;
pub use image::{
    stokes::{Correlation, StokesType},
    ImageGeometry, ImageStore, MemoryImageStore,
};
pub use sky_equation::{ImagingField, SkyEquation, SkyEquationError};
pub use slicer::{CubeSlice, CubeSlicing};
pub use vis::{MemoryVisIter, VisBuffer, VisIter};

// External re-exports.
pub use marlu::{c32, c64, UVW};
