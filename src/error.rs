// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all hypergrid-related errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HypergridError {
    #[error("{0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("{0}")]
    Vis(#[from] crate::vis::VisIterError),

    #[error("{0}")]
    Image(#[from] crate::image::ImageStoreError),

    #[error("{0}")]
    ConvFunc(#[from] crate::conv_func::ConvFuncError),

    #[error("{0}")]
    Grid(#[from] crate::gridder::GridError),

    #[error("{0}")]
    Slicer(#[from] crate::slicer::SlicerError),

    #[error("{0}")]
    Normalization(#[from] crate::normalization::NormalizationError),

    #[error("{0}")]
    SkyEquation(#[from] crate::sky_equation::SkyEquationError),
}
