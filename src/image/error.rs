// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use super::{stokes::StokesType, ImageType};

#[derive(Error, Debug)]
pub enum ImageStoreError {
    #[error("Image has no pixels or channels (shape {shape})")]
    EmptyImage { shape: String },

    #[error("Image cell sizes must be positive; got {cell_x} x {cell_y} radians")]
    BadCellSize { cell_x: f64, cell_y: f64 },

    #[error("Image channel width must be non-zero; got {0} Hz")]
    BadChannelWidth(f64),

    #[error("The {image} image has shape {received}, expected {expected}")]
    BadArrayShape {
        image: ImageType,
        expected: String,
        received: String,
    },
}

#[derive(Error, Debug)]
pub enum StokesError {
    #[error("Cannot make Stokes {stokes} images from correlations {correlations:?}")]
    Unsupported {
        stokes: StokesType,
        correlations: Vec<String>,
    },
}
