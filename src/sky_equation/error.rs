// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from driving gridding over a visibility stream.

use thiserror::Error;

use crate::{
    config::ConfigError, gridder::GridError, image::ImageStoreError,
    normalization::NormalizationError, slicer::SlicerError, vis::VisIterError,
};

#[derive(Error, Debug)]
pub enum SkyEquationError {
    #[error("Imaging was cancelled")]
    Cancelled,

    #[error("No fields were given to image")]
    NoFields,

    #[error("Field {field} has {got} channels, but field 0 has {expected}; all fields must share a spectral axis")]
    MismatchedFields {
        field: usize,
        expected: usize,
        got: usize,
    },

    #[error("While gridding cube slice {slice} (channels {begin}..={end}): {err}")]
    Gridding {
        slice: usize,
        begin: usize,
        end: usize,
        err: GridError,
    },

    #[error("While normalising field {field}: {err}")]
    Normalization {
        field: usize,
        err: NormalizationError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Slicer(#[from] SlicerError),

    #[error(transparent)]
    Vis(#[from] VisIterError),

    #[error(transparent)]
    Image(#[from] ImageStoreError),

    #[error(transparent)]
    Grid(#[from] GridError),
}
