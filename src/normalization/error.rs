// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::slicer::SlicerError;

#[derive(Error, Debug)]
pub enum NormalizationError {
    #[error("The PSF peak is {peak}; nothing useful was gridded (Stokes plane {pol}, channel {chan})")]
    NonPositivePsfPeak { peak: f32, pol: usize, chan: usize },

    #[error("Can't normalise: the {what} has shape {received}, expected {expected}")]
    BadShape {
        what: &'static str,
        expected: String,
        received: String,
    },

    #[error("Sault weighting needs 0 < min_pb <= const_pb <= 1; got const_pb {const_pb}, min_pb {min_pb}")]
    BadSault { const_pb: f64, min_pb: f64 },

    #[error("{0}")]
    Slicer(#[from] SlicerError),
}
