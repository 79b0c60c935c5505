// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvFuncError {
    #[error("Convolution-function oversampling must be at least 1")]
    ZeroSampling,

    #[error("Convolution-function planes are {got:?} taps, but need to be square and at least {required} taps on a side")]
    KernelTooSmall {
        got: (usize, usize),
        required: usize,
    },

    #[error("Weight convolution functions have shape {weight}, but the gridding ones have shape {conv}")]
    WeightKernelShape { conv: String, weight: String },

    #[error("The convolution-function {map} map has {got} entries, expected {expected}")]
    BadMapLength {
        map: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("The convolution-function {map} map refers to index {index}, but there are only {bound}")]
    BadMapIndex {
        map: &'static str,
        index: usize,
        bound: usize,
    },

    #[error("Primary-beam FWHM must be positive and finite; got {0} radians")]
    BadFwhm(f64),

    #[error("Couldn't allocate {need_gib} GiB for convolution functions")]
    InsufficientMemory { need_gib: usize },

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}
