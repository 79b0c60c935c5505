// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all gridding-related errors.

use thiserror::Error;

use super::GridState;
use crate::{
    conv_func::ConvFuncError,
    image::{ImageStoreError, StokesError},
    vis::VisIterError,
};

#[derive(Error, Debug)]
pub enum GridError {
    #[error("{op} was called while the grid was {state}; image requested without the right order of calls")]
    WrongState { op: &'static str, state: GridState },

    #[error("Couldn't allocate {need_gib} GiB for a Fourier grid; try slicing the cube more finely")]
    InsufficientMemory { need_gib: usize },

    #[error("Row {row} was requested, but the visibility buffer only has {num_rows} rows")]
    BadRow { row: usize, num_rows: usize },

    #[error("The visibility correlations changed from {initialised} to {got} without re-initialising the grid")]
    CorrelationsChanged { initialised: String, got: String },

    #[error("Expected an image with shape {expected}, but got {received}")]
    BadImageShape { expected: String, received: String },

    #[error("Saved gridder state has version {got}, but only up to version {supported} is supported")]
    NewerState { got: u32, supported: u32 },

    #[error("Saved gridder state doesn't match this machine: {0}")]
    MismatchedState(String),

    #[error("Couldn't read or write gridder state: {0}")]
    StateSerde(#[from] serde_json::Error),

    #[error("Couldn't build the gridding thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),

    #[error("{0}")]
    Stokes(#[from] StokesError),

    #[error("{0}")]
    ConvFunc(#[from] ConvFuncError),

    #[error("{0}")]
    Image(#[from] ImageStoreError),

    #[error("{0}")]
    Vis(#[from] VisIterError),
}
