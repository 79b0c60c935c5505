// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlicerError {
    #[error("Only {available_kib} KiB of memory is available, but at least {min_kib} KiB is needed to grid a cube")]
    NotEnoughMemory { available_kib: u64, min_kib: u64 },

    #[error("Cube slice {index} was requested, but there are only {num_slices} slices")]
    BadSliceIndex { index: usize, num_slices: usize },

    #[error("Sub-image {what} index {index} is out of range for {count} {what}s")]
    BadSubImageIndex {
        what: &'static str,
        index: usize,
        count: usize,
    },

    #[error("The number of facets ({0}) must be a square number")]
    NonSquareFacets(usize),

    #[error("Can't split {len} pixels along the {what} axis into {count} chunks")]
    TooManyChunks {
        what: &'static str,
        count: usize,
        len: usize,
    },
}
