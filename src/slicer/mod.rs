// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Splitting image cubes so that they can be gridded in the memory available.
//!
//! Gridding a cube keeps many image-sized buffers alive at once, so big cubes
//! are gridded a few channels at a time. [`compute_slice_count`] decides how
//! many channels go in each slice and [`slice_channel_range`] says which
//! channels those are. [`sub_image`] and [`sub_image_mut`] give views onto
//! facets, channel chunks and polarisation chunks of an image without
//! copying.

mod error;

pub use error::SlicerError;

use std::ops::Range;

use log::{debug, trace};
use ndarray::prelude::*;

#[cfg(target_pointer_width = "32")]
use crate::constants::MAX_MEMORY_KIB_32_BIT;
use crate::{
    config::GridderConfig,
    constants::{MEMORY_FAN_OUT, MIN_MEMORY_KIB},
};

/// How an image cube is split along its channel axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CubeSlicing {
    /// Always at least 1.
    pub num_slices: usize,

    /// Every slice but the last has exactly this many channels.
    pub chans_per_slice: usize,

    pub num_chans: usize,
}

/// One slice of a cube: channels `begin..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CubeSlice {
    pub index: usize,
    pub begin: usize,
    pub end: usize,
}

impl CubeSlice {
    pub fn num_chans(&self) -> usize {
        self.end - self.begin + 1
    }

    /// The slice's channels as a half-open range.
    pub fn range(&self) -> Range<usize> {
        self.begin..self.end + 1
    }
}

impl CubeSlicing {
    /// Don't slice at all. A cube without channels has no slices.
    pub fn whole(num_chans: usize) -> CubeSlicing {
        CubeSlicing {
            num_slices: if num_chans == 0 { 0 } else { 1 },
            chans_per_slice: num_chans.max(1),
            num_chans,
        }
    }

    pub fn slice(&self, index: usize) -> Result<CubeSlice, SlicerError> {
        slice_channel_range(index, self)
    }

    /// Every slice, in order.
    pub fn slices(&self) -> impl Iterator<Item = CubeSlice> + '_ {
        (0..self.num_slices).filter_map(move |i| self.slice(i).ok())
    }
}

/// Work out how many channel slices an image of `shape` (x, y, Stokes plane,
/// channel) has to be gridded in, given `available_kib` of memory.
///
/// # Errors
///
/// Fails if there's less than [`MIN_MEMORY_KIB`] of memory, unless the image
/// has a single channel, which is never sliced. An image without channels
/// has no slices.
pub fn compute_slice_count(
    shape: (usize, usize, usize, usize),
    available_kib: u64,
) -> Result<CubeSlicing, SlicerError> {
    let (nx, ny, npol, nchan) = shape;
    if nchan <= 1 {
        return Ok(CubeSlicing::whole(nchan));
    }

    cfg_if::cfg_if! {
        if #[cfg(target_pointer_width = "32")] {
            let mem_kib = available_kib.min(MAX_MEMORY_KIB_32_BIT);
            if mem_kib < available_kib {
                debug!("Capping memory at {MAX_MEMORY_KIB_32_BIT} KiB on a 32-bit target");
            }
        } else {
            let mem_kib = available_kib;
        }
    }
    if mem_kib < MIN_MEMORY_KIB {
        return Err(SlicerError::NotEnoughMemory {
            available_kib: mem_kib,
            min_kib: MIN_MEMORY_KIB,
        });
    }

    let pix_in_mem = mem_kib / 8 * 1024;
    let budget = pix_in_mem / MEMORY_FAN_OUT;
    let plane_pix = (nx * ny * npol).max(1) as u64;
    let cube_pix = plane_pix * nchan as u64;
    let chans_per_slice = if cube_pix > budget {
        ((budget / plane_pix).max(1) as usize).min(nchan)
    } else {
        nchan
    };
    let num_slices = nchan.div_ceil(chans_per_slice);
    debug!(
        "Gridding {nchan} channels in {num_slices} slice(s) of up to {chans_per_slice} channels ({mem_kib} KiB available)"
    );
    Ok(CubeSlicing {
        num_slices,
        chans_per_slice,
        num_chans: nchan,
    })
}

/// The channels (inclusive) of slice `index`. The last slice stops at the last
/// channel.
pub fn slice_channel_range(index: usize, slicing: &CubeSlicing) -> Result<CubeSlice, SlicerError> {
    if index >= slicing.num_slices {
        return Err(SlicerError::BadSliceIndex {
            index,
            num_slices: slicing.num_slices,
        });
    }
    let last = slicing.num_chans.saturating_sub(1);
    let begin = (index * slicing.chans_per_slice).min(last);
    let end = if index + 1 == slicing.num_slices {
        last
    } else {
        (begin + slicing.chans_per_slice - 1).min(last)
    };
    trace!("Cube slice {index} is channels {begin}..={end}");
    Ok(CubeSlice { index, begin, end })
}

/// The total physical memory of this machine \[KiB\].
pub fn total_memory_kib() -> u64 {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    sys.total_memory() / 1024
}

/// The memory to budget for: the configured amount, or all of it.
pub fn memory_budget_kib(config: &GridderConfig) -> u64 {
    config.memory_kib.unwrap_or_else(total_memory_kib)
}

/// Chunk `index` of `count` along an axis of `len` pixels. The last chunk
/// gets the remainder.
fn chunk(
    what: &'static str,
    index: usize,
    count: usize,
    len: usize,
) -> Result<Range<usize>, SlicerError> {
    if index >= count {
        return Err(SlicerError::BadSubImageIndex { what, index, count });
    }
    if count > len {
        return Err(SlicerError::TooManyChunks { what, count, len });
    }
    let size = len / count;
    let start = index * size;
    let end = if index + 1 == count { len } else { start + size };
    Ok(start..end)
}

/// The x, y, Stokes and channel ranges of a sub-image.
#[allow(clippy::too_many_arguments)]
fn sub_image_ranges(
    dim: (usize, usize, usize, usize),
    facet: usize,
    num_facets: usize,
    chan: usize,
    num_chan_chunks: usize,
    pol: usize,
    num_pol_chunks: usize,
) -> Result<[Range<usize>; 4], SlicerError> {
    let (nx, ny, npol, nchan) = dim;
    let per_side = (num_facets as f64).sqrt().round() as usize;
    if per_side * per_side != num_facets {
        return Err(SlicerError::NonSquareFacets(num_facets));
    }
    if facet >= num_facets {
        return Err(SlicerError::BadSubImageIndex {
            what: "facet",
            index: facet,
            count: num_facets,
        });
    }
    Ok([
        chunk("facet", facet % per_side, per_side, nx)?,
        chunk("facet", facet / per_side, per_side, ny)?,
        chunk("polarisation", pol, num_pol_chunks, npol)?,
        chunk("channel", chan, num_chan_chunks, nchan)?,
    ])
}

/// A view of one facet, channel chunk and polarisation chunk of `image`.
///
/// Facets tile the x and y axes in a square pattern, so `num_facets` must be a
/// square number.
#[allow(clippy::too_many_arguments)]
pub fn sub_image<'a, A>(
    facet: usize,
    num_facets: usize,
    chan: usize,
    num_chan_chunks: usize,
    pol: usize,
    num_pol_chunks: usize,
    image: ArrayView4<'a, A>,
) -> Result<ArrayView4<'a, A>, SlicerError> {
    let [x, y, p, c] = sub_image_ranges(
        image.dim(),
        facet,
        num_facets,
        chan,
        num_chan_chunks,
        pol,
        num_pol_chunks,
    )?;
    Ok(image.slice_move(s![x, y, p, c]))
}

/// A mutable version of [`sub_image`].
#[allow(clippy::too_many_arguments)]
pub fn sub_image_mut<'a, A>(
    facet: usize,
    num_facets: usize,
    chan: usize,
    num_chan_chunks: usize,
    pol: usize,
    num_pol_chunks: usize,
    image: ArrayViewMut4<'a, A>,
) -> Result<ArrayViewMut4<'a, A>, SlicerError> {
    let [x, y, p, c] = sub_image_ranges(
        image.dim(),
        facet,
        num_facets,
        chan,
        num_chan_chunks,
        pol,
        num_pol_chunks,
    )?;
    Ok(image.slice_move(s![x, y, p, c]))
}

/// A view of a single (Stokes plane, channel) plane of `image`.
pub fn plane<A>(
    image: ArrayView4<A>,
    pol: usize,
    chan: usize,
) -> Result<ArrayView2<A>, SlicerError> {
    let (_, _, npol, nchan) = image.dim();
    let view = sub_image(0, 1, chan, nchan, pol, npol, image)?;
    Ok(view.index_axis_move(Axis(3), 0).index_axis_move(Axis(2), 0))
}

/// A mutable version of [`plane`].
pub fn plane_mut<A>(
    image: ArrayViewMut4<A>,
    pol: usize,
    chan: usize,
) -> Result<ArrayViewMut2<A>, SlicerError> {
    let (_, _, npol, nchan) = image.dim();
    let view = sub_image_mut(0, 1, chan, nchan, pol, npol, image)?;
    Ok(view.index_axis_move(Axis(3), 0).index_axis_move(Axis(2), 0))
}
