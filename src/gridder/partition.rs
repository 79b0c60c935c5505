// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Splitting a grid into regions that threads can write to without locks.
//!
//! Every region is an exclusive view of part of the grid (and the weight
//! grid, if there is one). A thread grids every sample whose kernel
//! footprint touches its region, but only writes the taps inside it.

use ndarray::prelude::*;
use num_complex::Complex;

/// How many regions to split the grid into along x and y, given the
/// number of gridding threads.
pub(super) fn region_layout(num_threads: usize) -> (usize, usize) {
    match num_threads {
        0 | 1 => (1, 1),
        2 | 3 => (2, 1),
        _ => (2, 2),
    }
}

pub(super) struct Region<'a, T> {
    pub(super) grid: ArrayViewMut4<'a, Complex<T>>,
    pub(super) weight: Option<ArrayViewMut4<'a, Complex<T>>>,
    /// The grid cell of this region's (0, 0).
    pub(super) x0: usize,
    pub(super) y0: usize,
}

impl<'a, T> Region<'a, T> {
    /// Does this region hold grid cell (x, y)?
    #[inline]
    pub(super) fn contains(&self, x: usize, y: usize) -> bool {
        let (nx, ny, _, _) = self.grid.dim();
        x >= self.x0 && x < self.x0 + nx && y >= self.y0 && y < self.y0 + ny
    }

    /// The inclusive range of grid cells in `lo..=hi` that are in this
    /// region along `axis`; empty if `lo > hi` on return.
    #[inline]
    pub(super) fn clip(&self, axis: usize, lo: isize, hi: isize) -> (isize, isize) {
        let start = if axis == 0 { self.x0 } else { self.y0 } as isize;
        let len = self.grid.len_of(Axis(axis)) as isize;
        (lo.max(start), hi.min(start + len - 1))
    }

    fn split(self, axis: usize) -> [Region<'a, T>; 2] {
        let mid = self.grid.len_of(Axis(axis)) / 2;
        let (g1, g2) = self.grid.split_at(Axis(axis), mid);
        let (w1, w2) = match self.weight {
            Some(w) => {
                let (w1, w2) = w.split_at(Axis(axis), mid);
                (Some(w1), Some(w2))
            }
            None => (None, None),
        };
        let (dx, dy) = if axis == 0 { (mid, 0) } else { (0, mid) };
        [
            Region {
                grid: g1,
                weight: w1,
                x0: self.x0,
                y0: self.y0,
            },
            Region {
                grid: g2,
                weight: w2,
                x0: self.x0 + dx,
                y0: self.y0 + dy,
            },
        ]
    }
}

/// Carve a grid into `layout.0 * layout.1` disjoint regions.
pub(super) fn split_regions<'a, T>(
    grid: ArrayViewMut4<'a, Complex<T>>,
    weight: Option<ArrayViewMut4<'a, Complex<T>>>,
    layout: (usize, usize),
) -> Vec<Region<'a, T>> {
    let mut regions = vec![Region {
        grid,
        weight,
        x0: 0,
        y0: 0,
    }];
    for (axis, n) in [(0, layout.0), (1, layout.1)] {
        if n > 1 {
            regions = regions.into_iter().flat_map(|r| r.split(axis)).collect();
        }
    }
    regions
}
