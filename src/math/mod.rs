// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Some helper mathematics.


use std::sync::Arc;

use ndarray::{parallel::prelude::*, prelude::*};
use num_complex::Complex;
use rustfft::{Fft, FftDirection, FftNum, FftPlanner};

use crate::c64;

/// Complex exponential. The argument is assumed to be purely imaginary.
///
/// This function doesn't actually use complex numbers; it just returns the real
/// and imag components from Euler's formula (i.e. e^{ix} = cos{x} + i sin{x}).
///
/// # Examples
///
/// `assert_abs_diff_eq!(cexp(PI), c64::new(-1.0, 0.0));`
#[inline]
pub(crate) fn cexp(x: f64) -> c64 {
    let (im, re) = x.sin_cos();
    c64::new(re, im)
}

/// The smallest number >= `n` whose only prime factors are 2, 3 and 5. FFTs
/// of these sizes are fast.
pub(crate) fn next_composite(n: usize) -> usize {
    let mut m = n.max(1);
    loop {
        let mut r = m;
        for p in [2, 3, 5] {
            while r % p == 0 {
                r /= p;
            }
        }
        if r == 1 {
            return m;
        }
        m += 1;
    }
}

/// The bottom-left corner of a `small`-sized box centred in a `big`-sized
/// one, such that the centre pixel `small / 2` lands on `big / 2`.
#[inline]
pub(crate) fn centred_blc(big: usize, small: usize) -> usize {
    debug_assert!(big >= small);
    (big - small + usize::from(big % 2 == 0)) / 2
}

/// Plans and performs centred 2D FFTs over every (x, y) plane of a 4D
/// (x, y, pol, chan) array. "Centred" means the origin of both domains is at
/// pixel `n / 2`.
pub(crate) struct PlaneFft<T: FftNum> {
    planner: FftPlanner<T>,
}

impl<T: FftNum> PlaneFft<T> {
    pub(crate) fn new() -> PlaneFft<T> {
        PlaneFft {
            planner: FftPlanner::new(),
        }
    }

    /// Transform every plane in place. Neither direction is normalised.
    pub(crate) fn process(&mut self, mut array: ArrayViewMut4<Complex<T>>, direction: FftDirection) {
        let (nx, ny, _, _) = array.dim();
        if nx == 0 || ny == 0 {
            return;
        }
        let fft_x = self.planner.plan_fft(nx, direction);
        let fft_y = self.planner.plan_fft(ny, direction);

        array
            .axis_iter_mut(Axis(3))
            .into_par_iter()
            .for_each(|mut chan| {
                let mut work = PlaneWork::new(nx, ny, &fft_x, &fft_y);
                for plane in chan.axis_iter_mut(Axis(2)) {
                    work.transform(plane, &fft_x, &fft_y);
                }
            });
    }
}

/// Reusable buffers for transforming one plane at a time.
struct PlaneWork<T: FftNum> {
    lane: Vec<Complex<T>>,
    scratch: Vec<Complex<T>>,
}

impl<T: FftNum> PlaneWork<T> {
    fn new(
        nx: usize,
        ny: usize,
        fft_x: &Arc<dyn Fft<T>>,
        fft_y: &Arc<dyn Fft<T>>,
    ) -> PlaneWork<T> {
        let scratch_len = fft_x
            .get_inplace_scratch_len()
            .max(fft_y.get_inplace_scratch_len());
        PlaneWork {
            lane: vec![Complex::new(T::zero(), T::zero()); nx.max(ny)],
            scratch: vec![Complex::new(T::zero(), T::zero()); scratch_len],
        }
    }

    fn transform(
        &mut self,
        mut plane: ArrayViewMut2<Complex<T>>,
        fft_x: &Arc<dyn Fft<T>>,
        fft_y: &Arc<dyn Fft<T>>,
    ) {
        for (axis, fft) in [(Axis(1), fft_y), (Axis(0), fft_x)] {
            for mut lane in plane.lanes_mut(axis) {
                let n = lane.len();
                let buf = &mut self.lane[..n];
                buf.iter_mut().zip(lane.iter()).for_each(|(b, l)| *b = *l);
                // Move the origin from n/2 to 0, transform, then move it back.
                buf.rotate_left(n / 2);
                fft.process_with_scratch(buf, &mut self.scratch);
                buf.rotate_right(n / 2);
                lane.iter_mut().zip(buf.iter()).for_each(|(l, b)| *l = *b);
            }
        }
    }
}
