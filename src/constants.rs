// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

Geometry and kernel calculations are done in double precision; only the
final images are single precision.
 */

pub use marlu::constants::VEL_C;
pub use std::f64::consts::{PI, TAU};

/// The version of [`crate::GridderConfig`] and
/// [`crate::FtMachineState`] written by this build. Anything newer is
/// rejected when read.
pub const CONFIG_VERSION: u32 = 1;

/// Region-partitioned gridding never uses more than this many threads unless
/// configured otherwise.
pub const DEFAULT_MAX_GRID_THREADS: usize = 4;

/// Pixels whose primary-beam response is below this fraction of the peak are
/// zeroed when dividing by the weight image.
pub const DEFAULT_PB_LIMIT: f64 = 0.2;

/// How far the parallactic angle may drift between visibility buffers before
/// direction-dependent terms are considered changed \[degrees\].
pub const DEFAULT_PA_TOLERANCE_DEG: f64 = 5.0;

/// The number of image-sized buffers assumed to be alive at the same time
/// while gridding a cube slice.
pub const MEMORY_FAN_OUT: u64 = 25;

/// Gridding a cube needs at least this much memory \[KiB\].
pub const MIN_MEMORY_KIB: u64 = 512_000;

/// Memory ceiling for 32-bit targets \[KiB\].
pub const MAX_MEMORY_KIB_32_BIT: u64 = 2_000_000;

/// Kernel oversampling used for small images (fewer than
/// [`SMALL_IMAGE_PIXELS`] pixels on a side).
pub const SMALL_IMAGE_CONV_SAMPLING: usize = 100;

/// See [`SMALL_IMAGE_CONV_SAMPLING`].
pub const SMALL_IMAGE_PIXELS: usize = 50;

/// For larger images, the oversampling is this divided by the image size.
pub const CONV_SAMPLING_NUMERATOR: usize = 5000;

/// Gaussian primary-beam kernels are truncated at this many standard
/// deviations.
pub const CONV_SUPPORT_SIGMAS: f64 = 3.0;

/// `2 * sqrt(2 * ln(2))`; converts a Gaussian standard deviation to a FWHM.
pub const FWHM_FACTOR: f64 = 2.354_820_045_030_949_3;

/// The Airy-disk factor relating a dish diameter to its FWHM.
pub const AIRY_FWHM_FACTOR: f64 = 1.22;
