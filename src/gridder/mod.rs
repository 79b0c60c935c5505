// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Convolutional gridding and degridding onto a Fourier grid.
//!
//! A [`GridAccumulator`] owns a grid shaped (x, y, grid plane, channel) and
//! moves through a small state machine:
//!
//! - `initialize_to_sky` -> `put`* -> `finalize_to_sky` -> `get_image`
//! - `initialize_to_vis` -> `get`* -> `finalize_to_vis`
//!
//! Gridding splits the grid into up to four regions, each owned by one
//! thread with its own sums of weights; the sums are added up after the
//! threads join. The weight (sky-coverage) grid is only accumulated until
//! the first `finalize_to_sky` after a [`GridAccumulator::reset`]. Weights
//! are gridded around the grid centre with the weight kernels, so the
//! coverage is the weighted sum of every pointing's squared primary beam.

mod error;
mod kernels;
mod locate;
mod partition;

pub use error::GridError;

use std::ops::Range;

use log::{debug, error, trace, warn};
use marlu::c32;
use ndarray::prelude::*;
use num_complex::Complex;
use num_traits::{Float, NumAssign};
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use rustfft::{FftDirection, FftNum};
use strum_macros::Display;

use crate::{
    config::{GridderConfig, Precision},
    conv_func::{ConvFuncBundle, GridShape},
    image::{
        stokes::{Correlation, StokesPlan},
        ImageGeometry,
    },
    math::{centred_blc, next_composite, PlaneFft},
    vis::VisBuffer,
};
use kernels::{degrid_row, grid_region, DegridContext, GridContext};
use locate::locate;
use partition::{region_layout, split_regions};

/// The numeric types a grid can accumulate in.
pub trait GridFloat: FftNum + Float + NumAssign + Default {
    const PRECISION: Precision;

    fn from_f64_lossy(v: f64) -> Self;

    fn into_f64(self) -> f64;
}

impl GridFloat for f32 {
    const PRECISION: Precision = Precision::Single;

    #[inline]
    fn from_f64_lossy(v: f64) -> Self {
        v as f32
    }

    #[inline]
    fn into_f64(self) -> f64 {
        self as f64
    }
}

impl GridFloat for f64 {
    const PRECISION: Precision = Precision::Double;

    #[inline]
    fn from_f64_lossy(v: f64) -> Self {
        v
    }

    #[inline]
    fn into_f64(self) -> f64 {
        self
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum GridState {
    #[strum(serialize = "uninitialised")]
    Uninitialized,
    #[strum(serialize = "gridding to the sky")]
    ToSky,
    #[strum(serialize = "finalised")]
    Finalized,
    #[strum(serialize = "degridding to visibilities")]
    ToVis,
}

/// Which rows of a visibility buffer to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rows {
    All,
    Single(usize),
}

impl Rows {
    fn range(self, num_rows: usize) -> Result<Range<usize>, GridError> {
        match self {
            Rows::All => Ok(0..num_rows),
            Rows::Single(row) if row < num_rows => Ok(row..row + 1),
            Rows::Single(row) => Err(GridError::BadRow { row, num_rows }),
        }
    }
}

/// The visibilities to grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisType {
    Observed,
    Model,
    /// Observed minus model.
    Residual,
    /// Unity, for making a PSF.
    Psf,
}

/// Where the sky-coverage image comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageKind {
    /// Weights are gridded with the weight kernels and transformed, giving
    /// the primary-beam coverage of every pointing.
    Gridded,
    /// Coverage is uniform: the sum of weights in every pixel.
    Flat,
}

pub struct GridAccumulator<T: GridFloat> {
    padding: f64,
    use_zero_baselines: bool,
    coverage_kind: CoverageKind,
    pool: ThreadPool,
    fft: PlaneFft<T>,
    layout: (usize, usize),

    state: GridState,
    geometry: Option<ImageGeometry>,
    plan: Option<StokesPlan>,
    correlations: Vec<Correlation>,

    grid: Array4<Complex<T>>,
    weight_grid: Array4<Complex<T>>,
    sumwt: Array2<f64>,
    /// Sums of weights of earlier flushes, for flat coverage.
    coverage_sumwt: Array2<f64>,

    image: Option<Array4<c32>>,
    coverage: Option<Array4<c32>>,
    kernel_num_pols: usize,
    done_weight_image: bool,
}

impl<T: GridFloat> GridAccumulator<T> {
    pub fn new(
        config: &GridderConfig,
        coverage_kind: CoverageKind,
    ) -> Result<GridAccumulator<T>, GridError> {
        let num_threads = config.grid_threads();
        let layout = region_layout(num_threads);
        debug!(
            "Gridding with {num_threads} threads in {}x{} regions ({} precision)",
            layout.0,
            layout.1,
            T::PRECISION
        );
        Ok(GridAccumulator {
            padding: config.padding,
            use_zero_baselines: config.use_zero_baselines,
            coverage_kind,
            pool: ThreadPoolBuilder::new().num_threads(num_threads).build()?,
            fft: PlaneFft::new(),
            layout,
            state: GridState::Uninitialized,
            geometry: None,
            plan: None,
            correlations: vec![],
            grid: Array4::default((0, 0, 0, 0)),
            weight_grid: Array4::default((0, 0, 0, 0)),
            sumwt: Array2::zeros((0, 0)),
            coverage_sumwt: Array2::zeros((0, 0)),
            image: None,
            coverage: None,
            kernel_num_pols: 1,
            done_weight_image: false,
        })
    }

    pub fn state(&self) -> GridState {
        self.state
    }

    pub fn done_weight_image(&self) -> bool {
        self.done_weight_image
    }

    pub fn coverage_kind(&self) -> CoverageKind {
        self.coverage_kind
    }

    /// Sums of weights of the current pass, indexed by (grid plane, channel).
    pub fn sumwt(&self) -> ArrayView2<f64> {
        self.sumwt.view()
    }

    /// The finalised complex sky-coverage image, if it has been made.
    pub fn coverage(&self) -> Option<&Array4<c32>> {
        self.coverage.as_ref()
    }

    pub fn stokes_plan(&self) -> Option<&StokesPlan> {
        self.plan.as_ref()
    }

    /// The number of polarisations of the last kernels used.
    pub fn kernel_num_pols(&self) -> usize {
        self.kernel_num_pols
    }

    /// Can `vb` be gridded or degridded without re-initialising?
    pub fn accepts(&self, vb: &VisBuffer) -> bool {
        self.correlations == vb.correlations
    }

    /// The size of the Fourier grid for an image: at least `padding` times
    /// the image, rounded up to an FFT-friendly size.
    pub fn grid_size(&self, geometry: &ImageGeometry) -> (usize, usize) {
        let pad = |n: usize| next_composite((self.padding * n as f64).ceil() as usize);
        (pad(geometry.nx), pad(geometry.ny))
    }

    /// The shape of the grid for `geometry`, with the uv cell sizes that go
    /// with it.
    pub fn grid_shape(&self, geometry: &ImageGeometry) -> GridShape {
        let (nx, ny) = self.grid_size(geometry);
        GridShape {
            nx,
            ny,
            cell_x: geometry.cell_x,
            cell_y: geometry.cell_y,
        }
    }

    fn check_state(&self, op: &'static str, expected: GridState) -> Result<(), GridError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(GridError::WrongState {
                op,
                state: self.state,
            })
        }
    }

    fn check_correlations(&self, vb: &VisBuffer) -> Result<(), GridError> {
        if self.accepts(vb) {
            Ok(())
        } else {
            Err(GridError::CorrelationsChanged {
                initialised: format!("{:?}", self.correlations),
                got: format!("{:?}", vb.correlations),
            })
        }
    }

    /// Set up the maps from visibility correlations to grid planes, and
    /// return the grid's shape.
    fn prepare(
        &mut self,
        geometry: &ImageGeometry,
        vb: &VisBuffer,
    ) -> Result<(usize, usize, usize, usize), GridError> {
        geometry.validate()?;
        vb.validate()?;
        let plan = StokesPlan::new(geometry.stokes, &vb.correlations)?;
        let (ngx, ngy) = self.grid_size(geometry);
        let shape = (ngx, ngy, plan.num_grid_planes(), geometry.num_chans());
        self.plan = Some(plan);
        self.correlations = vb.correlations.clone();
        self.geometry = Some(geometry.clone());
        Ok(shape)
    }

    /// For each visibility channel, the image channel it belongs in.
    fn chan_map(&self, vb: &VisBuffer) -> Vec<Option<usize>> {
        match &self.geometry {
            Some(g) => vb.freqs_hz.iter().map(|&f| g.match_channel(f)).collect(),
            None => vec![None; vb.num_chans()],
        }
    }

    /// Get ready to grid visibilities for `geometry`. The buffer supplies the
    /// correlations.
    pub fn initialize_to_sky(
        &mut self,
        geometry: &ImageGeometry,
        vb: &VisBuffer,
    ) -> Result<(), GridError> {
        let shape = self.prepare(geometry, vb)?;
        trace!("Initialising a {shape:?} grid for gridding");
        self.grid = alloc_grid(shape)?;
        if !self.done_weight_image {
            match self.coverage_kind {
                CoverageKind::Gridded if self.weight_grid.dim() != shape => {
                    if !self.weight_grid.is_empty() {
                        warn!("The grid shape changed; discarding gridded weights");
                    }
                    self.weight_grid = alloc_grid(shape)?;
                }
                CoverageKind::Flat if self.coverage_sumwt.dim() != (shape.2, shape.3) => {
                    self.coverage_sumwt = Array2::zeros((shape.2, shape.3));
                }
                _ => (),
            }
        }
        self.sumwt = Array2::zeros((shape.2, shape.3));
        self.image = None;
        self.state = GridState::ToSky;
        Ok(())
    }

    /// Grid visibilities from `vb`. Buffers given an empty bundle are
    /// skipped.
    pub fn put(
        &mut self,
        vb: &VisBuffer,
        bundle: &ConvFuncBundle,
        rows: Rows,
        do_psf: bool,
        vis_type: VisType,
    ) -> Result<(), GridError> {
        self.check_state("put", GridState::ToSky)?;
        self.check_correlations(vb)?;
        if bundle.is_empty() {
            trace!("Nothing to grid for field {}", vb.field_id);
            return Ok(());
        }
        bundle.validate(vb)?;
        let rows = rows.range(vb.num_rows())?;
        let (geometry, plan) = match (&self.geometry, &self.plan) {
            (Some(g), Some(p)) => (g, p),
            _ => {
                return Err(GridError::WrongState {
                    op: "put",
                    state: GridState::Uninitialized,
                })
            }
        };
        let grid_shape = self.grid_shape(geometry);
        let chan_map = self.chan_map(vb);
        let located = self.pool.install(|| {
            locate(
                vb,
                rows,
                &chan_map,
                grid_shape,
                bundle.sampling,
                bundle.support,
                self.use_zero_baselines,
            )
        });
        let ctx = GridContext {
            vb,
            bundle,
            located: &located,
            pol_map: plan.pol_map(),
            do_psf,
            vis_type,
            grid_centre: [grid_shape.nx / 2, grid_shape.ny / 2],
        };

        let weight = if self.done_weight_image || self.weight_grid.is_empty() {
            None
        } else {
            Some(self.weight_grid.view_mut())
        };
        let regions = split_regions(self.grid.view_mut(), weight, self.layout);
        let partial_sumwts: Vec<Array2<f64>> = self.pool.install(|| {
            regions
                .into_par_iter()
                .map(|region| grid_region(region, &ctx))
                .collect()
        });
        for partial in partial_sumwts {
            self.sumwt += &partial;
        }
        self.kernel_num_pols = bundle.num_pols();
        Ok(())
    }

    /// Transform the grid into an image, without touching the weights. Used
    /// when gridding has to restart partway through a pass; gridded weights
    /// keep accumulating until [`Self::finalize_to_sky`].
    pub fn flush_to_sky(&mut self) -> Result<(), GridError> {
        self.check_state("flush_to_sky", GridState::ToSky)?;
        self.image = Some(self.grid_to_image()?);
        if !self.done_weight_image && self.coverage_kind == CoverageKind::Flat {
            self.accumulate_flat_sumwt();
        }
        self.state = GridState::Finalized;
        Ok(())
    }

    /// Transform the grid into an image and release the grid. The first time
    /// after a reset, also make the sky-coverage image.
    pub fn finalize_to_sky(&mut self) -> Result<(), GridError> {
        if self.state == GridState::Finalized && self.image.is_some() && self.grid.is_empty() {
            debug!("Grid is already finalised");
            return Ok(());
        }
        self.check_state("finalize_to_sky", GridState::ToSky)?;
        self.image = Some(self.grid_to_image()?);

        if !self.done_weight_image {
            let coverage = match self.coverage_kind {
                CoverageKind::Gridded => {
                    let mut weight_grid = std::mem::take(&mut self.weight_grid);
                    if weight_grid.is_empty() {
                        None
                    } else {
                        Some(self.fft_and_extract(&mut weight_grid)?)
                    }
                }
                CoverageKind::Flat => {
                    self.accumulate_flat_sumwt();
                    self.flat_coverage()
                }
            };
            if coverage.is_some() {
                debug!("Made the sky-coverage image");
                self.coverage = coverage;
                self.done_weight_image = true;
            }
        }

        self.state = GridState::Finalized;
        Ok(())
    }

    fn accumulate_flat_sumwt(&mut self) {
        if self.coverage_sumwt.dim() == self.sumwt.dim() {
            self.coverage_sumwt += &self.sumwt;
        }
    }

    /// Coverage for kernels without a primary beam: each plane is uniformly
    /// its sum of weights.
    fn flat_coverage(&self) -> Option<Array4<c32>> {
        let g = self.geometry.as_ref()?;
        let (npol, nchan) = self.coverage_sumwt.dim();
        let mut coverage = Array4::zeros((g.nx, g.ny, npol, nchan));
        for ((pol, chan), &w) in self.coverage_sumwt.indexed_iter() {
            coverage
                .slice_mut(s![.., .., pol, chan])
                .fill(c32::new(w as f32, 0.0));
        }
        Some(coverage)
    }

    fn grid_to_image(&mut self) -> Result<Array4<c32>, GridError> {
        let mut grid = std::mem::take(&mut self.grid);
        self.fft_and_extract(&mut grid)
    }

    /// Inverse FFT a grid and cut the image out of its centre.
    fn fft_and_extract(
        &mut self,
        grid: &mut Array4<Complex<T>>,
    ) -> Result<Array4<c32>, GridError> {
        let geometry = self.geometry.as_ref().ok_or(GridError::WrongState {
            op: "finalize_to_sky",
            state: GridState::Uninitialized,
        })?;
        let fft = &mut self.fft;
        self.pool.install(|| fft.process(grid.view_mut(), FftDirection::Inverse));
        let (ngx, ngy, _, _) = grid.dim();
        let (bx, by) = (
            centred_blc(ngx, geometry.nx),
            centred_blc(ngy, geometry.ny),
        );
        Ok(grid
            .slice(s![bx..bx + geometry.nx, by..by + geometry.ny, .., ..])
            .mapv(|c| c32::new(c.re.into_f64() as f32, c.im.into_f64() as f32)))
    }

    /// The finalised complex image, indexed by (x, y, grid plane, channel),
    /// and the sums of weights.
    ///
    /// If `normalize`, every plane is divided by its sum of weights. Planes
    /// without weight are zeroed. If nothing had any weight the image is
    /// returned as is.
    pub fn get_image(&self, normalize: bool) -> Result<(Array4<c32>, Array2<f64>), GridError> {
        let image = match (&self.image, self.state) {
            (Some(image), GridState::Finalized) => image,
            _ => {
                return Err(GridError::WrongState {
                    op: "get_image",
                    state: self.state,
                })
            }
        };
        let mut image = image.clone();
        if self.sumwt.iter().all(|&w| w == 0.0) {
            if normalize {
                error!("No useful data were gridded; the sum of weights is zero");
            } else {
                warn!("The sum of weights is zero");
            }
            return Ok((image, self.sumwt.clone()));
        }
        for ((pol, chan), &w) in self.sumwt.indexed_iter() {
            let mut plane = image.slice_mut(s![.., .., pol, chan]);
            if w == 0.0 {
                plane.fill(c32::default());
            } else if normalize {
                let w = w as f32;
                plane.mapv_inplace(|v| v / w);
            }
        }
        Ok((image, self.sumwt.clone()))
    }

    /// [`Self::get_image`] combined into Stokes planes.
    pub fn get_stokes_image(
        &self,
        normalize: bool,
    ) -> Result<(Array4<f32>, Array2<f64>), GridError> {
        let (image, sumwt) = self.get_image(normalize)?;
        let plan = self.plan.as_ref().ok_or(GridError::WrongState {
            op: "get_stokes_image",
            state: self.state,
        })?;
        Ok((
            plan.correlation_to_stokes(image.view()),
            plan.sum_weights_to_stokes(sumwt.view()),
        ))
    }

    /// The sky-coverage image per Stokes plane, and the sums of weights.
    pub fn get_weight_image(&self) -> Result<(Array4<f32>, Array2<f64>), GridError> {
        match (&self.coverage, &self.plan) {
            (Some(coverage), Some(plan)) => Ok((
                plan.coverage_to_stokes(coverage.view(), self.kernel_num_pols),
                plan.sum_weights_to_stokes(self.sumwt.view()),
            )),
            _ => Err(GridError::WrongState {
                op: "get_weight_image",
                state: self.state,
            }),
        }
    }

    /// Get ready to predict visibilities from a model image, indexed by
    /// (x, y, Stokes plane, channel).
    pub fn initialize_to_vis(
        &mut self,
        model: ArrayView4<f32>,
        geometry: &ImageGeometry,
        vb: &VisBuffer,
    ) -> Result<(), GridError> {
        if model.dim() != geometry.shape() {
            return Err(GridError::BadImageShape {
                expected: format!("{:?}", geometry.shape()),
                received: format!("{:?}", model.dim()),
            });
        }
        let shape = self.prepare(geometry, vb)?;
        let corr_image = self
            .plan
            .as_ref()
            .map(|plan| plan.stokes_to_correlation(model))
            .ok_or(GridError::WrongState {
                op: "initialize_to_vis",
                state: self.state,
            })?;
        trace!("Initialising a {shape:?} grid for degridding");
        let mut grid = alloc_grid::<T>(shape)?;
        let (bx, by) = (
            centred_blc(shape.0, geometry.nx),
            centred_blc(shape.1, geometry.ny),
        );
        grid.slice_mut(s![bx..bx + geometry.nx, by..by + geometry.ny, .., ..])
            .zip_mut_with(&corr_image, |g, c| {
                *g = Complex::new(T::from_f64_lossy(c.re as f64), T::from_f64_lossy(c.im as f64))
            });
        let fft = &mut self.fft;
        self.pool.install(|| fft.process(grid.view_mut(), FftDirection::Forward));
        self.grid = grid;
        self.state = GridState::ToVis;
        Ok(())
    }

    /// Predict model visibilities into `vb.model`. Samples that can't be
    /// predicted keep their values.
    pub fn get(
        &self,
        vb: &mut VisBuffer,
        bundle: &ConvFuncBundle,
        rows: Rows,
    ) -> Result<(), GridError> {
        self.check_state("get", GridState::ToVis)?;
        self.check_correlations(vb)?;
        if bundle.is_empty() {
            return Ok(());
        }
        bundle.validate(vb)?;
        let rows = rows.range(vb.num_rows())?;
        let (geometry, plan) = match (&self.geometry, &self.plan) {
            (Some(g), Some(p)) => (g, p),
            _ => {
                return Err(GridError::WrongState {
                    op: "get",
                    state: GridState::Uninitialized,
                })
            }
        };
        let chan_map = self.chan_map(vb);
        let grid_shape = self.grid_shape(geometry);
        let located = {
            let vb: &VisBuffer = vb;
            self.pool.install(|| {
                locate(
                    vb,
                    rows.clone(),
                    &chan_map,
                    grid_shape,
                    bundle.sampling,
                    bundle.support,
                    self.use_zero_baselines,
                )
            })
        };
        let ctx = DegridContext {
            grid: self.grid.view(),
            bundle,
            located: &located,
            pol_map: plan.pol_map(),
        };
        self.pool.install(|| {
            vb.model
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .filter(|(row, _)| rows.contains(row))
                .for_each(|(row, model)| degrid_row(row, model, &ctx))
        });
        Ok(())
    }

    /// Release the degridding grid.
    pub fn finalize_to_vis(&mut self) -> Result<(), GridError> {
        self.check_state("finalize_to_vis", GridState::ToVis)?;
        self.grid = Array4::default((0, 0, 0, 0));
        self.state = GridState::Uninitialized;
        Ok(())
    }

    /// Forget the sky coverage so that the next pass makes it again.
    pub fn reset(&mut self) {
        trace!("Resetting grid accumulator");
        self.done_weight_image = false;
        self.weight_grid = Array4::default((0, 0, 0, 0));
        self.coverage_sumwt = Array2::zeros((0, 0));
        self.coverage = None;
        self.image = None;
        self.grid = Array4::default((0, 0, 0, 0));
        self.state = GridState::Uninitialized;
    }

    /// Put back state saved from another accumulator.
    pub(crate) fn restore(
        &mut self,
        done_weight_image: bool,
        sumwt: Array2<f64>,
        coverage: Option<Array4<c32>>,
        kernel_num_pols: usize,
    ) {
        self.done_weight_image = done_weight_image;
        self.sumwt = sumwt;
        self.coverage = coverage;
        self.kernel_num_pols = kernel_num_pols;
    }
}

/// Allocate a zeroed grid, failing gracefully if there isn't the memory.
fn alloc_grid<T: GridFloat>(
    shape: (usize, usize, usize, usize),
) -> Result<Array4<Complex<T>>, GridError> {
    let num_elems = shape.0 * shape.1 * shape.2 * shape.3;
    let mut v = Vec::new();
    v.try_reserve_exact(num_elems)
        .map_err(|_| GridError::InsufficientMemory {
            need_gib: (num_elems * std::mem::size_of::<Complex<T>>()).div_ceil(1024_usize.pow(3)),
        })?;
    v.resize(num_elems, Complex::new(T::zero(), T::zero()));
    Ok(Array4::from_shape_vec(shape, v)?)
}
