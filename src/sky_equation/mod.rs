// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Driving Fourier-transform machines over a whole visibility stream and
//! image cube.
//!
//! A [`SkyEquation`] images one or more [`ImagingField`]s. Each pass goes
//! through the cube a slice of channels at a time (see [`crate::slicer`]),
//! selecting the matching visibility channels, streaming every buffer through
//! each field's machines and adding the results into the field's image store.
//! When something direction dependent changes between buffers and a machine
//! can't cope with that, what it has gridded so far is flushed into the store
//! and it starts again.

mod change;
mod error;
#[cfg(test)]
mod tests;

pub use change::DdChangeTracker;
pub use error::SkyEquationError;

use std::ops::Range;

use crossbeam_utils::atomic::AtomicCell;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, trace, warn};
use marlu::c32;
use ndarray::prelude::*;

use crate::{
    config::GridderConfig,
    ft_machine::{new_ft_machine, FtKind, FtMachine},
    gridder::{GridError, Rows, VisType},
    image::{ImageGeometry, ImageStore, ImageType},
    normalization::{check_psf_peak, normalize_psf, normalize_residual},
    slicer::{compute_slice_count, memory_budget_kib, CubeSlice, CubeSlicing},
    vis::{VisBuffer, VisIter, VisIterError},
    PROGRESS_BARS,
};

/// A field to image: the machines that grid and predict it, and the images
/// they work with.
pub struct ImagingField {
    /// Grids visibilities into the store's images.
    pub ft: Box<dyn FtMachine>,

    /// Predicts model visibilities from the store's model image.
    pub ift: Box<dyn FtMachine>,

    pub store: Box<dyn ImageStore>,
}

impl ImagingField {
    /// Make both machines of `kind` from `config`.
    pub fn new(
        kind: FtKind,
        config: &GridderConfig,
        store: Box<dyn ImageStore>,
    ) -> Result<ImagingField, GridError> {
        Ok(ImagingField {
            ft: new_ft_machine(kind, config)?,
            ift: new_ft_machine(kind, config)?,
            store,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PutMode {
    Psf,
    Residual,
}

impl PutMode {
    fn target(self) -> ImageType {
        match self {
            PutMode::Psf => ImageType::Psf,
            PutMode::Residual => ImageType::Residual,
        }
    }
}

/// What a field is doing while a cube slice is processed.
struct FieldPass {
    geometry: ImageGeometry,
    chans: Range<usize>,
    sky_init: bool,
    vis_init: bool,
    /// Write the sky coverage into the store once it's made.
    write_weight: bool,
    /// The model for this slice, if there's anything in it.
    model: Option<Array4<f32>>,
}

impl FieldPass {
    fn new(field: &ImagingField, slice: &CubeSlice, want_model: bool) -> FieldPass {
        let chans = slice.range();
        let model = if want_model {
            let m = field.store.model().slice_move(s![.., .., .., chans.clone()]);
            if m.iter().all(|&v| v == 0.0) {
                None
            } else {
                Some(m.to_owned())
            }
        } else {
            None
        };
        FieldPass {
            geometry: field.store.geometry().channel_slice(slice.begin, slice.end),
            chans,
            sky_init: false,
            vis_init: false,
            write_weight: !field.ft.done_weight_image(),
            model,
        }
    }
}

pub struct SkyEquation {
    fields: Vec<ImagingField>,
    config: GridderConfig,
    slicing: CubeSlicing,
}

impl SkyEquation {
    /// Set up imaging of `fields`. The cube is sliced to fit in the memory
    /// budget of `config`.
    pub fn new(
        fields: Vec<ImagingField>,
        config: GridderConfig,
    ) -> Result<SkyEquation, SkyEquationError> {
        config.validate()?;
        let shape = fields
            .first()
            .ok_or(SkyEquationError::NoFields)?
            .store
            .geometry()
            .shape();
        for (i, field) in fields.iter().enumerate().skip(1) {
            let got = field.store.geometry().num_chans();
            if got != shape.3 {
                return Err(SkyEquationError::MismatchedFields {
                    field: i,
                    expected: shape.3,
                    got,
                });
            }
        }
        let slicing = compute_slice_count(shape, memory_budget_kib(&config))?;
        Ok(SkyEquation {
            fields,
            config,
            slicing,
        })
    }

    /// Grid at most `chans_per_slice` channels at a time, whatever the memory
    /// budget says.
    pub fn with_chans_per_slice(mut self, chans_per_slice: usize) -> SkyEquation {
        let num_chans = self.slicing.num_chans;
        let chans_per_slice = chans_per_slice.clamp(1, num_chans.max(1));
        self.slicing = CubeSlicing {
            num_slices: num_chans.div_ceil(chans_per_slice),
            chans_per_slice,
            num_chans,
        };
        self
    }

    pub fn slicing(&self) -> CubeSlicing {
        self.slicing
    }

    pub fn config(&self) -> &GridderConfig {
        &self.config
    }

    pub fn fields(&self) -> &[ImagingField] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [ImagingField] {
        &mut self.fields
    }

    pub fn into_fields(self) -> Vec<ImagingField> {
        self.fields
    }

    /// Grid unit visibilities into each field's `psf` image and scale every
    /// plane to a unit peak. The first pass after a reset also fills the
    /// `weight` image.
    ///
    /// # Errors
    ///
    /// Besides gridding errors, a PSF without a positive peak is fatal unless
    /// more than one Taylor term is being imaged.
    pub fn make_psf(
        &mut self,
        vi: &mut dyn VisIter,
        stop: &AtomicCell<bool>,
    ) -> Result<(), SkyEquationError> {
        info!("Making the PSF of {} field(s)", self.fields.len());
        self.grid_pass(vi, PutMode::Psf, stop)?;
        for (i, field) in self.fields.iter_mut().enumerate() {
            let peaks = normalize_psf(field.store.psf_mut())
                .map_err(|err| SkyEquationError::Normalization { field: i, err })?;
            check_psf_peak(peaks.view(), self.config.num_taylor_terms)
                .map_err(|err| SkyEquationError::Normalization { field: i, err })?;
        }
        Ok(())
    }

    /// Predict model visibilities from each field's model, grid the
    /// residuals (observed minus model) into the `residual` image, write the
    /// model visibilities back to `vi` and normalise the residuals.
    ///
    /// If every model is empty, the observed visibilities are gridded.
    pub fn compute_residuals_and_grid(
        &mut self,
        vi: &mut dyn VisIter,
        stop: &AtomicCell<bool>,
    ) -> Result<(), SkyEquationError> {
        info!("Gridding residuals of {} field(s)", self.fields.len());
        self.grid_pass(vi, PutMode::Residual, stop)?;
        for (i, field) in self.fields.iter_mut().enumerate() {
            normalize_residual(field.store.as_mut(), &self.config)
                .map_err(|err| SkyEquationError::Normalization { field: i, err })?;
        }
        Ok(())
    }

    /// Predict model visibilities from every field's model into `vi`. Unless
    /// `incremental`, the model visibilities are replaced; otherwise the
    /// prediction is added to them. Fields with empty models are skipped.
    pub fn predict_visibilities(
        &mut self,
        vi: &mut dyn VisIter,
        incremental: bool,
        stop: &AtomicCell<bool>,
    ) -> Result<(), SkyEquationError> {
        info!("Predicting model visibilities of {} field(s)", self.fields.len());
        let original = vi.channel_selection();
        let mut vi = scopeguard::guard(vi, move |vi| restore_selection(vi, original));

        let slicing = self.slicing;
        for slice in slicing.slices() {
            if slicing.num_slices > 1 {
                self.reset_machines();
            }
            let in_slice = slice_error(slice);
            let mut passes: Vec<FieldPass> = self
                .fields
                .iter()
                .map(|f| FieldPass::new(f, &slice, true))
                .collect();
            if passes.iter().all(|p| p.model.is_none()) {
                debug!("Nothing to predict for channels {:?}", slice.range());
                continue;
            }
            if !select_slice(&mut **vi, self.fields[0].store.geometry(), &slice)? {
                continue;
            }

            let pb = progress_bar(vi.num_buffers(), format!("Predicting {}", slice.index));
            vi.origin();
            while vi.more() {
                if stop.load() {
                    return Err(SkyEquationError::Cancelled);
                }
                let mut vb = vi.vis_buffer()?;
                predict_buffer(&mut self.fields, &mut passes, &mut vb, incremental)
                    .map_err(in_slice)?;
                vi.set_model_visibility(&vb)?;
                pb.inc(1);
                vi.advance();
            }
            for (field, pass) in self.fields.iter_mut().zip(passes.iter()) {
                if pass.vis_init {
                    field.ift.finalize_to_vis().map_err(in_slice)?;
                }
            }
            pb.finish_and_clear();
        }
        Ok(())
    }

    fn reset_machines(&mut self) {
        for field in self.fields.iter_mut() {
            field.ft.reset();
            field.ift.reset();
        }
    }

    /// Grid every cube slice, restoring the iterator's channel selection
    /// afterwards however this returns.
    fn grid_pass(
        &mut self,
        vi: &mut dyn VisIter,
        mode: PutMode,
        stop: &AtomicCell<bool>,
    ) -> Result<(), SkyEquationError> {
        let original = vi.channel_selection();
        let mut vi = scopeguard::guard(vi, move |vi| restore_selection(vi, original));

        let slicing = self.slicing;
        for slice in slicing.slices() {
            if slicing.num_slices > 1 {
                self.reset_machines();
            }
            debug!(
                "Gridding cube slice {} of {} (channels {}..={})",
                slice.index + 1,
                slicing.num_slices,
                slice.begin,
                slice.end
            );
            self.grid_slice(&mut **vi, slice, mode, stop)?;
        }
        Ok(())
    }

    fn grid_slice(
        &mut self,
        vi: &mut dyn VisIter,
        slice: CubeSlice,
        mode: PutMode,
        stop: &AtomicCell<bool>,
    ) -> Result<(), SkyEquationError> {
        let in_slice = slice_error(slice);
        let target = mode.target();
        let mut passes = Vec::with_capacity(self.fields.len());
        for field in self.fields.iter_mut() {
            let pass = FieldPass::new(field, &slice, mode == PutMode::Residual);
            let chans = pass.chans.clone();
            let store = field.store.as_mut();
            store
                .image_mut(target)
                .slice_move(s![.., .., .., chans.clone()])
                .fill(0.0);
            store.sumwt_mut().slice_move(s![.., chans.clone()]).fill(0.0);
            if pass.write_weight {
                store
                    .weight_mut()
                    .slice_move(s![.., .., .., chans])
                    .fill(0.0);
            }
            passes.push(pass);
        }
        if !select_slice(vi, self.fields[0].store.geometry(), &slice)? {
            return Ok(());
        }

        let predicting = passes.iter().any(|p| p.model.is_some());
        let vis_type = match (mode, predicting) {
            (PutMode::Psf, _) => VisType::Psf,
            (PutMode::Residual, true) => VisType::Residual,
            (PutMode::Residual, false) => VisType::Observed,
        };
        let do_psf = mode == PutMode::Psf;
        let mut tracker = DdChangeTracker::new(self.config.parallactic_angle_tolerance_deg);
        let pb = progress_bar(
            vi.num_buffers(),
            format!("Gridding {target} {}", slice.index),
        );

        vi.origin();
        while vi.more() {
            if stop.load() {
                return Err(SkyEquationError::Cancelled);
            }
            let mut vb = vi.vis_buffer()?;
            let dd_changed = tracker.changed(&vb);

            if predicting {
                predict_buffer(&mut self.fields, &mut passes, &mut vb, false).map_err(in_slice)?;
            }

            for (field, pass) in self.fields.iter_mut().zip(passes.iter_mut()) {
                let ft = &mut field.ft;
                let must_flush =
                    ft.changed(&vb) || (dd_changed && !ft.handles_direction_dependence());
                if pass.sky_init && must_flush {
                    trace!("Flushing the {} grid before buffer of field {}", ft.kind(), vb.field_id);
                    ft.flush_to_sky().map_err(in_slice)?;
                    add_to_store(field, pass, target).map_err(in_slice)?;
                    pass.sky_init = false;
                }
                if !pass.sky_init {
                    field
                        .ft
                        .initialize_to_sky(&pass.geometry, &vb)
                        .map_err(in_slice)?;
                    pass.sky_init = true;
                }
                field
                    .ft
                    .put(&vb, Rows::All, do_psf, vis_type)
                    .map_err(in_slice)?;
            }

            if predicting {
                vi.set_model_visibility(&vb)?;
            }
            pb.inc(1);
            vi.advance();
        }

        for (field, pass) in self.fields.iter_mut().zip(passes.iter_mut()) {
            if pass.sky_init {
                field.ft.finalize_to_sky().map_err(in_slice)?;
                add_to_store(field, pass, target).map_err(in_slice)?;
            }
            if pass.vis_init {
                field.ift.finalize_to_vis().map_err(in_slice)?;
            }
        }
        pb.finish_and_clear();
        Ok(())
    }
}

fn slice_error(slice: CubeSlice) -> impl Fn(GridError) -> SkyEquationError + Copy {
    move |err| SkyEquationError::Gridding {
        slice: slice.index,
        begin: slice.begin,
        end: slice.end,
        err,
    }
}

fn restore_selection(vi: &mut dyn VisIter, original: Option<Range<usize>>) {
    if let Err(e) = vi.select_channels(original) {
        warn!("Couldn't restore the visibility channel selection: {e}");
    }
}

/// Select the visibility channels of a cube slice. Returns false if no
/// visibilities fall in the slice.
fn select_slice(
    vi: &mut dyn VisIter,
    geometry: &ImageGeometry,
    slice: &CubeSlice,
) -> Result<bool, VisIterError> {
    let (lo, hi) = geometry.freq_range(slice.begin, slice.end);
    match vi.channels_in_freq_range(lo, hi) {
        Some(chans) => {
            vi.select_channels(Some(chans))?;
            Ok(true)
        }
        None => {
            debug!("No visibilities between {lo} and {hi} Hz");
            Ok(false)
        }
    }
}

/// Predict every field's model into `vb.model`, adding the fields together.
fn predict_buffer(
    fields: &mut [ImagingField],
    passes: &mut [FieldPass],
    vb: &mut VisBuffer,
    incremental: bool,
) -> Result<(), GridError> {
    let mut total = if incremental {
        vb.model.clone()
    } else {
        Array3::zeros(vb.model.dim())
    };
    for (field, pass) in fields.iter_mut().zip(passes.iter_mut()) {
        let Some(model) = pass.model.as_ref() else {
            continue;
        };
        if pass.vis_init && field.ift.changed(vb) {
            field.ift.finalize_to_vis()?;
            pass.vis_init = false;
        }
        if !pass.vis_init {
            field
                .ift
                .initialize_to_vis(model.view(), &pass.geometry, vb)?;
            pass.vis_init = true;
        }
        vb.model.fill(c32::default());
        field.ift.get(vb, Rows::All)?;
        total += &vb.model;
    }
    vb.model = total;
    Ok(())
}

/// Add what a machine has finalised into the field's store: the
/// un-normalised Stokes image, its sums of weights and, the first time it's
/// made, the sky coverage.
fn add_to_store(
    field: &mut ImagingField,
    pass: &mut FieldPass,
    target: ImageType,
) -> Result<(), GridError> {
    let (image, sumwt) = field.ft.get_stokes_image(false)?;
    let store = field.store.as_mut();
    let chans = pass.chans.clone();

    let mut dest = store.image_mut(target).slice_move(s![.., .., .., chans.clone()]);
    check_shape(dest.dim(), image.dim())?;
    dest += &image;
    let mut dest = store.sumwt_mut().slice_move(s![.., chans.clone()]);
    if dest.dim() != sumwt.dim() {
        return Err(GridError::BadImageShape {
            expected: format!("{:?}", dest.dim()),
            received: format!("{:?}", sumwt.dim()),
        });
    }
    dest += &sumwt;

    if pass.write_weight && field.ft.done_weight_image() {
        let (weight, _) = field.ft.get_weight_image()?;
        let mut dest = store.weight_mut().slice_move(s![.., .., .., chans]);
        check_shape(dest.dim(), weight.dim())?;
        dest.assign(&weight);
        pass.write_weight = false;
        debug!("Wrote the sky coverage");
    }
    Ok(())
}

fn check_shape(
    expected: (usize, usize, usize, usize),
    received: (usize, usize, usize, usize),
) -> Result<(), GridError> {
    if expected == received {
        Ok(())
    } else {
        Err(GridError::BadImageShape {
            expected: format!("{expected:?}"),
            received: format!("{received:?}"),
        })
    }
}

fn progress_bar(len: Option<usize>, msg: String) -> ProgressBar {
    let target = if PROGRESS_BARS.load() {
        ProgressDrawTarget::stdout()
    } else {
        ProgressDrawTarget::hidden()
    };
    let pb = ProgressBar::with_draw_target(len.map(|l| l as u64), target).with_message(msg);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg:17}: [{wide_bar:.blue}] {pos:3}/{len:3} buffers ({elapsed_precise}<{eta_precise})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}
