// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fourier-transform machines: a grid accumulator paired with the
//! convolution functions it grids with.
//!
//! The kind of machine and the grid precision are chosen once, by
//! [`new_ft_machine`]; everything after that goes through the
//! [`FtMachine`] trait object.


use log::debug;
use marlu::c32;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::{
    config::{GridderConfig, Precision},
    constants::CONFIG_VERSION,
    conv_func::{ConvFuncProvider, GaussianPbConvFunc, PillboxConvFunc},
    gridder::{CoverageKind, GridAccumulator, GridError, GridFloat, GridState, Rows, VisType},
    image::ImageGeometry,
    vis::VisBuffer,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FtKind {
    /// Primary-beam kernels for every pointing; the sky coverage is gridded.
    #[strum(serialize = "mosaic")]
    Mosaic,

    /// A unit kernel and flat coverage. Direction-dependent changes need the
    /// grid to be flushed.
    #[strum(serialize = "grid")]
    Grid,
}

/// Everything needed to pick up where a machine left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtMachineState {
    pub version: u32,
    pub kind: FtKind,
    pub precision: Precision,
    /// Kernel oversampling last used.
    pub sampling: usize,
    pub done_weight_image: bool,
    pub kernel_num_pols: usize,
    /// Indexed by (grid plane, channel).
    pub sumwt: Array2<f64>,
    /// The real part of the sky-coverage image, if it has been made.
    pub coverage: Option<Array4<f32>>,
}

impl FtMachineState {
    pub fn to_json(&self) -> Result<String, GridError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<FtMachineState, GridError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Gridding and degridding, independent of the kernels and grid precision.
pub trait FtMachine: Send {
    fn kind(&self) -> FtKind;

    fn precision(&self) -> Precision;

    fn grid_state(&self) -> GridState;

    fn initialize_to_sky(&mut self, geometry: &ImageGeometry, vb: &VisBuffer)
        -> Result<(), GridError>;

    fn put(
        &mut self,
        vb: &VisBuffer,
        rows: Rows,
        do_psf: bool,
        vis_type: VisType,
    ) -> Result<(), GridError>;

    /// Make an image of what's been gridded so far, but keep accumulating
    /// the sky coverage. The machine must be initialised again before more
    /// gridding.
    fn flush_to_sky(&mut self) -> Result<(), GridError>;

    fn finalize_to_sky(&mut self) -> Result<(), GridError>;

    /// The complex image (x, y, grid plane, channel) and sums of weights.
    fn get_image(&self, normalize: bool) -> Result<(Array4<c32>, Array2<f64>), GridError>;

    /// The image as Stokes planes, with sums of weights per Stokes plane.
    fn get_stokes_image(&self, normalize: bool) -> Result<(Array4<f32>, Array2<f64>), GridError>;

    fn get_weight_image(&self) -> Result<(Array4<f32>, Array2<f64>), GridError>;

    /// Has the sky coverage been made since the last reset?
    fn done_weight_image(&self) -> bool;

    fn initialize_to_vis(
        &mut self,
        model: ArrayView4<f32>,
        geometry: &ImageGeometry,
        vb: &VisBuffer,
    ) -> Result<(), GridError>;

    /// Predict into `vb.model`, overwriting what's there.
    fn get(&mut self, vb: &mut VisBuffer, rows: Rows) -> Result<(), GridError>;

    fn finalize_to_vis(&mut self) -> Result<(), GridError>;

    fn reset(&mut self);

    /// Does `vb` need the machine to be re-initialised? Machines that don't
    /// handle direction dependence also need it when their kernels change.
    fn changed(&self, vb: &VisBuffer) -> bool;

    /// Can this machine grid buffers with different pointings, parallactic
    /// angles or fields without flushing?
    fn handles_direction_dependence(&self) -> bool;

    fn state(&self) -> FtMachineState;

    fn restore_state(&mut self, state: FtMachineState) -> Result<(), GridError>;
}

pub struct MosaicFt<T: GridFloat> {
    kind: FtKind,
    accumulator: GridAccumulator<T>,
    provider: Box<dyn ConvFuncProvider>,
    geometry: Option<ImageGeometry>,
    sampling: usize,
}

impl<T: GridFloat> MosaicFt<T> {
    pub fn new(
        kind: FtKind,
        config: &GridderConfig,
        provider: Box<dyn ConvFuncProvider>,
    ) -> Result<MosaicFt<T>, GridError> {
        let coverage = match kind {
            FtKind::Mosaic => CoverageKind::Gridded,
            FtKind::Grid => CoverageKind::Flat,
        };
        Ok(MosaicFt {
            kind,
            accumulator: GridAccumulator::new(config, coverage)?,
            provider,
            geometry: None,
            sampling: 1,
        })
    }

    pub fn accumulator(&self) -> &GridAccumulator<T> {
        &self.accumulator
    }
}

impl<T: GridFloat> FtMachine for MosaicFt<T> {
    fn kind(&self) -> FtKind {
        self.kind
    }

    fn precision(&self) -> Precision {
        T::PRECISION
    }

    fn grid_state(&self) -> GridState {
        self.accumulator.state()
    }

    fn initialize_to_sky(
        &mut self,
        geometry: &ImageGeometry,
        vb: &VisBuffer,
    ) -> Result<(), GridError> {
        self.accumulator.initialize_to_sky(geometry, vb)?;
        self.geometry = Some(geometry.clone());
        Ok(())
    }

    fn put(
        &mut self,
        vb: &VisBuffer,
        rows: Rows,
        do_psf: bool,
        vis_type: VisType,
    ) -> Result<(), GridError> {
        let geometry = self.geometry.as_ref().ok_or_else(|| GridError::WrongState {
            op: "put",
            state: self.accumulator.state(),
        })?;
        let grid = self.accumulator.grid_shape(geometry);
        let bundle = self.provider.find_conv_function(geometry, grid, vb)?;
        self.sampling = bundle.sampling;
        self.accumulator.put(vb, &bundle, rows, do_psf, vis_type)
    }

    fn flush_to_sky(&mut self) -> Result<(), GridError> {
        self.accumulator.flush_to_sky()
    }

    fn finalize_to_sky(&mut self) -> Result<(), GridError> {
        self.accumulator.finalize_to_sky()
    }

    fn get_image(&self, normalize: bool) -> Result<(Array4<c32>, Array2<f64>), GridError> {
        self.accumulator.get_image(normalize)
    }

    fn get_stokes_image(&self, normalize: bool) -> Result<(Array4<f32>, Array2<f64>), GridError> {
        self.accumulator.get_stokes_image(normalize)
    }

    fn get_weight_image(&self) -> Result<(Array4<f32>, Array2<f64>), GridError> {
        self.accumulator.get_weight_image()
    }

    fn done_weight_image(&self) -> bool {
        self.accumulator.done_weight_image()
    }

    fn initialize_to_vis(
        &mut self,
        model: ArrayView4<f32>,
        geometry: &ImageGeometry,
        vb: &VisBuffer,
    ) -> Result<(), GridError> {
        self.accumulator.initialize_to_vis(model, geometry, vb)?;
        self.geometry = Some(geometry.clone());
        Ok(())
    }

    fn get(&mut self, vb: &mut VisBuffer, rows: Rows) -> Result<(), GridError> {
        let geometry = self.geometry.as_ref().ok_or_else(|| GridError::WrongState {
            op: "get",
            state: self.accumulator.state(),
        })?;
        let grid = self.accumulator.grid_shape(geometry);
        let bundle = self.provider.find_conv_function(geometry, grid, vb)?;
        self.sampling = bundle.sampling;
        self.accumulator.get(vb, &bundle, rows)
    }

    fn finalize_to_vis(&mut self) -> Result<(), GridError> {
        self.accumulator.finalize_to_vis()
    }

    fn reset(&mut self) {
        self.accumulator.reset();
        self.provider.reset();
    }

    fn changed(&self, vb: &VisBuffer) -> bool {
        match self.accumulator.state() {
            GridState::ToSky | GridState::ToVis => {
                !self.accumulator.accepts(vb)
                    || (!self.handles_direction_dependence() && self.provider.changed(vb))
            }
            GridState::Uninitialized | GridState::Finalized => false,
        }
    }

    fn handles_direction_dependence(&self) -> bool {
        self.kind == FtKind::Mosaic
    }

    fn state(&self) -> FtMachineState {
        FtMachineState {
            version: CONFIG_VERSION,
            kind: self.kind,
            precision: T::PRECISION,
            sampling: self.sampling,
            done_weight_image: self.accumulator.done_weight_image(),
            kernel_num_pols: self.accumulator.kernel_num_pols(),
            sumwt: self.accumulator.sumwt().to_owned(),
            coverage: self.accumulator.coverage().map(|c| c.mapv(|v| v.re)),
        }
    }

    fn restore_state(&mut self, state: FtMachineState) -> Result<(), GridError> {
        if state.version > CONFIG_VERSION {
            return Err(GridError::NewerState {
                got: state.version,
                supported: CONFIG_VERSION,
            });
        }
        if state.kind != self.kind || state.precision != T::PRECISION {
            return Err(GridError::MismatchedState(format!(
                "saved {} machine with {} precision, but this is a {} machine with {} precision",
                state.kind,
                state.precision,
                self.kind,
                T::PRECISION
            )));
        }
        if state.done_weight_image && state.coverage.is_none() {
            return Err(GridError::MismatchedState(
                "the sky coverage is marked as done, but wasn't saved".to_string(),
            ));
        }
        debug!("Restoring {} machine state", self.kind);
        self.sampling = state.sampling;
        self.accumulator.restore(
            state.done_weight_image,
            state.sumwt,
            state.coverage.map(|c| c.mapv(|v| c32::new(v, 0.0))),
            state.kernel_num_pols,
        );
        Ok(())
    }
}

/// Create an [`FtMachine`] trait object of the given kind, accumulating in
/// the configured precision.
///
/// # Errors
///
/// This function will return an error if the gridding thread pool can't be
/// built.
pub fn new_ft_machine(
    kind: FtKind,
    config: &GridderConfig,
) -> Result<Box<dyn FtMachine>, GridError> {
    let provider: Box<dyn ConvFuncProvider> = match kind {
        FtKind::Mosaic => Box::new(GaussianPbConvFunc::new(
            config.primary_beam,
            config.conv_sampling,
        )),
        FtKind::Grid => Box::new(PillboxConvFunc),
    };
    debug!("Creating a {kind} machine with {} precision", config.precision);
    match config.precision {
        Precision::Single => Ok(Box::new(MosaicFt::<f32>::new(kind, config, provider)?)),
        Precision::Double => Ok(Box::new(MosaicFt::<f64>::new(kind, config, provider)?)),
    }
}
