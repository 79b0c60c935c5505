// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Image cubes and the containers that hold them.
//!
//! All images are 4D arrays indexed by (x, y, Stokes plane, channel). Sums of
//! weights are 2D arrays indexed by (Stokes plane, channel).

mod error;
pub mod stokes;

pub use error::{ImageStoreError, StokesError};

use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use stokes::StokesType;

/// The shape and coordinates of an image cube.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGeometry {
    pub nx: usize,
    pub ny: usize,

    /// Pixel sizes \[radians\].
    pub cell_x: f64,
    pub cell_y: f64,

    /// The centre frequency of each channel \[Hz\].
    pub freqs_hz: Vec<f64>,

    /// \[Hz\]
    pub chan_width_hz: f64,

    pub stokes: StokesType,
}

impl ImageGeometry {
    pub fn num_chans(&self) -> usize {
        self.freqs_hz.len()
    }

    pub fn num_stokes(&self) -> usize {
        self.stokes.num_planes()
    }

    /// (x, y, Stokes plane, channel)
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        (self.nx, self.ny, self.num_stokes(), self.num_chans())
    }

    pub fn validate(&self) -> Result<(), ImageStoreError> {
        if self.nx == 0 || self.ny == 0 || self.freqs_hz.is_empty() {
            return Err(ImageStoreError::EmptyImage {
                shape: format!("{:?}", self.shape()),
            });
        }
        if !(self.cell_x > 0.0 && self.cell_y > 0.0) {
            return Err(ImageStoreError::BadCellSize {
                cell_x: self.cell_x,
                cell_y: self.cell_y,
            });
        }
        if !(self.chan_width_hz.abs() > 0.0) {
            return Err(ImageStoreError::BadChannelWidth(self.chan_width_hz));
        }
        Ok(())
    }

    /// The geometry of channels `begin..=end`.
    pub fn channel_slice(&self, begin: usize, end: usize) -> ImageGeometry {
        ImageGeometry {
            freqs_hz: self.freqs_hz[begin..=end].to_vec(),
            ..self.clone()
        }
    }

    /// The range of frequencies covered by channels `begin..=end`, including
    /// half a channel on either side \[Hz\]. The upper end is exclusive, so
    /// a frequency on the edge between two slices belongs to the higher one.
    pub fn freq_range(&self, begin: usize, end: usize) -> (f64, f64) {
        let half = self.chan_width_hz.abs() / 2.0;
        let (a, b) = (self.freqs_hz[begin], self.freqs_hz[end]);
        (a.min(b) - half, a.max(b) + half)
    }

    /// The image channel that a visibility channel at `freq_hz` falls in, if
    /// any. Channel `i` covers `[f_i - w/2, f_i + w/2)` for a channel width
    /// `w`.
    pub fn match_channel(&self, freq_hz: f64) -> Option<usize> {
        let half = self.chan_width_hz.abs() / 2.0;
        self.freqs_hz
            .iter()
            .enumerate()
            .map(|(i, &f)| (i, freq_hz - f))
            .filter(|&(_, d)| d >= -half && d < half)
            .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
    }
}

/// The images an [`ImageStore`] holds.
#[derive(Debug, Display, EnumIter, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    #[strum(serialize = "psf")]
    Psf,
    #[strum(serialize = "residual")]
    Residual,
    #[strum(serialize = "weight")]
    Weight,
    #[strum(serialize = "model")]
    Model,
    #[strum(serialize = "flux scale")]
    FluxScale,
}

/// Somewhere to keep the images of an imaging run.
///
/// Gridding reads `model` and `weight` and writes `psf`, `residual`,
/// `weight`, `flux_scale` and `sumwt`. Per-plane views are made with
/// [`crate::slicer::sub_image`].
pub trait ImageStore: Send {
    fn geometry(&self) -> &ImageGeometry;

    fn image(&self, image_type: ImageType) -> ArrayView4<f32>;

    fn image_mut(&mut self, image_type: ImageType) -> ArrayViewMut4<f32>;

    /// Sums of weights, indexed by (Stokes plane, channel).
    fn sumwt(&self) -> ArrayView2<f64>;

    fn sumwt_mut(&mut self) -> ArrayViewMut2<f64>;

    fn psf(&self) -> ArrayView4<f32> {
        self.image(ImageType::Psf)
    }

    fn psf_mut(&mut self) -> ArrayViewMut4<f32> {
        self.image_mut(ImageType::Psf)
    }

    fn residual(&self) -> ArrayView4<f32> {
        self.image(ImageType::Residual)
    }

    fn residual_mut(&mut self) -> ArrayViewMut4<f32> {
        self.image_mut(ImageType::Residual)
    }

    fn weight(&self) -> ArrayView4<f32> {
        self.image(ImageType::Weight)
    }

    fn weight_mut(&mut self) -> ArrayViewMut4<f32> {
        self.image_mut(ImageType::Weight)
    }

    fn model(&self) -> ArrayView4<f32> {
        self.image(ImageType::Model)
    }

    fn model_mut(&mut self) -> ArrayViewMut4<f32> {
        self.image_mut(ImageType::Model)
    }

    fn flux_scale(&self) -> ArrayView4<f32> {
        self.image(ImageType::FluxScale)
    }

    fn flux_scale_mut(&mut self) -> ArrayViewMut4<f32> {
        self.image_mut(ImageType::FluxScale)
    }

    /// Is the model image all zeros?
    fn model_is_empty(&self) -> bool {
        self.model().iter().all(|&v| v == 0.0)
    }
}

/// An [`ImageStore`] that keeps everything in memory.
#[derive(Debug, Clone)]
pub struct MemoryImageStore {
    geometry: ImageGeometry,
    psf: Array4<f32>,
    residual: Array4<f32>,
    weight: Array4<f32>,
    model: Array4<f32>,
    flux_scale: Array4<f32>,
    sumwt: Array2<f64>,
}

impl MemoryImageStore {
    pub fn new(geometry: ImageGeometry) -> Result<MemoryImageStore, ImageStoreError> {
        geometry.validate()?;
        let shape = geometry.shape();
        Ok(MemoryImageStore {
            psf: Array4::zeros(shape),
            residual: Array4::zeros(shape),
            weight: Array4::zeros(shape),
            model: Array4::zeros(shape),
            flux_scale: Array4::zeros(shape),
            sumwt: Array2::zeros((shape.2, shape.3)),
            geometry,
        })
    }

    /// Use `model` as the model image.
    pub fn with_model(mut self, model: Array4<f32>) -> Result<MemoryImageStore, ImageStoreError> {
        if model.dim() != self.geometry.shape() {
            return Err(ImageStoreError::BadArrayShape {
                image: ImageType::Model,
                expected: format!("{:?}", self.geometry.shape()),
                received: format!("{:?}", model.dim()),
            });
        }
        self.model = model;
        Ok(self)
    }
}

impl ImageStore for MemoryImageStore {
    fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    fn image(&self, image_type: ImageType) -> ArrayView4<f32> {
        match image_type {
            ImageType::Psf => self.psf.view(),
            ImageType::Residual => self.residual.view(),
            ImageType::Weight => self.weight.view(),
            ImageType::Model => self.model.view(),
            ImageType::FluxScale => self.flux_scale.view(),
        }
    }

    fn image_mut(&mut self, image_type: ImageType) -> ArrayViewMut4<f32> {
        match image_type {
            ImageType::Psf => self.psf.view_mut(),
            ImageType::Residual => self.residual.view_mut(),
            ImageType::Weight => self.weight.view_mut(),
            ImageType::Model => self.model.view_mut(),
            ImageType::FluxScale => self.flux_scale.view_mut(),
        }
    }

    fn sumwt(&self) -> ArrayView2<f64> {
        self.sumwt.view()
    }

    fn sumwt_mut(&mut self) -> ArrayViewMut2<f64> {
        self.sumwt.view_mut()
    }
}
