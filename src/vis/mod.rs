// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Visibility buffers and the iterators that supply them.
//!
//! Reading visibilities from disk isn't done here; anything that can produce
//! [`VisBuffer`]s can implement [`VisIter`]. [`MemoryVisIter`] serves buffers
//! that are already in memory.

mod error;

pub use error::VisIterError;

use std::ops::Range;

use log::debug;
use marlu::{c32, UVW};
use ndarray::prelude::*;

use crate::image::stokes::Correlation;

/// A chunk of visibilities sharing the same channels and correlations.
#[derive(Debug, Clone)]
pub struct VisBuffer {
    /// One per row \[metres\].
    pub uvw: Vec<UVW>,

    /// Observed visibilities, indexed by row, channel, correlation.
    pub vis: Array3<c32>,

    /// Model visibilities; same shape as `vis`. Degridding writes here.
    pub model: Array3<c32>,

    /// Imaging weights, indexed by row, channel.
    pub weights: Array2<f32>,

    /// Per-sample flags; same shape as `vis`.
    pub flags: Array3<bool>,

    /// Per-row flags.
    pub row_flags: Vec<bool>,

    pub antenna1: Vec<usize>,
    pub antenna2: Vec<usize>,

    /// The centre frequency of each channel \[Hz\].
    pub freqs_hz: Vec<f64>,

    /// The correlation products along the last axis of `vis`.
    pub correlations: Vec<Correlation>,

    pub field_id: usize,

    /// Where the antennas point relative to the phase centre, as direction
    /// cosines (l, m).
    pub pointing_offset: (f64, f64),

    /// \[radians\]
    pub parallactic_angle: f64,

    /// Per-row delay applied to move the phase centre \[metres\].
    pub dphase: Vec<f64>,
}

impl VisBuffer {
    /// Make a new buffer of unflagged cross-correlations (antenna 0 with
    /// antenna 1) pointing at the phase centre. The model visibilities are
    /// zeroed.
    pub fn new(
        uvw: Vec<UVW>,
        vis: Array3<c32>,
        weights: Array2<f32>,
        freqs_hz: Vec<f64>,
        correlations: Vec<Correlation>,
    ) -> Result<VisBuffer, VisIterError> {
        let dim = vis.dim();
        let num_rows = uvw.len();
        let vb = VisBuffer {
            model: Array3::zeros(dim),
            flags: Array3::from_elem(dim, false),
            row_flags: vec![false; num_rows],
            antenna1: vec![0; num_rows],
            antenna2: vec![1; num_rows],
            field_id: 0,
            pointing_offset: (0.0, 0.0),
            parallactic_angle: 0.0,
            dphase: vec![0.0; num_rows],
            uvw,
            vis,
            weights,
            freqs_hz,
            correlations,
        };
        vb.validate()?;
        Ok(vb)
    }

    pub fn num_rows(&self) -> usize {
        self.uvw.len()
    }

    pub fn num_chans(&self) -> usize {
        self.freqs_hz.len()
    }

    pub fn num_corrs(&self) -> usize {
        self.correlations.len()
    }

    /// Check that all of the arrays agree on their shapes.
    pub fn validate(&self) -> Result<(), VisIterError> {
        let expected = (self.num_rows(), self.num_chans(), self.num_corrs());
        let check3 = |name: &'static str, got: (usize, usize, usize)| {
            if got == expected {
                Ok(())
            } else {
                Err(VisIterError::BadArrayShape {
                    argument: name,
                    expected: format!("{expected:?}"),
                    received: format!("{got:?}"),
                })
            }
        };
        check3("vis", self.vis.dim())?;
        check3("model", self.model.dim())?;
        check3("flags", self.flags.dim())?;
        if self.weights.dim() != (expected.0, expected.1) {
            return Err(VisIterError::BadArrayShape {
                argument: "weights",
                expected: format!("{:?}", (expected.0, expected.1)),
                received: format!("{:?}", self.weights.dim()),
            });
        }
        for (name, len) in [
            ("row_flags", self.row_flags.len()),
            ("antenna1", self.antenna1.len()),
            ("antenna2", self.antenna2.len()),
            ("dphase", self.dphase.len()),
        ] {
            if len != expected.0 {
                return Err(VisIterError::BadArrayShape {
                    argument: name,
                    expected: format!("{}", expected.0),
                    received: format!("{len}"),
                });
            }
        }
        Ok(())
    }

    /// Should this row be ignored? Autocorrelations are ignored unless
    /// `use_zero_baselines` is set.
    #[inline]
    pub fn row_is_flagged(&self, row: usize, use_zero_baselines: bool) -> bool {
        self.row_flags[row] || (!use_zero_baselines && self.antenna1[row] == self.antenna2[row])
    }

    /// A copy of this buffer with only the given channels.
    pub fn with_channels(&self, chans: Range<usize>) -> VisBuffer {
        let c = chans.clone();
        VisBuffer {
            uvw: self.uvw.clone(),
            vis: self.vis.slice(s![.., c.clone(), ..]).to_owned(),
            model: self.model.slice(s![.., c.clone(), ..]).to_owned(),
            weights: self.weights.slice(s![.., c.clone()]).to_owned(),
            flags: self.flags.slice(s![.., c, ..]).to_owned(),
            row_flags: self.row_flags.clone(),
            antenna1: self.antenna1.clone(),
            antenna2: self.antenna2.clone(),
            freqs_hz: self.freqs_hz[chans].to_vec(),
            correlations: self.correlations.clone(),
            field_id: self.field_id,
            pointing_offset: self.pointing_offset,
            parallactic_angle: self.parallactic_angle,
            dphase: self.dphase.clone(),
        }
    }
}

/// A restartable source of visibility buffers.
///
/// Iteration looks like:
///
/// ```ignore
/// vi.origin();
/// while vi.more() {
///     let vb = vi.vis_buffer()?;
///     // ...
///     vi.advance();
/// }
/// ```
pub trait VisIter {
    /// Go back to the first buffer.
    fn origin(&mut self);

    /// Is there a current buffer?
    fn more(&self) -> bool;

    /// Move to the next buffer.
    fn advance(&mut self);

    /// The current buffer, restricted to the selected channels.
    fn vis_buffer(&self) -> Result<VisBuffer, VisIterError>;

    /// Write the model visibilities of `vb` back into the current buffer.
    fn set_model_visibility(&mut self, vb: &VisBuffer) -> Result<(), VisIterError>;

    /// The selected channels; `None` means all of them.
    fn channel_selection(&self) -> Option<Range<usize>>;

    fn select_channels(&mut self, selection: Option<Range<usize>>) -> Result<(), VisIterError>;

    /// The channels (of the full, unselected channel axis) whose centre
    /// frequencies lie within `[lo_hz, hi_hz)`. `None` if there are none.
    fn channels_in_freq_range(&self, lo_hz: f64, hi_hz: f64) -> Option<Range<usize>>;

    /// The number of buffers, if known. Only used for progress reporting.
    fn num_buffers(&self) -> Option<usize> {
        None
    }
}

/// A [`VisIter`] over buffers held in memory. All buffers must share the
/// same channels.
#[derive(Debug, Clone)]
pub struct MemoryVisIter {
    buffers: Vec<VisBuffer>,
    current: usize,
    selection: Option<Range<usize>>,
}

impl MemoryVisIter {
    pub fn new(buffers: Vec<VisBuffer>) -> Result<MemoryVisIter, VisIterError> {
        if let Some(first) = buffers.first() {
            for (i, vb) in buffers.iter().enumerate() {
                vb.validate()?;
                if vb.freqs_hz != first.freqs_hz {
                    return Err(VisIterError::MismatchedChannels { buffer: i });
                }
            }
        }
        Ok(MemoryVisIter {
            buffers,
            current: 0,
            selection: None,
        })
    }

    pub fn buffers(&self) -> &[VisBuffer] {
        &self.buffers
    }

    pub fn into_buffers(self) -> Vec<VisBuffer> {
        self.buffers
    }

    fn num_chans(&self) -> usize {
        self.buffers.first().map(|vb| vb.num_chans()).unwrap_or(0)
    }
}

impl VisIter for MemoryVisIter {
    fn origin(&mut self) {
        self.current = 0;
    }

    fn more(&self) -> bool {
        self.current < self.buffers.len()
    }

    fn advance(&mut self) {
        self.current += 1;
    }

    fn vis_buffer(&self) -> Result<VisBuffer, VisIterError> {
        let vb = self
            .buffers
            .get(self.current)
            .ok_or(VisIterError::Exhausted)?;
        Ok(match &self.selection {
            Some(s) => vb.with_channels(s.clone()),
            None => vb.clone(),
        })
    }

    fn set_model_visibility(&mut self, vb: &VisBuffer) -> Result<(), VisIterError> {
        let chans = self.selection.clone().unwrap_or(0..self.num_chans());
        let stored = self
            .buffers
            .get_mut(self.current)
            .ok_or(VisIterError::Exhausted)?;
        let mut target = stored.model.slice_mut(s![.., chans, ..]);
        if target.dim() != vb.model.dim() {
            return Err(VisIterError::BadArrayShape {
                argument: "model",
                expected: format!("{:?}", target.dim()),
                received: format!("{:?}", vb.model.dim()),
            });
        }
        target.assign(&vb.model);
        Ok(())
    }

    fn channel_selection(&self) -> Option<Range<usize>> {
        self.selection.clone()
    }

    fn select_channels(&mut self, selection: Option<Range<usize>>) -> Result<(), VisIterError> {
        if let Some(s) = &selection {
            if s.start >= s.end || s.end > self.num_chans() {
                return Err(VisIterError::BadChannelSelection {
                    start: s.start,
                    end: s.end,
                    num_chans: self.num_chans(),
                });
            }
        }
        debug!("Selecting channels {selection:?}");
        self.selection = selection;
        Ok(())
    }

    fn channels_in_freq_range(&self, lo_hz: f64, hi_hz: f64) -> Option<Range<usize>> {
        let freqs = &self.buffers.first()?.freqs_hz;
        let first = freqs.iter().position(|&f| f >= lo_hz && f < hi_hz)?;
        let last = freqs.iter().rposition(|&f| f >= lo_hz && f < hi_hz)?;
        Some(first..last + 1)
    }

    fn num_buffers(&self) -> Option<usize> {
        Some(self.buffers.len())
    }
}
