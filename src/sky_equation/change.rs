// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Noticing when direction-dependent terms change between visibility buffers.

use log::debug;

use crate::vis::VisBuffer;

#[derive(Debug, Clone, Copy, PartialEq)]
struct DdKey {
    field_id: usize,
    pointing_offset: (f64, f64),
    parallactic_angle: f64,
}

impl From<&VisBuffer> for DdKey {
    fn from(vb: &VisBuffer) -> Self {
        DdKey {
            field_id: vb.field_id,
            pointing_offset: vb.pointing_offset,
            parallactic_angle: vb.parallactic_angle,
        }
    }
}

/// Compares each buffer's field, pointing and parallactic angle with the
/// buffer before it.
#[derive(Debug, Clone)]
pub struct DdChangeTracker {
    pa_tolerance_rad: f64,
    last: Option<DdKey>,
}

impl DdChangeTracker {
    pub fn new(pa_tolerance_deg: f64) -> DdChangeTracker {
        DdChangeTracker {
            pa_tolerance_rad: pa_tolerance_deg.to_radians(),
            last: None,
        }
    }

    /// Did anything direction dependent change since the last buffer? The
    /// first buffer never counts as a change.
    pub fn changed(&mut self, vb: &VisBuffer) -> bool {
        let key = DdKey::from(vb);
        let changed = match self.last {
            None => false,
            Some(last) if last.field_id != key.field_id => {
                debug!("Field changed from {} to {}", last.field_id, key.field_id);
                true
            }
            Some(last) if last.pointing_offset != key.pointing_offset => {
                debug!(
                    "Pointing changed from {:?} to {:?}",
                    last.pointing_offset, key.pointing_offset
                );
                true
            }
            Some(last) => {
                let d_pa = (key.parallactic_angle - last.parallactic_angle).abs();
                if d_pa > self.pa_tolerance_rad {
                    debug!("Parallactic angle changed by {:.3} degrees", d_pa.to_degrees());
                    true
                } else {
                    false
                }
            }
        };
        // Small parallactic-angle drifts accumulate against the angle when
        // things last changed.
        if changed || self.last.is_none() {
            self.last = Some(key);
        } else if let Some(last) = self.last.as_mut() {
            last.field_id = key.field_id;
            last.pointing_offset = key.pointing_offset;
        }
        changed
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
