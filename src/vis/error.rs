// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisIterError {
    #[error("Argument {argument} has shape {received}, expected {expected}")]
    BadArrayShape {
        argument: &'static str,
        expected: String,
        received: String,
    },

    #[error("Visibility buffer {buffer} has different channel frequencies to the first buffer")]
    MismatchedChannels { buffer: usize },

    #[error("Channel selection {start}..{end} is invalid for {num_chans} channels")]
    BadChannelSelection {
        start: usize,
        end: usize,
        num_chans: usize,
    },

    #[error("Requested a visibility buffer after the iterator was exhausted")]
    Exhausted,
}
