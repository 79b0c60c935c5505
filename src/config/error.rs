// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors when reading or validating gridder configs.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file '{file}' doesn't have a recognised file extension! Valid extensions are: {valid}")]
    UnrecognisedExtension { file: String, valid: String },

    #[error("Couldn't decode toml structure from {file}:\n{err}")]
    TomlDecode { file: String, err: String },

    #[error("Couldn't decode json structure from {file}:\n{err}")]
    JsonDecode { file: String, err: String },

    #[error("Couldn't encode config as toml: {0}")]
    TomlEncode(String),

    #[error("Config version {got} is newer than the newest supported version ({supported})")]
    NewerVersion { got: u32, supported: u32 },

    #[error("The number of threads must be at least 1")]
    ZeroThreads,

    #[error("Grid padding must be a finite number >= 1, got {0}")]
    BadPadding(f64),

    #[error("pb_limit must be in [0, 1), got {0}")]
    BadPbLimit(f64),

    #[error("The number of Taylor terms must be at least 1")]
    ZeroTaylorTerms,

    #[error("The convolution-function oversampling must be at least 1")]
    ZeroConvSampling,

    #[error("Sault weighting needs 0 < min_pb <= const_pb <= 1; got const_pb = {const_pb}, min_pb = {min_pb}")]
    BadSault { const_pb: f64, min_pb: f64 },

    #[error("IO error when trying to read config file: {0}")]
    IO(#[from] std::io::Error),
}
