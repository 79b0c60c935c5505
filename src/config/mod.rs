// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration of the gridding engine.
//!
//! A [`GridderConfig`] can be built in code (all fields have defaults) or read
//! from a toml or json file with [`GridderConfig::from_file`].

mod error;

pub use error::ConfigError;

use std::{fs::File, io::Read, path::Path, str::FromStr};

use itertools::Itertools;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::{constants::*, normalization::NormType};

#[derive(Debug, Display, EnumIter, EnumString)]
enum ConfigFileType {
    #[strum(serialize = "toml")]
    Toml,
    #[strum(serialize = "json")]
    Json,
}

lazy_static::lazy_static! {
    static ref CONFIG_FILE_TYPES_COMMA_SEPARATED: String = ConfigFileType::iter().join(", ");
}

/// The numeric type that Fourier grids accumulate in. Images are always
/// single precision once finalised.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[strum(serialize = "single")]
    Single,

    #[default]
    #[strum(serialize = "double")]
    Double,
}

/// How the dirty image is turned into a flux-density image after gridding.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum FluxScaleScheme {
    /// Divide by the primary-beam (weight) image, zeroing pixels below
    /// `pb_limit`.
    #[default]
    PbDivide,

    /// Sault weighting: the weight image is floored at `const_pb^2` of its
    /// peak and a flux-scale image records how to undo the taper. Pixels
    /// below `min_pb^2` of the peak get no flux.
    Sault { const_pb: f64, min_pb: f64 },
}

/// Parameters for the Gaussian primary-beam convolution functions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrimaryBeamConfig {
    /// The antenna diameter \[metres\]. Only used if `fwhm_deg` isn't given.
    pub dish_diameter_m: f64,

    /// The FWHM of the primary beam at `reference_freq_hz` \[degrees\].
    pub fwhm_deg: Option<f64>,

    /// The frequency at which `fwhm_deg` applies \[Hz\]. The FWHM scales
    /// inversely with frequency.
    pub reference_freq_hz: Option<f64>,
}

impl Default for PrimaryBeamConfig {
    fn default() -> Self {
        PrimaryBeamConfig {
            dish_diameter_m: 25.0,
            fwhm_deg: None,
            reference_freq_hz: None,
        }
    }
}

impl PrimaryBeamConfig {
    /// The primary-beam FWHM at `freq_hz` \[radians\].
    pub fn fwhm_rad(&self, freq_hz: f64) -> f64 {
        match (self.fwhm_deg, self.reference_freq_hz) {
            (Some(fwhm), Some(ref_freq)) => fwhm.to_radians() * ref_freq / freq_hz,
            (Some(fwhm), None) => fwhm.to_radians(),
            _ => AIRY_FWHM_FACTOR * VEL_C / (freq_hz * self.dish_diameter_m),
        }
    }
}

/// Everything that controls gridding, slicing and normalisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridderConfig {
    /// Must not be newer than [`CONFIG_VERSION`].
    pub version: u32,

    pub precision: Precision,

    /// The number of threads to use. If not given, the size of the global
    /// rayon pool is used.
    pub num_threads: Option<usize>,

    /// Region-partitioned gridding uses at most this many threads.
    pub max_grid_threads: usize,

    /// Grids are at least this much bigger than the image on each side
    /// (rounded up to an FFT-friendly size).
    pub padding: f64,

    /// Grid autocorrelations too?
    pub use_zero_baselines: bool,

    /// Pixels with a primary-beam response below this fraction of the peak
    /// are zeroed rather than divided.
    pub pb_limit: f64,

    /// "flatnoise" or "flatsky". Anything else is treated as "flatsky".
    pub norm_type: String,

    pub flux_scale: FluxScaleScheme,

    /// Memory to budget for when slicing cubes \[KiB\]. If not given, the
    /// total physical memory is used.
    pub memory_kib: Option<u64>,

    /// More than one term means multi-term (Taylor) imaging, which relaxes
    /// the check on the PSF peak.
    pub num_taylor_terms: usize,

    /// Override the convolution-function oversampling.
    pub conv_sampling: Option<usize>,

    pub primary_beam: PrimaryBeamConfig,

    /// Parallactic-angle changes bigger than this invalidate
    /// direction-dependent terms \[degrees\].
    pub parallactic_angle_tolerance_deg: f64,
}

impl Default for GridderConfig {
    fn default() -> Self {
        GridderConfig {
            version: CONFIG_VERSION,
            precision: Precision::default(),
            num_threads: None,
            max_grid_threads: DEFAULT_MAX_GRID_THREADS,
            padding: 1.0,
            use_zero_baselines: false,
            pb_limit: DEFAULT_PB_LIMIT,
            norm_type: NormType::FlatNoise.to_string(),
            flux_scale: FluxScaleScheme::default(),
            memory_kib: None,
            num_taylor_terms: 1,
            conv_sampling: None,
            primary_beam: PrimaryBeamConfig::default(),
            parallactic_angle_tolerance_deg: DEFAULT_PA_TOLERANCE_DEG,
        }
    }
}

impl GridderConfig {
    /// Read a config from a toml or json file (decided by the file's
    /// extension) and validate it.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<GridderConfig, ConfigError> {
        let file = file.as_ref();
        debug!("Attempting to parse gridder config {}", file.display());

        let file_type = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .and_then(|e| ConfigFileType::from_str(&e).ok());

        let mut contents = String::new();
        let config: GridderConfig = match file_type {
            Some(ConfigFileType::Toml) => {
                debug!("Parsing toml file...");
                let mut fh = File::open(file)?;
                fh.read_to_string(&mut contents)?;
                toml::from_str(&contents).map_err(|e| ConfigError::TomlDecode {
                    file: file.display().to_string(),
                    err: e.to_string(),
                })?
            }
            Some(ConfigFileType::Json) => {
                debug!("Parsing json file...");
                let mut fh = File::open(file)?;
                fh.read_to_string(&mut contents)?;
                serde_json::from_str(&contents).map_err(|e| ConfigError::JsonDecode {
                    file: file.display().to_string(),
                    err: e.to_string(),
                })?
            }
            None => {
                return Err(ConfigError::UnrecognisedExtension {
                    file: file.display().to_string(),
                    valid: CONFIG_FILE_TYPES_COMMA_SEPARATED.clone(),
                })
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Check that the values make sense together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version > CONFIG_VERSION {
            return Err(ConfigError::NewerVersion {
                got: self.version,
                supported: CONFIG_VERSION,
            });
        }
        if self.num_threads == Some(0) {
            return Err(ConfigError::ZeroThreads);
        }
        if self.max_grid_threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if !self.padding.is_finite() || self.padding < 1.0 {
            return Err(ConfigError::BadPadding(self.padding));
        }
        if !(0.0..1.0).contains(&self.pb_limit) {
            return Err(ConfigError::BadPbLimit(self.pb_limit));
        }
        if self.num_taylor_terms == 0 {
            return Err(ConfigError::ZeroTaylorTerms);
        }
        if self.conv_sampling == Some(0) {
            return Err(ConfigError::ZeroConvSampling);
        }
        if let FluxScaleScheme::Sault { const_pb, min_pb } = self.flux_scale {
            if !(min_pb > 0.0 && min_pb <= const_pb && const_pb <= 1.0) {
                return Err(ConfigError::BadSault { const_pb, min_pb });
            }
        }
        Ok(())
    }

    /// The normalisation type. Unrecognised strings fall back to flatsky.
    pub fn norm_type(&self) -> NormType {
        NormType::from_config_str(&self.norm_type)
    }

    /// The number of threads available for gridding before the region cap is
    /// applied.
    pub fn num_threads(&self) -> usize {
        self.num_threads
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    }

    /// The number of threads that region-partitioned gridding may use.
    pub fn grid_threads(&self) -> usize {
        let n = self.num_threads().min(self.max_grid_threads);
        if n < self.num_threads() {
            debug!(
                "Capping gridding threads at {} (of {} available)",
                n,
                self.num_threads()
            );
        }
        n.max(1)
    }

    /// Write this config as toml.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::TomlEncode(e.to_string()))
    }
}

impl NormType {
    /// Parse a normalisation type from a config string. Unknown strings are
    /// reported and treated as [`NormType::FlatSky`].
    pub fn from_config_str(s: &str) -> NormType {
        match NormType::from_str(&s.to_lowercase()) {
            Ok(n) => n,
            Err(_) => {
                warn!("Unknown normalisation type '{s}'; using {}", NormType::FlatSky);
                NormType::FlatSky
            }
        }
    }
}
