//! Orchestrator configuration: beamline config directory, calibration
//! file paths, goniostat axis roles and acquisition defaults.
//!
//! Axis role names are read from `instrumentation.nml` at load time;
//! they are required. The translation-calibration file (`transcal.nml`)
//! is optional and queried lazily, because its absence only disables
//! recentring.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;
use tracing::warn;

use crate::nml;

/// Namelist group name shared by all three calibration files.
pub const INSTRUMENT_GROUP: &str = "sdcp_instrument_list";

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Nml(#[from] nml::NmlError),

    #[error("instrumentation file {path} lacks '{key}'")]
    #[diagnostic(
        code(gphl_workflow::config::missing_key),
        help("gonio_axis_names and gonio_centring_axis_names are required.")
    )]
    MissingKey { path: String, key: String },
}

/// Standard configurable file paths under the beamline config directory.
#[derive(Clone, Debug)]
pub struct FilePaths {
    pub beamline_config: PathBuf,
    pub transcal: PathBuf,
    pub diffractcal: PathBuf,
    pub instrumentation: PathBuf,
}

impl FilePaths {
    pub fn new(beamline_config: impl Into<PathBuf>) -> Self {
        let beamline_config = beamline_config.into();
        Self {
            transcal: beamline_config.join("transcal.nml"),
            diffractcal: beamline_config.join("diffractcal.nml"),
            instrumentation: beamline_config.join("instrumentation.nml"),
            beamline_config,
        }
    }
}

/// Home position and sphere-of-confusion cross-section from
/// `transcal.nml`; the seed for recentring calibration.
#[derive(Clone, Debug, PartialEq)]
pub struct TranscalParameters {
    pub home_position: Vec<f64>,
    pub cross_sec_of_soc: f64,
}

/// Static configuration of the workflow orchestrator.
#[derive(Clone, Debug)]
pub struct GphlConfig {
    pub file_paths: FilePaths,
    /// Rotation axis role names, ordered from holder towards sample.
    pub rotation_axis_roles: Vec<String>,
    /// Translation axis role names.
    pub translation_axis_roles: Vec<String>,
    /// Fallback oscillation widths when the strategy supplies none.
    pub default_image_widths: Vec<f64>,
    /// Default for the centre-at-start question.
    pub centre_at_start: bool,
    /// Default for the centre-before-sweep question.
    pub centre_before_sweep: bool,
    /// Path of the external geometry solver ("recen").
    pub recen_executable: PathBuf,
    /// Value of the BDG_home environment variable passed to the solver.
    pub bdg_home: PathBuf,
}

impl GphlConfig {
    /// Load configuration rooted at the beamline config directory,
    /// reading axis roles from `instrumentation.nml`.
    pub fn load(
        beamline_config: impl Into<PathBuf>,
        recen_executable: impl Into<PathBuf>,
        bdg_home: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let file_paths = FilePaths::new(beamline_config);
        let instrument = nml::read_group(&file_paths.instrumentation, INSTRUMENT_GROUP)?;
        let rotation_axis_roles = required_strings(&instrument, &file_paths, "gonio_axis_names")?;
        let translation_axis_roles =
            required_strings(&instrument, &file_paths, "gonio_centring_axis_names")?;
        Ok(Self {
            file_paths,
            rotation_axis_roles,
            translation_axis_roles,
            default_image_widths: vec![0.1, 0.2, 0.5, 1.0],
            centre_at_start: false,
            centre_before_sweep: false,
            recen_executable: recen_executable.into(),
            bdg_home: bdg_home.into(),
        })
    }

    /// Load configuration from the environment. `.env` files are honoured
    /// via dotenvy. Expected variables: `GPHL_BEAMLINE_CONFIG`,
    /// `GPHL_RECEN_EXECUTABLE`, `GPHL_BDG_HOME`, and optionally
    /// `GPHL_DEFAULT_IMAGE_WIDTHS` (whitespace-separated degrees).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let beamline_config = std::env::var("GPHL_BEAMLINE_CONFIG").unwrap_or_default();
        let recen = std::env::var("GPHL_RECEN_EXECUTABLE").unwrap_or_default();
        let bdg_home = std::env::var("GPHL_BDG_HOME").unwrap_or_default();
        let mut config = Self::load(beamline_config, recen, bdg_home)?;
        if let Ok(widths) = std::env::var("GPHL_DEFAULT_IMAGE_WIDTHS") {
            let parsed: Vec<f64> = widths
                .split_whitespace()
                .filter_map(|w| w.parse().ok())
                .collect();
            if !parsed.is_empty() {
                config.default_image_widths = parsed;
            }
        }
        Ok(config)
    }

    /// Load `home_position` and `cross_sec_of_soc` from `transcal.nml`.
    ///
    /// Returns `None` when the file is absent or incomplete; recentring
    /// is then unavailable and the caller falls back to physical
    /// centring. Always logged, never fatal.
    pub fn load_transcal_parameters(&self) -> Option<TranscalParameters> {
        let path = &self.file_paths.transcal;
        if !path.is_file() {
            warn!(path = %path.display(), "transcal.nml file not found");
            return None;
        }
        let group = match nml::read_group(path, INSTRUMENT_GROUP) {
            Ok(group) => group,
            Err(error) => {
                warn!(path = %path.display(), %error, "error reading transcal.nml file");
                return None;
            }
        };
        let home_position = group.floats("trans_home");
        let cross_sec_of_soc = group.float("trans_cross_sec_of_soc");
        match (home_position, cross_sec_of_soc) {
            (Some(home_position), Some(cross_sec_of_soc)) => Some(TranscalParameters {
                home_position,
                cross_sec_of_soc,
            }),
            _ => {
                warn!(path = %path.display(), "load_transcal_parameters failed");
                None
            }
        }
    }

    /// Rotation axis direction vectors for the solver input: prefer the
    /// diffraction calibration file, fall back to `instrumentation.nml`.
    pub fn gonio_axis_dirs(&self) -> Result<Vec<f64>, ConfigError> {
        match nml::read_group(&self.file_paths.diffractcal, INSTRUMENT_GROUP) {
            Ok(group) => {
                if let Some(dirs) = group.floats("gonio_axis_dirs") {
                    return Ok(dirs);
                }
                tracing::debug!(
                    path = %self.file_paths.diffractcal.display(),
                    "diffractcal file lacks gonio_axis_dirs - using instrumentation.nml"
                );
            }
            Err(_) => {
                tracing::debug!(
                    path = %self.file_paths.diffractcal.display(),
                    "diffractcal file not present - using instrumentation.nml"
                );
            }
        }
        let instrument = nml::read_group(&self.file_paths.instrumentation, INSTRUMENT_GROUP)?;
        instrument
            .floats("gonio_axis_dirs")
            .ok_or_else(|| ConfigError::MissingKey {
                path: self.file_paths.instrumentation.display().to_string(),
                key: "gonio_axis_dirs".to_string(),
            })
    }

    /// Centring axis direction vectors from `instrumentation.nml`.
    pub fn gonio_centring_axis_dirs(&self) -> Result<Vec<f64>, ConfigError> {
        let instrument = nml::read_group(&self.file_paths.instrumentation, INSTRUMENT_GROUP)?;
        instrument
            .floats("gonio_centring_axis_dirs")
            .ok_or_else(|| ConfigError::MissingKey {
                path: self.file_paths.instrumentation.display().to_string(),
                key: "gonio_centring_axis_dirs".to_string(),
            })
    }
}

fn required_strings(
    group: &nml::NmlGroup,
    file_paths: &FilePaths,
    key: &str,
) -> Result<Vec<String>, ConfigError> {
    group
        .strings(key)
        .filter(|names| !names.is_empty())
        .ok_or_else(|| ConfigError::MissingKey {
            path: file_paths.instrumentation.display().to_string(),
            key: key.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_instrumentation(dir: &Path) {
        fs::write(
            dir.join("instrumentation.nml"),
            "&sdcp_instrument_list\n\
             gonio_axis_names = 'omega' 'kappa' 'phi'\n\
             gonio_centring_axis_names = 'sampx' 'sampy' 'phiy'\n\
             gonio_axis_dirs = 1 0 0 0 1 0 0 0 1\n\
             gonio_centring_axis_dirs = 1 0 0 0 1 0 0 0 1\n\
             /\n",
        )
        .unwrap();
    }

    #[test]
    fn load_reads_axis_roles() {
        let dir = tempfile::tempdir().unwrap();
        write_instrumentation(dir.path());
        let config = GphlConfig::load(dir.path(), "/usr/bin/recen", "/opt/bdg").unwrap();
        assert_eq!(config.rotation_axis_roles, vec!["omega", "kappa", "phi"]);
        assert_eq!(
            config.translation_axis_roles,
            vec!["sampx", "sampy", "phiy"]
        );
    }

    #[test]
    fn transcal_absent_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        write_instrumentation(dir.path());
        let config = GphlConfig::load(dir.path(), "recen", "bdg").unwrap();
        assert_eq!(config.load_transcal_parameters(), None);
    }

    #[test]
    fn transcal_present_yields_parameters() {
        let dir = tempfile::tempdir().unwrap();
        write_instrumentation(dir.path());
        fs::write(
            dir.path().join("transcal.nml"),
            "&sdcp_instrument_list\n\
             trans_home = 0.1 0.2 0.3\n\
             trans_cross_sec_of_soc = 0.02\n\
             /\n",
        )
        .unwrap();
        let config = GphlConfig::load(dir.path(), "recen", "bdg").unwrap();
        let transcal = config.load_transcal_parameters().unwrap();
        assert_eq!(transcal.home_position, vec![0.1, 0.2, 0.3]);
        assert_eq!(transcal.cross_sec_of_soc, 0.02);
    }

    #[test]
    fn diffractcal_takes_precedence_for_axis_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write_instrumentation(dir.path());
        fs::write(
            dir.path().join("diffractcal.nml"),
            "&sdcp_instrument_list\n\
             gonio_axis_dirs = 0 0 1 0 1 0 1 0 0\n\
             /\n",
        )
        .unwrap();
        let config = GphlConfig::load(dir.path(), "recen", "bdg").unwrap();
        let dirs = config.gonio_axis_dirs().unwrap();
        assert_eq!(dirs[..3], [0.0, 0.0, 1.0]);
    }
}
