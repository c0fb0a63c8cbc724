//! Recentring prediction via the external geometry solver.
//!
//! Given a reference orientation with a measured centring, the solver
//! predicts translation positions for a new orientation, saving a
//! physical re-centring. Solver failures are reported and degrade to an
//! empty result; they never crash the run.

use std::path::Path;

use rustc_hash::FxHashMap;
use tokio::process::Command;
use tracing::{debug, error};

use crate::config::{GphlConfig, TranscalParameters};
use crate::nml::NmlGroup;

/// Output marker of a successful solver run.
const NORMAL_TERMINATION: &str = "NORMAL termination";

/// An omega/kappa/phi angular triple identifying a goniostat rotation.
pub type Okp = [f64; 3];

/// Calibration context seeded from the first physical centring of a run
/// and reused for every later recentring in the same run.
#[derive(Clone, Debug, PartialEq)]
pub struct RecentringContext {
    /// Translation calibration home position.
    pub home_position: Vec<f64>,
    /// Cross-section of the sphere of confusion.
    pub cross_sec_of_soc: f64,
    /// Reference omega/kappa/phi triple.
    pub ref_okp: Okp,
    /// Translation position measured at the reference orientation.
    pub ref_xyz: [f64; 3],
}

impl RecentringContext {
    pub fn new(transcal: TranscalParameters, ref_okp: Okp, ref_xyz: [f64; 3]) -> Self {
        Self {
            home_position: transcal.home_position,
            cross_sec_of_soc: transcal.cross_sec_of_soc,
            ref_okp,
            ref_xyz,
        }
    }
}

/// Predict translation positions for the target orientation.
///
/// Returns translation-axis-role to coordinate, or an empty map when the
/// solver fails in any way (non-zero exit, missing termination marker,
/// unparseable output). Failures are logged, not raised, so callers can
/// fall back to physical centring.
pub async fn calculate_recentring(
    config: &GphlConfig,
    process_directory: &Path,
    okp: Okp,
    context: &RecentringContext,
) -> FxHashMap<String, f64> {
    let input_path = process_directory.join("temp_recen.in");
    let input = match build_solver_input(config, context) {
        Ok(group) => group.render(),
        Err(error) => {
            error!(%error, "cannot assemble recen input");
            return FxHashMap::default();
        }
    };
    if let Err(error) = tokio::fs::write(&input_path, input).await {
        error!(path = %input_path.display(), %error, "cannot write recen input file");
        return FxHashMap::default();
    }

    let mut command = Command::new(&config.recen_executable);
    command
        .arg("--input")
        .arg(&input_path)
        .arg("--init-xyz")
        .arg(triple(&context.ref_xyz))
        .arg("--init-okp")
        .arg(triple(&context.ref_okp))
        .arg("--okp")
        .arg(triple(&okp))
        .env_clear()
        .env("BDG_home", &config.bdg_home);
    debug!(executable = %config.recen_executable.display(), "running recen command");

    let output = match command.output().await {
        Ok(output) => output,
        Err(error) => {
            error!(
                executable = %config.recen_executable.display(),
                %error,
                "recen could not be spawned"
            );
            return FxHashMap::default();
        }
    };

    // The solver writes diagnostics to both streams; scan them together.
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        error!(
            status = %output.status,
            output = %text,
            "recen failed with non-zero returncode"
        );
        return FxHashMap::default();
    }

    match parse_solver_output(&text, &config.translation_axis_roles) {
        Some(result) => result,
        None => {
            error!(output = %text, "recen failed without normal termination");
            FxHashMap::default()
        }
    }
}

/// Assemble the namelist input: rotation axis directions from the
/// diffraction calibration (falling back to instrumentation), centring
/// axis directions, sphere-of-confusion cross-section and home position.
fn build_solver_input(
    config: &GphlConfig,
    context: &RecentringContext,
) -> Result<NmlGroup, crate::config::ConfigError> {
    let axis_dirs = config.gonio_axis_dirs()?;
    let centring_dirs = config.gonio_centring_axis_dirs()?;
    let mut group = NmlGroup::new("recen_list");
    group.set_floats("omega_axis", axis_dirs.iter().take(3).copied());
    group.set_floats("kappa_axis", axis_dirs.iter().skip(3).take(3).copied());
    group.set_floats("phi_axis", axis_dirs.iter().skip(6).copied());
    group.set_floats("trans_1_axis", centring_dirs.iter().take(3).copied());
    group.set_floats("trans_2_axis", centring_dirs.iter().skip(3).take(3).copied());
    group.set_floats("trans_3_axis", centring_dirs.iter().skip(6).copied());
    group.set_float("cross_sec_of_soc", context.cross_sec_of_soc);
    group.set_floats("home", context.home_position.iter().copied());
    Ok(group)
}

/// Scan backwards for the termination marker, then for the "X,Y,Z" line
/// whose trailing three tokens are the solved coordinates.
fn parse_solver_output(
    output: &str,
    translation_axis_roles: &[String],
) -> Option<FxHashMap<String, f64>> {
    let mut terminated_ok = false;
    for line in output.lines().rev() {
        let trimmed = line.trim();
        if terminated_ok {
            if trimmed.contains("X,Y,Z") {
                let tokens: Vec<&str> = trimmed.split_whitespace().collect();
                if tokens.len() < 3 {
                    return None;
                }
                let mut result = FxHashMap::default();
                for (role, token) in translation_axis_roles
                    .iter()
                    .zip(&tokens[tokens.len() - 3..])
                {
                    result.insert(role.clone(), token.parse::<f64>().ok()?);
                }
                return Some(result);
            }
        } else if trimmed == NORMAL_TERMINATION {
            terminated_ok = true;
        }
    }
    None
}

fn triple(values: &[f64; 3]) -> String {
    format!("{} {} {}", values[0], values[1], values[2])
}
