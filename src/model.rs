//! Per-run workflow data model.
//!
//! Holds everything about the current workflow run that is not owned by
//! a collaborator: sample description, acquisition bookkeeping, path
//! template, and the lattice-selection flag that separates
//! characterisation from final collection.

use std::path::PathBuf;

use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::messages::UnitCell;

/// Wavelength placeholder for calibration workflows with no wavelength
/// set.
pub const DUMMY_WAVELENGTH: f64 = 999.999;

/// File-naming template for the run. All fields are plain values, so the
/// per-scan copies taken during collection are cheap clones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathTemplate {
    pub directory: PathBuf,
    pub process_directory: PathBuf,
    pub archive_directory: PathBuf,
    pub base_prefix: String,
    /// Beam-setting index component of the prefix (interleaving).
    pub mad_prefix: String,
    /// Goniostat-setting index component of the prefix.
    pub wedge_prefix: String,
    pub run_number: u32,
    pub start_num: u32,
    pub num_files: u32,
}

impl PathTemplate {
    /// Collection prefix: the non-empty prefix components joined by "_".
    pub fn prefix(&self) -> String {
        [&self.base_prefix, &self.mad_prefix, &self.wedge_prefix]
            .iter()
            .filter(|part| !part.is_empty())
            .map(|part| part.as_str())
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Sample identity as known to the sample tracking layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleModel {
    pub name: Option<String>,
    pub code: Option<String>,
    pub lims_code: Option<String>,
}

impl SampleModel {
    /// Candidate strings that may already carry the sample UUID, in
    /// lookup order.
    pub fn id_candidates(&self) -> impl Iterator<Item = &str> {
        [&self.lims_code, &self.code, &self.name]
            .into_iter()
            .flatten()
            .map(|s| s.as_str())
    }
}

/// Container for the centring and collection queue entries generated for
/// one workflow run. Non-null only while the run is in its
/// setup/collection phase.
#[derive(Clone, Debug, PartialEq)]
pub struct DataCollectionGroup {
    pub id: Uuid,
    pub name: String,
    pub number: u32,
}

impl DataCollectionGroup {
    pub fn new(name: impl Into<String>, number: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            number,
        }
    }
}

/// The workflow run's data model.
#[derive(Clone, Debug, Default)]
pub struct WorkflowModel {
    /// Workflow type tag, e.g. "acquisition" or "diffractcal".
    pub workflow_type: String,
    /// True once an indexing solution has been chosen; separates
    /// characterisation from final collection.
    pub lattice_selected: bool,
    /// Beam-energy role tags, in configured order.
    pub beam_energy_roles: Vec<String>,
    /// Interleave order code, e.g. "gs" for goniostat-setting-major.
    pub interleave_order: String,
    /// Crystal snapshots to take per centring/collection.
    pub snapshot_count: u32,
    /// Whether the operator asked to recentre before each sweep.
    pub centre_before_sweep: bool,
    /// Resolution measured after the strategy's detector preset.
    pub detector_resolution: Option<f64>,
    pub path_template: PathTemplate,
    /// Base image directory of the session; the engine's root directory
    /// for prior information.
    pub image_root_directory: PathBuf,
    pub sample: SampleModel,
    pub cell_parameters: Option<UnitCell>,
    /// Space-group number, as resolved by the sample tracking layer.
    pub space_group_number: Option<u32>,
    pub point_group: Option<String>,
    pub crystal_system: Option<String>,
    next_numbers: FxHashMap<String, u32>,
}

impl WorkflowModel {
    /// True for translational/diffraction calibration workflows.
    pub fn is_calibration(&self) -> bool {
        self.workflow_type.to_lowercase().contains("calibration")
    }

    /// Next sequence number for a named task group.
    pub fn next_number_for_name(&mut self, name: &str) -> u32 {
        let counter = self.next_numbers.entry(name.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}
