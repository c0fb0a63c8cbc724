//! Collaborator interfaces consumed by the orchestrator.
//!
//! The beamline queue, the hardware actuators and the engine connection
//! are external systems; the orchestrator sees them only through these
//! traits. Device protocols, queue persistence and LIMS storage live on
//! the other side of this boundary.

use std::path::Path;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::messages::AxisSettings;
use crate::model::{DataCollectionGroup, WorkflowModel};

/// Planck constant times speed of light over elementary charge:
/// wavelength (Angstrom) = H_OVER_E / energy (keV).
pub const H_OVER_E: f64 = 12.398_419_843_3;

#[derive(Debug, Error, Diagnostic)]
pub enum BeamlineError {
    #[error("beamline queue error: {0}")]
    #[diagnostic(code(gphl_workflow::beamline::queue))]
    Queue(String),

    #[error("beamline hardware error: {0}")]
    #[diagnostic(code(gphl_workflow::beamline::hardware))]
    Hardware(String),
}

/// Handle to a queued-but-not-executed queue entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueEntryHandle(pub Uuid);

/// Result of reading back a centring execution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CentredPosition {
    /// Motor role name to centred position.
    pub positions: FxHashMap<String, f64>,
}

/// Final status of an executed queue entry or group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueExecutionStatus {
    Success,
    Failed,
}

/// Default acquisition parameters supplied by the beamline setup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AcquisitionDefaults {
    /// Transmission in percent.
    pub transmission: f64,
    /// Exposure time in seconds.
    pub exposure_time: f64,
}

/// One data collection to enqueue, fully resolved from a proposal scan.
#[derive(Clone, Debug, PartialEq)]
pub struct DataCollectionTask {
    pub name: String,
    pub run_number: u32,
    pub first_image: u32,
    pub num_images: u32,
    /// Oscillation start angle, degrees.
    pub osc_start: f64,
    /// Oscillation range per image, degrees.
    pub osc_range: f64,
    /// Exposure time per image, seconds.
    pub exp_time: f64,
    pub num_passes: u32,
    /// Detector distance in mm; resolution is derived from it.
    pub detector_distance: f64,
    /// Energy in keV.
    pub energy: f64,
    /// Transmission in percent.
    pub transmission: f64,
    pub inverse_beam: bool,
    /// Crystal snapshots to take before this collection.
    pub take_snapshots: u32,
    /// Fixed centred position to collect at; `None` when a centring was
    /// enqueued ahead of this collection instead.
    pub centred_position: Option<AxisSettings>,
    pub image_directory: std::path::PathBuf,
    pub process_directory: std::path::PathBuf,
}

/// The beamline queue, reduced to the operations the orchestrator needs.
#[async_trait]
pub trait BeamlineQueue: Send + Sync {
    /// Create a sample-centring entry under `group`, parameterised by
    /// target motor positions, without executing it.
    async fn enqueue_centring(
        &self,
        group: &DataCollectionGroup,
        motor_settings: &AxisSettings,
    ) -> Result<QueueEntryHandle, BeamlineError>;

    /// Execute a previously enqueued centring entry synchronously and
    /// read back the centred position, if any was recorded.
    async fn execute_centring(
        &self,
        entry: QueueEntryHandle,
    ) -> Result<Option<CentredPosition>, BeamlineError>;

    /// Add a data collection under `group` without executing it.
    async fn enqueue_collection(
        &self,
        group: &DataCollectionGroup,
        task: DataCollectionTask,
    ) -> Result<(), BeamlineError>;

    /// Execute all remaining entries of `group`, returning the final
    /// status. Timeout and retry policy are the queue's business.
    async fn execute_group(
        &self,
        group: &DataCollectionGroup,
    ) -> Result<QueueExecutionStatus, BeamlineError>;
}

/// Beamline hardware actuators and cameras.
#[async_trait]
pub trait BeamlineHardware: Send + Sync {
    /// Current energy in keV.
    async fn get_energy(&self) -> Result<f64, BeamlineError>;

    /// Move energy and wait for the value to settle.
    async fn set_energy(&self, kev: f64) -> Result<(), BeamlineError>;

    /// Move to a wavelength in Angstrom and wait for it to settle.
    async fn set_wavelength(&self, angstrom: f64) -> Result<(), BeamlineError>;

    /// Current resolution at the detector edge, in Angstrom.
    async fn get_resolution(&self) -> Result<f64, BeamlineError>;

    /// Move the detector to give the requested resolution; waits ready.
    async fn set_resolution(&self, angstrom: f64) -> Result<(), BeamlineError>;

    /// Current detector distance in mm.
    async fn get_detector_distance(&self) -> Result<f64, BeamlineError>;

    /// Move the detector to a distance in mm; waits ready.
    async fn move_detector(&self, mm: f64) -> Result<(), BeamlineError>;

    /// Beam centre on the detector face, in pixels.
    async fn get_beam_centre(&self) -> Result<(f64, f64), BeamlineError>;

    /// Default acquisition parameters from the beamline setup.
    async fn acquisition_defaults(&self) -> Result<AcquisitionDefaults, BeamlineError>;

    /// Move a set of named motors and wait for them.
    async fn move_motors(&self, settings: &AxisSettings) -> Result<(), BeamlineError>;

    /// Rotate omega by a relative angle in degrees.
    async fn move_omega_relative(&self, degrees: f64) -> Result<(), BeamlineError>;

    /// Store a crystal snapshot at `path`.
    async fn take_snapshot(&self, path: &Path) -> Result<(), BeamlineError>;

    /// Whether a zoom actuator is configured at all.
    fn has_zoom_actuator(&self) -> bool;

    /// Predefined zoom positions, smallest magnification first. Empty
    /// when the actuator has none.
    async fn zoom_predefined_positions(&self) -> Result<Vec<String>, BeamlineError>;

    /// Move the zoom actuator to a predefined position.
    async fn zoom_to_position(&self, position: &str) -> Result<(), BeamlineError>;
}

/// Connection to the external workflow engine process.
#[async_trait]
pub trait WorkflowConnection: Send + Sync {
    /// Open the connection. Called once at session start.
    async fn open_connection(&self);

    /// Fork off the engine-side workflow run for the given data model.
    /// Inbound messages are pushed through `sender` from here on,
    /// terminated by the end-of-stream sentinel.
    async fn start_workflow(&self, sender: crate::channel::MessageSender, model: &WorkflowModel);

    /// Ask the engine to stop the current workflow. Must not block
    /// indefinitely.
    async fn abort_workflow(&self, reason: Option<String>);

    /// Notify the engine side that the workflow run has ended.
    async fn workflow_ended(&self);

    /// Close the connection. Triggered on program quit.
    async fn close_connection(&self);
}
