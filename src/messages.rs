//! Typed messages of the Abstract Beamline Interface.
//!
//! The external strategy engine and the beamline talk through a fixed
//! taxonomy of messages. Inbound payloads are modelled as the closed
//! [`MessagePayload`] enum; anything the connection layer cannot decode
//! arrives as [`MessagePayload::Unknown`] and terminates the dispatch
//! loop. Replies travel back through [`Reply`], tagged with the opaque
//! [`CorrelationId`] of the message that triggered them.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque token linking an inbound message to its eventual reply.
///
/// Correlation ids are minted by the external engine and passed through
/// unchanged; the orchestrator never inspects their contents.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        CorrelationId(value.to_string())
    }
}

/// Identity of a goniostat rotation setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RotationId(pub Uuid);

impl RotationId {
    pub fn new() -> Self {
        RotationId(Uuid::new_v4())
    }
}

impl Default for RotationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-axis angle map keyed by axis role name (e.g. "omega", "kappa", "phi").
pub type AxisSettings = FxHashMap<String, f64>;

/// A distinct goniostat rotation setting, possibly hosting several sweeps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoniostatRotation {
    pub id: RotationId,
    /// Rotation axis angles, keyed by axis role.
    pub axis_settings: AxisSettings,
    /// The axis that is scanned during acquisition.
    pub scan_axis: String,
    /// Translation already associated with this rotation, when the engine
    /// supplies one (stratcal output, in practice).
    pub translation: Option<GoniostatTranslation>,
}

/// Centred translation positions for one rotation setting.
///
/// Carries a non-owning back-reference to its rotation via `rotation_id`;
/// immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoniostatTranslation {
    pub rotation_id: RotationId,
    pub requested_rotation_id: Option<RotationId>,
    /// Translation axis positions, keyed by axis role.
    pub axis_settings: AxisSettings,
}

/// Beam setting: wavelength plus identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeamSetting {
    pub id: Uuid,
    /// Wavelength in Angstrom.
    pub wavelength: f64,
}

/// Detector setting in beamline-control terms.
///
/// `id` is `None` for a setting that has not (yet) been registered with
/// the engine; reusing the engine-supplied id asserts value continuity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BcsDetectorSetting {
    pub id: Option<Uuid>,
    /// Resolution at the detector edge, in Angstrom.
    pub resolution: f64,
    /// Beam centre on the detector face, in pixels.
    pub org_xy: (f64, f64),
    /// Detector distance, in mm.
    pub distance: f64,
}

/// A single continuous rotation scan at fixed beam and detector settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    pub goniostat_sweep_setting: GoniostatRotation,
    /// Scan-axis start angle, degrees.
    pub start: f64,
    /// Total sweep width, degrees.
    pub width: f64,
    pub detector_setting: BcsDetectorSetting,
    pub beam_setting: BeamSetting,
}

impl Sweep {
    /// Axis settings at the start of the sweep: the rotation's settings
    /// with the scan axis moved to the start angle.
    pub fn initial_settings(&self) -> AxisSettings {
        let mut settings = self.goniostat_sweep_setting.axis_settings.clone();
        settings.insert(self.goniostat_sweep_setting.scan_axis.clone(), self.start);
        settings
    }
}

/// Engine-supplied description of a geometric acquisition strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometricStrategy {
    pub id: Uuid,
    /// Sweeps in acquisition order.
    pub sweeps: Vec<Sweep>,
    pub default_beam_setting: Option<BeamSetting>,
    pub default_detector_setting: Option<BcsDetectorSetting>,
    pub is_interleaved: bool,
    /// Sweep settings may be edited by the user. Currently unimplemented
    /// on the beamline side and answered with a warning.
    pub is_user_modifiable: bool,
    /// Oscillation widths the engine will accept, degrees.
    pub allowed_widths: Vec<f64>,
    pub default_width_idx: Option<usize>,
}

impl GeometricStrategy {
    /// Sweeps in acquisition order.
    pub fn ordered_sweeps(&self) -> &[Sweep] {
        &self.sweeps
    }
}

/// Image count and width of one scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanWidth {
    pub num_images: u32,
    /// Width of a single image, degrees.
    pub image_width: f64,
}

/// Exposure of one scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanExposure {
    /// Exposure time per image, seconds.
    pub time: f64,
    /// Transmission as a 0..=1 fraction.
    pub transmission: f64,
}

/// One scan of a collection proposal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub sweep: Sweep,
    pub image_start_num: u32,
    /// Scan-axis start angle, degrees.
    pub start: f64,
    pub width: ScanWidth,
    pub exposure: ScanExposure,
    /// Filename construction parameters: "subdir", "run", "prefix",
    /// "inverse_beam_component_sign", "beam_setting_index",
    /// "gonio_setting_index".
    pub filename_params: FxHashMap<String, String>,
}

/// Engine-proposed sequence of scans to acquire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionProposal {
    pub id: Uuid,
    pub relative_image_dir: Option<String>,
    pub scans: Vec<Scan>,
}

/// Request to choose an indexing solution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChooseLattice {
    /// Solution table format tag. Only "IDXREF" is currently defined.
    pub format: String,
    /// Bravais lattice names to highlight.
    pub lattices: Vec<String>,
    /// Crystal system letter, highlighted when no lattices are given.
    pub crystal_system: Option<String>,
    /// Raw multi-line solution table.
    pub solutions: String,
}

/// Request to centre the sample at one of a series of rotations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestCentring {
    pub current_setting_no: u32,
    pub total_rotations: u32,
    pub goniostat_rotation: GoniostatRotation,
}

/// Notification that a named engine subprocess has started.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubprocessStarted {
    pub name: String,
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// Payload of an inbound engine message, one variant per message type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MessagePayload {
    /// Free text to log ("String" on the wire).
    Info(String),
    SubprocessStarted(SubprocessStarted),
    SubprocessStopped,
    RequestConfiguration,
    GeometricStrategy(GeometricStrategy),
    CollectionProposal(CollectionProposal),
    ChooseLattice(ChooseLattice),
    RequestCentring(RequestCentring),
    PrepareForCentring,
    ObtainPriorInformation,
    WorkflowAborted,
    WorkflowCompleted,
    WorkflowFailed,
    /// A message type the connection layer did not recognise. Fatal to
    /// the dispatch loop.
    Unknown { tag: String },
}

impl MessagePayload {
    /// The wire-level message type tag.
    pub fn message_type(&self) -> &str {
        match self {
            MessagePayload::Info(_) => "String",
            MessagePayload::SubprocessStarted(_) => "SubprocessStarted",
            MessagePayload::SubprocessStopped => "SubprocessStopped",
            MessagePayload::RequestConfiguration => "RequestConfiguration",
            MessagePayload::GeometricStrategy(_) => "GeometricStrategy",
            MessagePayload::CollectionProposal(_) => "CollectionProposal",
            MessagePayload::ChooseLattice(_) => "ChooseLattice",
            MessagePayload::RequestCentring(_) => "RequestCentring",
            MessagePayload::PrepareForCentring => "PrepareForCentring",
            MessagePayload::ObtainPriorInformation => "ObtainPriorInformation",
            MessagePayload::WorkflowAborted => "WorkflowAborted",
            MessagePayload::WorkflowCompleted => "WorkflowCompleted",
            MessagePayload::WorkflowFailed => "WorkflowFailed",
            MessagePayload::Unknown { tag } => tag.as_str(),
        }
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Answer to a RequestConfiguration message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationData {
    /// Directory holding the beamline configuration files.
    pub location: PathBuf,
}

/// One wavelength with its phasing role tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhasingWavelength {
    /// Wavelength in Angstrom.
    pub wavelength: f64,
    pub role: String,
}

/// Reply to a GeometricStrategy: centrings done, beamline set up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleCentred {
    pub goniostat_translations: Vec<GoniostatTranslation>,
    pub wavelengths: Vec<PhasingWavelength>,
    pub detector_setting: BcsDetectorSetting,
    /// Oscillation width per image, degrees.
    pub image_width: Option<f64>,
    /// Exposure time per image, seconds.
    pub exposure: Option<f64>,
    /// Transmission as a 0..=1 fraction.
    pub transmission: Option<f64>,
    /// Images per interleave wedge.
    pub wedge_width: Option<u32>,
    pub interleave_order: Option<String>,
}

/// Reply to a CollectionProposal once acquisition has run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDone {
    /// 0 on success, 1 on queue failure.
    pub status: i32,
    pub proposal_id: Uuid,
}

/// Reply to a ChooseLattice with the operator's pick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedLattice {
    pub format: String,
    /// Whitespace-split tokens of the selected solution line, leading
    /// "*" marker stripped.
    pub solution: Vec<String>,
}

/// Completion state of a centring request series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CentringStatus {
    /// This was the last rotation of the series.
    Done,
    /// Further rotations remain.
    Next,
}

impl CentringStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CentringStatus::Done => "DONE",
            CentringStatus::Next => "NEXT",
        }
    }
}

/// Reply to a RequestCentring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CentringDone {
    pub status: CentringStatus,
    pub timestamp: DateTime<Utc>,
    pub goniostat_translation: GoniostatTranslation,
}

/// Crystallographic unit cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// Sample information supplied by the user rather than measured.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProvidedInfo {
    pub scatterers: Vec<String>,
    pub lattice: Option<String>,
    pub point_group: Option<String>,
    pub space_group: Option<u32>,
    pub cell: Option<UnitCell>,
    pub expected_resolution: Option<f64>,
    pub is_anisotropic: Option<bool>,
}

/// Reply to an ObtainPriorInformation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriorInformation {
    pub sample_id: Uuid,
    pub sample_name: String,
    pub root_directory: PathBuf,
    pub user_provided_info: UserProvidedInfo,
}

/// Reply value returned by a message handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    ConfigurationData(ConfigurationData),
    SampleCentred(SampleCentred),
    CollectionDone(CollectionDone),
    SelectedLattice(SelectedLattice),
    CentringDone(CentringDone),
    ReadyForCentring,
    PriorInformation(PriorInformation),
}
