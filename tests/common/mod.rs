//! Shared mock collaborators for orchestrator integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use gphl_workflow::beamline::{
    AcquisitionDefaults, BeamlineError, BeamlineHardware, BeamlineQueue, CentredPosition,
    DataCollectionTask, QueueEntryHandle, QueueExecutionStatus, WorkflowConnection, H_OVER_E,
};
use gphl_workflow::channel::{MessageSender, WorkflowMessage};
use gphl_workflow::config::GphlConfig;
use gphl_workflow::events::{EventBus, MemorySink};
use gphl_workflow::messages::{
    AxisSettings, BcsDetectorSetting, BeamSetting, GeometricStrategy, GoniostatRotation,
    RotationId, Sweep,
};
use gphl_workflow::model::{DataCollectionGroup, WorkflowModel};
use gphl_workflow::orchestrator::GphlOrchestrator;
use gphl_workflow::ui::{ParameterGateway, ParameterValues, ParametersRequest};

pub const TRANSLATION_ROLES: [&str; 3] = ["sampx", "sampy", "phiy"];

pub fn write_instrumentation(dir: &Path) {
    std::fs::write(
        dir.join("instrumentation.nml"),
        "&sdcp_instrument_list\n\
         gonio_axis_names = 'omega' 'kappa' 'phi'\n\
         gonio_centring_axis_names = 'sampx' 'sampy' 'phiy'\n\
         gonio_axis_dirs = 1 0 0 0 1 0 0 0 1\n\
         gonio_centring_axis_dirs = 1 0 0 0 1 0 0 0 1\n\
         /\n",
    )
    .expect("write instrumentation.nml");
}

pub fn write_transcal(dir: &Path) {
    std::fs::write(
        dir.join("transcal.nml"),
        "&sdcp_instrument_list\n\
         trans_home = 0.0 0.0 0.0\n\
         trans_cross_sec_of_soc = 0.02\n\
         /\n",
    )
    .expect("write transcal.nml");
}

#[derive(Default)]
pub struct MockQueue {
    pub enqueued_centrings: Mutex<Vec<(QueueEntryHandle, AxisSettings)>>,
    pub executed_centrings: Mutex<Vec<QueueEntryHandle>>,
    pub collections: Mutex<Vec<DataCollectionTask>>,
    /// Position returned by centring executions; `None` simulates a
    /// centring with no result.
    pub centring_positions: Mutex<Option<FxHashMap<String, f64>>>,
    pub fail_group: Mutex<bool>,
}

impl MockQueue {
    pub fn new() -> Self {
        let mut positions = FxHashMap::default();
        for (index, role) in TRANSLATION_ROLES.iter().enumerate() {
            positions.insert((*role).to_string(), 0.1 * (index + 1) as f64);
        }
        Self {
            centring_positions: Mutex::new(Some(positions)),
            ..Default::default()
        }
    }

    pub fn without_centring_result() -> Self {
        Self {
            centring_positions: Mutex::new(None),
            ..Default::default()
        }
    }
}

#[async_trait]
impl BeamlineQueue for MockQueue {
    async fn enqueue_centring(
        &self,
        _group: &DataCollectionGroup,
        motor_settings: &AxisSettings,
    ) -> Result<QueueEntryHandle, BeamlineError> {
        let handle = QueueEntryHandle(Uuid::new_v4());
        self.enqueued_centrings
            .lock()
            .unwrap()
            .push((handle, motor_settings.clone()));
        Ok(handle)
    }

    async fn execute_centring(
        &self,
        entry: QueueEntryHandle,
    ) -> Result<Option<CentredPosition>, BeamlineError> {
        self.executed_centrings.lock().unwrap().push(entry);
        Ok(self
            .centring_positions
            .lock()
            .unwrap()
            .clone()
            .map(|positions| CentredPosition { positions }))
    }

    async fn enqueue_collection(
        &self,
        _group: &DataCollectionGroup,
        task: DataCollectionTask,
    ) -> Result<(), BeamlineError> {
        self.collections.lock().unwrap().push(task);
        Ok(())
    }

    async fn execute_group(
        &self,
        _group: &DataCollectionGroup,
    ) -> Result<QueueExecutionStatus, BeamlineError> {
        if *self.fail_group.lock().unwrap() {
            Ok(QueueExecutionStatus::Failed)
        } else {
            Ok(QueueExecutionStatus::Success)
        }
    }
}

pub struct MockHardware {
    pub energy: Mutex<f64>,
    pub resolution: Mutex<f64>,
    pub distance: Mutex<f64>,
    pub log: Mutex<Vec<String>>,
    pub has_zoom: bool,
    pub zoom_positions: Vec<String>,
}

impl Default for MockHardware {
    fn default() -> Self {
        Self {
            energy: Mutex::new(12.4),
            resolution: Mutex::new(2.0),
            distance: Mutex::new(250.0),
            log: Mutex::new(Vec::new()),
            has_zoom: true,
            zoom_positions: vec!["Zoom 1".to_string(), "Zoom 6".to_string()],
        }
    }
}

impl MockHardware {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    pub fn logged(&self, prefix: &str) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BeamlineHardware for MockHardware {
    async fn get_energy(&self) -> Result<f64, BeamlineError> {
        Ok(*self.energy.lock().unwrap())
    }

    async fn set_energy(&self, kev: f64) -> Result<(), BeamlineError> {
        *self.energy.lock().unwrap() = kev;
        self.record(format!("set_energy {kev}"));
        Ok(())
    }

    async fn set_wavelength(&self, angstrom: f64) -> Result<(), BeamlineError> {
        *self.energy.lock().unwrap() = H_OVER_E / angstrom;
        self.record(format!("set_wavelength {angstrom}"));
        Ok(())
    }

    async fn get_resolution(&self) -> Result<f64, BeamlineError> {
        Ok(*self.resolution.lock().unwrap())
    }

    async fn set_resolution(&self, angstrom: f64) -> Result<(), BeamlineError> {
        *self.resolution.lock().unwrap() = angstrom;
        self.record(format!("set_resolution {angstrom}"));
        Ok(())
    }

    async fn get_detector_distance(&self) -> Result<f64, BeamlineError> {
        Ok(*self.distance.lock().unwrap())
    }

    async fn move_detector(&self, mm: f64) -> Result<(), BeamlineError> {
        *self.distance.lock().unwrap() = mm;
        self.record(format!("move_detector {mm}"));
        Ok(())
    }

    async fn get_beam_centre(&self) -> Result<(f64, f64), BeamlineError> {
        Ok((1024.0, 1040.0))
    }

    async fn acquisition_defaults(&self) -> Result<AcquisitionDefaults, BeamlineError> {
        Ok(AcquisitionDefaults {
            transmission: 10.0,
            exposure_time: 0.04,
        })
    }

    async fn move_motors(&self, settings: &AxisSettings) -> Result<(), BeamlineError> {
        let mut keys: Vec<&String> = settings.keys().collect();
        keys.sort();
        self.record(format!("move_motors {keys:?}"));
        Ok(())
    }

    async fn move_omega_relative(&self, degrees: f64) -> Result<(), BeamlineError> {
        self.record(format!("move_omega_relative {degrees}"));
        Ok(())
    }

    async fn take_snapshot(&self, path: &Path) -> Result<(), BeamlineError> {
        self.record(format!("take_snapshot {}", path.display()));
        Ok(())
    }

    fn has_zoom_actuator(&self) -> bool {
        self.has_zoom
    }

    async fn zoom_predefined_positions(&self) -> Result<Vec<String>, BeamlineError> {
        Ok(self.zoom_positions.clone())
    }

    async fn zoom_to_position(&self, position: &str) -> Result<(), BeamlineError> {
        self.record(format!("zoom_to_position {position}"));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockConnection {
    pub script: Mutex<Vec<WorkflowMessage>>,
    pub aborts: Mutex<Vec<Option<String>>>,
    pub opened: AtomicUsize,
    pub ended: AtomicUsize,
}

impl MockConnection {
    /// A connection that plays `script` and then ends the stream.
    pub fn scripted(script: Vec<WorkflowMessage>) -> Self {
        Self {
            script: Mutex::new(script),
            ..Default::default()
        }
    }

    pub fn ended_count(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowConnection for MockConnection {
    async fn open_connection(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    async fn start_workflow(&self, sender: MessageSender, _model: &WorkflowModel) {
        for message in self.script.lock().unwrap().drain(..) {
            sender.push(message).expect("push scripted message");
        }
        sender.close().expect("close scripted stream");
    }

    async fn abort_workflow(&self, reason: Option<String>) {
        self.aborts.lock().unwrap().push(reason);
    }

    async fn workflow_ended(&self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }

    async fn close_connection(&self) {}
}

/// Orchestrator plus its mocks, config files rooted in a tempdir.
pub struct Rig {
    pub orchestrator: GphlOrchestrator,
    pub queue: Arc<MockQueue>,
    pub hardware: Arc<MockHardware>,
    pub connection: Arc<MockConnection>,
    pub events: MemorySink,
    pub ui_requests: flume::Receiver<ParametersRequest>,
    pub dir: tempfile::TempDir,
}

pub fn rig(script: Vec<WorkflowMessage>) -> Rig {
    rig_with(script, MockQueue::new(), MockHardware::default(), false)
}

pub fn rig_with(
    script: Vec<WorkflowMessage>,
    queue: MockQueue,
    hardware: MockHardware,
    with_transcal: bool,
) -> Rig {
    let dir = tempfile::tempdir().expect("tempdir");
    write_instrumentation(dir.path());
    if with_transcal {
        write_transcal(dir.path());
    }
    let config =
        GphlConfig::load(dir.path(), "/bin/false", dir.path()).expect("load configuration");

    let mut model = WorkflowModel::default();
    model.workflow_type = "acquisition".to_string();
    model.beam_energy_roles = vec!["Main".to_string(), "Remote".to_string()];
    model.path_template.directory = dir.path().join("raw");
    model.path_template.process_directory = dir.path().join("process");
    model.path_template.archive_directory = dir.path().join("archive");
    model.image_root_directory = dir.path().join("images");

    let queue = Arc::new(queue);
    let hardware = Arc::new(hardware);
    let connection = Arc::new(MockConnection::scripted(script));
    let (gateway, ui_requests) = ParameterGateway::channel();
    let events = MemorySink::new();
    let bus = EventBus::with_sink(events.clone());

    let orchestrator = GphlOrchestrator::new(
        config,
        model,
        queue.clone(),
        hardware.clone(),
        connection.clone(),
        gateway,
        bus,
    );
    Rig {
        orchestrator,
        queue,
        hardware,
        connection,
        events,
        ui_requests,
        dir,
    }
}

/// Service every parameter request with the same canned answer.
pub fn auto_respond(
    requests: flume::Receiver<ParametersRequest>,
    values: ParameterValues,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(request) = requests.recv_async().await {
            request.respond(values.clone());
        }
    })
}

pub fn rotation(omega: f64, kappa: f64, phi: f64) -> GoniostatRotation {
    let mut axis_settings = AxisSettings::default();
    axis_settings.insert("omega".to_string(), omega);
    axis_settings.insert("kappa".to_string(), kappa);
    axis_settings.insert("phi".to_string(), phi);
    GoniostatRotation {
        id: RotationId::new(),
        axis_settings,
        scan_axis: "omega".to_string(),
        translation: None,
    }
}

pub fn beam_setting(wavelength: f64) -> BeamSetting {
    BeamSetting {
        id: Uuid::new_v4(),
        wavelength,
    }
}

pub fn detector_setting(id: Option<Uuid>, resolution: f64, distance: f64) -> BcsDetectorSetting {
    BcsDetectorSetting {
        id,
        resolution,
        org_xy: (1024.0, 1040.0),
        distance,
    }
}

pub fn sweep(rotation: GoniostatRotation, start: f64, width: f64) -> Sweep {
    Sweep {
        goniostat_sweep_setting: rotation,
        start,
        width,
        detector_setting: detector_setting(None, 2.0, 250.0),
        beam_setting: beam_setting(0.9763),
    }
}

pub fn strategy(sweeps: Vec<Sweep>) -> GeometricStrategy {
    GeometricStrategy {
        id: Uuid::new_v4(),
        sweeps,
        default_beam_setting: None,
        default_detector_setting: None,
        is_interleaved: false,
        is_user_modifiable: false,
        allowed_widths: vec![0.1, 0.2],
        default_width_idx: Some(0),
    }
}

/// Canned operator answers covering the strategy query fields.
pub fn default_strategy_answers(resolution: &str) -> ParameterValues {
    let mut values = ParameterValues::default();
    values.insert("resolution", serde_json::json!(resolution));
    values.insert("transmission", serde_json::json!("10"));
    values.insert("exposure", serde_json::json!("0.04"));
    values.insert("imageWidth", serde_json::json!("0.1"));
    values.insert("Characterisation", serde_json::json!("12.4"));
    values.insert("Main", serde_json::json!("12.4"));
    values.insert("Remote", serde_json::json!("12.41"));
    values
}
