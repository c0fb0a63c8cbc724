//! Workflow orchestrator: state machine, dispatch loop and run
//! lifecycle.
//!
//! The orchestrator owns the per-run mutable state (workflow state,
//! subprocess-name registry, active data-collection group, recentring
//! context) and mutates it only from the dispatch loop and the
//! coordinator methods it invokes. Messages are handled strictly in
//! arrival order; no two dispatch steps ever run concurrently.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::beamline::{BeamlineError, BeamlineHardware, BeamlineQueue, WorkflowConnection};
use crate::centring::{CentringCoordinator, CentringError};
use crate::channel::{ChannelItem, MessageChannel, WorkflowMessage};
use crate::config::GphlConfig;
use crate::events::{Event, EventBus, EventEmitter};
use crate::indexing::{self, IndexingError};
use crate::messages::{
    CentringDone, CentringStatus, ChooseLattice, ConfigurationData, CorrelationId, MessagePayload,
    PriorInformation, Reply, RequestCentring, SelectedLattice, UserProvidedInfo,
};
use crate::model::{DataCollectionGroup, WorkflowModel};
use crate::recentring::RecentringContext;
use crate::state::{StateError, StateTracker, WorkflowState};
use crate::ui::{Field, FieldKind, ParameterGateway, UiError};

/// Errors that terminate the current workflow run.
///
/// Locally recoverable conditions (solver failures, missing calibration
/// files) never surface here; they degrade inside their handlers and
/// are logged.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkflowError {
    /// The engine sent a message type with no handler. Not retried; the
    /// whole run is aborted.
    #[error("GPhL message {message_type:?} not recognised")]
    #[diagnostic(
        code(gphl_workflow::orchestrator::protocol),
        help("The engine and beamline disagree on the message taxonomy.")
    )]
    Protocol { message_type: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Centring(#[from] CentringError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    UserInput(#[from] UiError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Beamline(#[from] BeamlineError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Indexing(#[from] IndexingError),

    /// The operator's answer lacks a required field.
    #[error("parameter {name:?} missing from operator input")]
    #[diagnostic(code(gphl_workflow::orchestrator::missing_parameter))]
    MissingParameter { name: &'static str },

    /// A collection message arrived outside a setup/collection phase.
    #[error("no active data collection group")]
    #[diagnostic(code(gphl_workflow::orchestrator::no_collection_group))]
    MissingCollectionGroup,
}

/// Orchestrates one GPhL workflow session against the beamline.
pub struct GphlOrchestrator {
    pub(crate) config: GphlConfig,
    pub(crate) model: WorkflowModel,
    pub(crate) queue: Arc<dyn BeamlineQueue>,
    pub(crate) hardware: Arc<dyn BeamlineHardware>,
    pub(crate) connection: Arc<dyn WorkflowConnection>,
    pub(crate) gateway: ParameterGateway,
    event_bus: EventBus,
    events: EventEmitter,
    state: StateTracker,
    /// Queue entries generated for the current run; non-null only while
    /// the run is in its setup/collection phase.
    pub(crate) data_collection_group: Option<DataCollectionGroup>,
    /// Recentring calibration, seeded from the first physical centring
    /// of the run.
    pub(crate) recentring_context: Option<RecentringContext>,
    /// Subprocess display names by correlation id.
    subprocess_names: FxHashMap<CorrelationId, String>,
    /// Switch for move-to-fine-zoom once recentred positions arrive.
    use_fine_zoom: bool,
}

impl GphlOrchestrator {
    pub fn new(
        config: GphlConfig,
        model: WorkflowModel,
        queue: Arc<dyn BeamlineQueue>,
        hardware: Arc<dyn BeamlineHardware>,
        connection: Arc<dyn WorkflowConnection>,
        gateway: ParameterGateway,
        event_bus: EventBus,
    ) -> Self {
        event_bus.start();
        let events = event_bus.emitter();
        Self {
            config,
            model,
            queue,
            hardware,
            connection,
            gateway,
            event_bus,
            events,
            state: StateTracker::new(),
            data_collection_group: None,
            recentring_context: None,
            subprocess_names: FxHashMap::default(),
            use_fine_zoom: false,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state.state()
    }

    pub fn model(&self) -> &WorkflowModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut WorkflowModel {
        &mut self.model
    }

    /// Request a state transition, broadcasting the change on success.
    pub fn set_state(&mut self, state: WorkflowState) -> Result<(), StateError> {
        self.state.set_state(state)?;
        self.emit(Event::state(state));
        Ok(())
    }

    pub(crate) fn emit(&self, event: Event) {
        self.events.emit(event);
    }

    pub(crate) fn centring_coordinator(&self) -> CentringCoordinator {
        CentringCoordinator {
            queue: Arc::clone(&self.queue),
            hardware: Arc::clone(&self.hardware),
            rotation_axis_roles: self.config.rotation_axis_roles.clone(),
            translation_axis_roles: self.config.translation_axis_roles.clone(),
        }
    }

    /// Open the session. Must run before [`execute`](Self::execute).
    pub async fn pre_execute(&mut self) -> Result<(), StateError> {
        if self.state() == WorkflowState::Off {
            self.connection.open_connection().await;
            self.set_state(WorkflowState::On)?;
        }
        Ok(())
    }

    /// Run one workflow: fork off the engine-side run and service its
    /// messages until the stream ends.
    ///
    /// On error the run is torn down (state to ON, registry cleared,
    /// engine notified) before the error is returned. On normal
    /// completion teardown is left to [`workflow_end`](Self::workflow_end),
    /// which the embedding queue entry calls.
    pub async fn execute(&mut self) -> Result<(), WorkflowError> {
        self.set_state(WorkflowState::Running)?;

        let mut channel = MessageChannel::new();
        self.connection
            .start_workflow(channel.sender(), &self.model)
            .await;

        match self.dispatch_loop(&mut channel).await {
            Ok(()) => Ok(()),
            Err(workflow_error) => {
                self.workflow_end().await;
                error!(error = %workflow_error, "uncaught error during GPhL workflow execution");
                self.emit(Event::operator(format!(
                    "GPhL workflow terminated: {workflow_error}"
                )));
                Err(workflow_error)
            }
        }
    }

    async fn dispatch_loop(&mut self, channel: &mut MessageChannel) -> Result<(), WorkflowError> {
        loop {
            let message = match channel.pop().await {
                ChannelItem::EndOfStream => return Ok(()),
                ChannelItem::Message(message) => *message,
            };
            let WorkflowMessage {
                payload,
                correlation_id,
                reply_to,
            } = message;

            if let MessagePayload::Unknown { tag } = &payload {
                error!("GPhL message {tag} not recognised. Terminating...");
                self.emit(Event::protocol(tag.clone(), "not recognised; terminating"));
                return Err(WorkflowError::Protocol {
                    message_type: tag.clone(),
                });
            }

            info!("GPhL queue processing {}", payload.message_type());
            let reply = self.dispatch(payload, correlation_id.as_ref()).await?;
            if let (Some(sink), Some(reply)) = (reply_to, reply) {
                // Receiver may be gone if the engine lost interest.
                let _ = sink.send((reply, correlation_id));
            }
        }
    }

    /// Route one payload to its handler. Any error escaping a handler
    /// propagates to the dispatch loop and tears the run down.
    async fn dispatch(
        &mut self,
        payload: MessagePayload,
        correlation_id: Option<&CorrelationId>,
    ) -> Result<Option<Reply>, WorkflowError> {
        match payload {
            MessagePayload::Info(text) => {
                self.echo_info_string(&text, correlation_id);
                Ok(None)
            }
            MessagePayload::SubprocessStarted(started) => {
                self.echo_subprocess_started(started.name, correlation_id);
                Ok(None)
            }
            MessagePayload::SubprocessStopped => {
                self.echo_subprocess_stopped(correlation_id);
                Ok(None)
            }
            MessagePayload::RequestConfiguration => Ok(Some(Reply::ConfigurationData(
                ConfigurationData {
                    location: self.config.file_paths.beamline_config.clone(),
                },
            ))),
            MessagePayload::GeometricStrategy(strategy) => {
                self.setup_data_collection(strategy).await.map(Some)
            }
            MessagePayload::CollectionProposal(proposal) => {
                self.collect_data(proposal).await.map(Some)
            }
            MessagePayload::ChooseLattice(choose) => self.select_lattice(choose).await.map(Some),
            MessagePayload::RequestCentring(request) => {
                self.process_centring_request(request).await.map(Some)
            }
            MessagePayload::PrepareForCentring => Ok(Some(Reply::ReadyForCentring)),
            MessagePayload::ObtainPriorInformation => {
                self.obtain_prior_information().await.map(Some)
            }
            MessagePayload::WorkflowAborted => {
                self.emit(Event::operator("GPhL Workflow aborted."));
                Ok(None)
            }
            MessagePayload::WorkflowCompleted => {
                self.emit(Event::operator("GPhL Workflow completed."));
                Ok(None)
            }
            MessagePayload::WorkflowFailed => {
                self.emit(Event::operator("GPhL Workflow failed."));
                Ok(None)
            }
            MessagePayload::Unknown { tag } => Err(WorkflowError::Protocol { message_type: tag }),
        }
    }

    fn echo_info_string(&self, text: &str, correlation_id: Option<&CorrelationId>) {
        match correlation_id.and_then(|id| self.subprocess_names.get(id)) {
            Some(name) => info!("{name}: {text}"),
            None => info!("{text}"),
        }
    }

    fn echo_subprocess_started(&mut self, name: String, correlation_id: Option<&CorrelationId>) {
        if let Some(id) = correlation_id {
            self.subprocess_names.insert(id.clone(), name.clone());
        }
        info!("{name} : STARTING");
    }

    fn echo_subprocess_stopped(&mut self, correlation_id: Option<&CorrelationId>) {
        let name = correlation_id
            .and_then(|id| self.subprocess_names.remove(id))
            .unwrap_or_else(|| {
                // Tolerated leak: a stop with no matching start.
                "Unknown process".to_string()
            });
        info!("{name} : FINISHED");
    }

    async fn select_lattice(&mut self, choose: ChooseLattice) -> Result<Reply, WorkflowError> {
        let parsed = indexing::parse_indexing_solution(&choose.format, &choose.solutions)?;
        let highlighted = indexing::highlight_solutions(
            &parsed.solutions,
            &choose.lattices,
            choose.crystal_system.as_deref(),
        );

        let field = Field::new(
            "_cplx",
            "Select indexing solution:",
            FieldKind::SelectionTable {
                header: parsed.header,
                rows: parsed.solutions,
                highlighted,
            },
        );
        let params = self.gateway.request(vec![field]).await?;
        let selected = params
            .first_of("_cplx")
            .and_then(|value| value.as_str())
            .ok_or(WorkflowError::MissingParameter { name: "_cplx" })?;

        let mut tokens: Vec<String> = selected.split_whitespace().map(str::to_string).collect();
        if tokens.first().is_some_and(|t| t == "*") {
            tokens.remove(0);
        }
        self.model.lattice_selected = true;
        Ok(Reply::SelectedLattice(SelectedLattice {
            format: choose.format,
            solution: tokens,
        }))
    }

    async fn process_centring_request(
        &mut self,
        request: RequestCentring,
    ) -> Result<Reply, WorkflowError> {
        self.emit(Event::operator(format!(
            "Start centring no. {} of {}",
            request.current_setting_no, request.total_rotations
        )));
        let rotation = request.goniostat_rotation;

        if request.current_setting_no < 2 {
            // Start the series without fine zoom.
            self.use_fine_zoom = false;
        } else if !self.use_fine_zoom && rotation.translation.is_some() {
            // We are moving to recentred positions; set or prompt for
            // fine zoom.
            self.use_fine_zoom = true;
            if self.hardware.has_zoom_actuator() {
                let positions = self.hardware.zoom_predefined_positions().await?;
                match positions.last() {
                    Some(position) => {
                        // The last predefined position should be the
                        // largest magnification.
                        self.emit(Event::operator(
                            "Sample re-centering now active - Zooming in.",
                        ));
                        self.hardware.zoom_to_position(position).await?;
                    }
                    None => warn!("No predefined positions for zoom motor."),
                }
            } else {
                let field = Field::new("_info", "Data collection plan", FieldKind::TextArea)
                    .with_default(
                        "Automatic sample re-centering is now active\n\
                         Switch to maximum zoom before continuing",
                    );
                // The answer itself is irrelevant, only the wait is.
                let _ = self.gateway.request(vec![field]).await?;
            }
        }

        let group = self.ensure_collection_group("GPhL Centring");
        let coordinator = self.centring_coordinator();
        let entry = coordinator.enqueue(&group, &rotation.axis_settings).await?;
        let translation = self
            .execute_centring_or_abort(&coordinator, entry, &rotation, None)
            .await?;

        let status = if request.current_setting_no >= request.total_rotations {
            CentringStatus::Done
        } else {
            CentringStatus::Next
        };
        Ok(Reply::CentringDone(CentringDone {
            status,
            timestamp: chrono::Utc::now(),
            goniostat_translation: translation,
        }))
    }

    async fn obtain_prior_information(&self) -> Result<Reply, WorkflowError> {
        let crystal_system = self
            .model
            .crystal_system
            .as_ref()
            .map(|system| system.to_uppercase());

        // Expected resolution is deprecated engine-side; set to the
        // current resolution value.
        let user_provided_info = UserProvidedInfo {
            scatterers: Vec::new(),
            lattice: crystal_system,
            point_group: self.model.point_group.clone(),
            space_group: self.model.space_group_number,
            cell: self.model.cell_parameters.clone(),
            expected_resolution: Some(self.hardware.get_resolution().await?),
            is_anisotropic: None,
        };
        debug!(?user_provided_info, "prior information");

        // Reuse an existing uuid carried in the sample identifiers.
        let sample_id = self
            .model
            .sample
            .id_candidates()
            .find_map(|text| Uuid::parse_str(text).ok())
            .unwrap_or_else(Uuid::new_v4);

        let image_root = self.model.image_root_directory.clone();
        if !image_root.is_dir() {
            // Must exist by the time the engine checks for it. Failure
            // is logged; the run fails downstream anyway.
            if let Err(io_error) = std::fs::create_dir_all(&image_root) {
                error!(
                    path = %image_root.display(),
                    error = %io_error,
                    "could not create image root directory"
                );
            }
        }

        let sample = &self.model.sample;
        let sample_name = sample
            .name
            .clone()
            .or_else(|| sample.code.clone())
            .or_else(|| sample.lims_code.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| {
                let prefix = self.model.path_template.prefix();
                if prefix.is_empty() {
                    sample_id.to_string()
                } else {
                    prefix
                }
            });

        Ok(Reply::PriorInformation(PriorInformation {
            sample_id,
            sample_name,
            root_directory: image_root,
            user_provided_info,
        }))
    }

    /// The active collection group, created on demand for centring-only
    /// phases (translational calibration has no setup message).
    pub(crate) fn ensure_collection_group(&mut self, name: &str) -> DataCollectionGroup {
        if let Some(group) = &self.data_collection_group {
            return group.clone();
        }
        let number = self.model.next_number_for_name(name);
        let group = DataCollectionGroup::new(name, number);
        self.data_collection_group = Some(group.clone());
        group
    }

    /// Tear down the finished run: drop per-run state, go back to ON
    /// and notify the engine side.
    pub async fn workflow_end(&mut self) {
        self.data_collection_group = None;
        self.recentring_context = None;
        self.use_fine_zoom = false;
        self.subprocess_names.clear();
        if let Err(state_error) = self.set_state(WorkflowState::On) {
            warn!(error = %state_error, "workflow_end outside an active run");
        }
        self.connection.workflow_ended().await;
    }

    /// Ask the engine to stop the current workflow. Safe to call from
    /// outside the dispatch loop; does not block on the engine.
    pub async fn abort(&self, message: Option<String>) {
        info!("Aborting current GPhL workflow");
        self.emit(Event::operator("Aborting current GPhL workflow"));
        self.connection.abort_workflow(message).await;
    }

    /// Shut down workflow and connection. Triggered on program quit.
    pub async fn shutdown(&mut self) {
        self.connection.workflow_ended().await;
        self.connection.close_connection().await;
        self.event_bus.shutdown().await;
    }
}
