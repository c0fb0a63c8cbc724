//! Collection-strategy handling: turn an engine-supplied geometric
//! strategy plus operator input into concrete acquisition parameters,
//! centring decisions and a `SampleCentred` reply.

use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use crate::beamline::{QueueEntryHandle, H_OVER_E};
use crate::centring::{CentringCoordinator, CentringError};
use crate::events::Event;
use crate::messages::{
    AxisSettings, BcsDetectorSetting, GeometricStrategy, GoniostatRotation, GoniostatTranslation,
    PhasingWavelength, Reply, RotationId, SampleCentred, Sweep,
};
use crate::model::DataCollectionGroup;
use crate::orchestrator::{GphlOrchestrator, WorkflowError};
use crate::recentring::{self, Okp, RecentringContext};
use crate::ui::{Field, FieldKind};

/// Synthetic energy role used before a lattice has been chosen.
const CHARACTERISATION_ROLE: &str = "Characterisation";

/// Operator-confirmed acquisition parameters for one strategy.
#[derive(Clone, Debug, Default)]
pub(crate) struct StrategyParameters {
    pub image_width: Option<f64>,
    pub exposure: Option<f64>,
    /// Transmission as a 0..=1 fraction.
    pub transmission: Option<f64>,
    pub wedge_width: Option<u32>,
    pub resolution: Option<f64>,
    pub interleave_order: Option<String>,
    /// Role tag to energy in keV, in configured order.
    pub beam_energies: Vec<(String, f64)>,
    pub centre_before_sweep: bool,
    pub centre_at_start: bool,
    pub centring_snapshots: bool,
}

/// A centring decision deferred until all orientations are inspected.
struct PendingCentring {
    entry: QueueEntryHandle,
    rotation: GoniostatRotation,
    requested_rotation_id: RotationId,
    motor_settings: AxisSettings,
}

impl GphlOrchestrator {
    /// Handle a GeometricStrategy message: preset the beamline, query
    /// the operator, run the centring plan and reply `SampleCentred`.
    pub(crate) async fn setup_data_collection(
        &mut self,
        geometric_strategy: GeometricStrategy,
    ) -> Result<Reply, WorkflowError> {
        // Enqueue data collection group.
        let group_name = if self.model.lattice_selected {
            "GPhL Data Collection"
        } else {
            "GPhL Characterisation"
        };
        let number = self.model.next_number_for_name(group_name);
        let group = DataCollectionGroup::new(group_name, number);
        self.data_collection_group = Some(group.clone());

        // Preset energy first and let it settle, so the detector move
        // below resolves to the right resolution.
        let default_energy = match &geometric_strategy.default_beam_setting {
            Some(beam_setting) => {
                let energy = H_OVER_E / beam_setting.wavelength;
                self.hardware.set_energy(energy).await?;
                energy
            }
            None => self.hardware.get_energy().await?,
        };

        // Preset detector distance and resolution.
        let default_detector_setting = geometric_strategy.default_detector_setting.clone();
        if let Some(detector_setting) = &default_detector_setting {
            self.hardware.move_detector(detector_setting.distance).await?;
        }
        let strategy_resolution = self.hardware.get_resolution().await?;
        self.model.detector_resolution = Some(strategy_resolution);

        // Get modified parameters and confirm acquisition. Run before
        // centring, as it also does confirm/abort.
        let parameters = self
            .query_collection_strategy(&geometric_strategy, default_energy)
            .await?;
        if geometric_strategy.is_user_modifiable {
            warn!("User modification of sweep settings not implemented. Ignored");
        }

        let centre_at_start = parameters.centre_at_start;
        let centring_snapshots = parameters.centring_snapshots;
        self.model.centre_before_sweep = parameters.centre_before_sweep;

        let transcal_parameters = self.config.load_transcal_parameters();
        let centre_at_start = if parameters.centre_before_sweep
            || centre_at_start
            || transcal_parameters.is_some()
            || self.recentring_context.is_some()
        {
            centre_at_start
        } else {
            // Never leave the sample totally unchecked.
            true
        };

        // First sweep in list for a given rotation setting.
        let mut first_sweeps: Vec<&Sweep> = Vec::new();
        let mut seen: FxHashSet<RotationId> = FxHashSet::default();
        for sweep in geometric_strategy.ordered_sweeps() {
            if seen.insert(sweep.goniostat_sweep_setting.id) {
                first_sweeps.push(sweep);
            }
        }
        // When centring at start, reverse so the first sweep to acquire
        // is the last to be centred.
        if centre_at_start {
            first_sweeps.reverse();
        }

        let coordinator = self.centring_coordinator();
        let mut goniostat_translations: Vec<GoniostatTranslation> = Vec::new();
        let mut pending: Vec<PendingCentring> = Vec::new();

        for sweep in first_sweeps {
            let sweep_setting = &sweep.goniostat_sweep_setting;
            let requested_rotation_id = sweep_setting.id;
            let initial_settings = sweep.initial_settings();

            if sweep_setting.translation.is_some() {
                // A centring was already passed in (from stratcal, in
                // practice); only recheck it when centring at start.
                if centre_at_start {
                    let entry = coordinator.enqueue(&group, &initial_settings).await?;
                    pending.push(PendingCentring {
                        entry,
                        rotation: sweep_setting.clone(),
                        requested_rotation_id,
                        motor_settings: initial_settings,
                    });
                }
                continue;
            }

            let predicted = match &self.recentring_context {
                Some(context) => {
                    match okp_from(&initial_settings, &self.config.rotation_axis_roles) {
                        Some(okp) => {
                            let predicted = recentring::calculate_recentring(
                                &self.config,
                                &self.model.path_template.process_directory,
                                okp,
                                context,
                            )
                            .await;
                            debug!(?okp, ?predicted, "recentring");
                            predicted
                        }
                        None => Default::default(),
                    }
                }
                None => Default::default(),
            };

            if !predicted.is_empty() {
                if centre_at_start {
                    let mut motor_settings = initial_settings.clone();
                    motor_settings.extend(predicted);
                    let entry = coordinator.enqueue(&group, &motor_settings).await?;
                    pending.push(PendingCentring {
                        entry,
                        rotation: sweep_setting.clone(),
                        requested_rotation_id,
                        motor_settings,
                    });
                } else {
                    // The prediction replaces a physical centring.
                    goniostat_translations.push(GoniostatTranslation {
                        rotation_id: sweep_setting.id,
                        requested_rotation_id: Some(requested_rotation_id),
                        axis_settings: predicted,
                    });
                }
            } else if let Some(transcal) = transcal_parameters
                .as_ref()
                .filter(|_| self.recentring_context.is_none())
            {
                // No centring or recentring info, but calibration is
                // available: centre now regardless and seed the
                // recentring context for successive sweeps.
                let entry = coordinator.enqueue(&group, &initial_settings).await?;
                let translation = self
                    .execute_centring_or_abort(
                        &coordinator,
                        entry,
                        sweep_setting,
                        Some(requested_rotation_id),
                    )
                    .await?;
                if centring_snapshots {
                    let okp_settings =
                        axis_subset(&initial_settings, &self.config.rotation_axis_roles);
                    coordinator
                        .collect_centring_snapshots(&self.model, &okp_settings)
                        .await?;
                }
                let ref_xyz =
                    xyz_from(&translation.axis_settings, &self.config.translation_axis_roles);
                let ref_okp = okp_from(&initial_settings, &self.config.rotation_axis_roles);
                goniostat_translations.push(translation);
                if let (Some(ref_okp), Some(ref_xyz)) = (ref_okp, ref_xyz) {
                    let context = RecentringContext::new(transcal.clone(), ref_okp, ref_xyz);
                    debug!(?context, "recentring set-up");
                    self.recentring_context = Some(context);
                }
            } else if centre_at_start {
                let entry = coordinator.enqueue(&group, &initial_settings).await?;
                pending.push(PendingCentring {
                    entry,
                    rotation: sweep_setting.clone(),
                    requested_rotation_id,
                    motor_settings: initial_settings,
                });
            }
        }

        for centring in pending {
            let translation = self
                .execute_centring_or_abort(
                    &coordinator,
                    centring.entry,
                    &centring.rotation,
                    Some(centring.requested_rotation_id),
                )
                .await?;
            goniostat_translations.push(translation);
            if centring_snapshots {
                let okp_settings =
                    axis_subset(&centring.motor_settings, &self.config.rotation_axis_roles);
                coordinator
                    .collect_centring_snapshots(&self.model, &okp_settings)
                    .await?;
            }
        }

        // Set the beamline to match the confirmed parameters.
        let wavelengths: Vec<PhasingWavelength> = parameters
            .beam_energies
            .iter()
            .map(|(role, energy)| PhasingWavelength {
                wavelength: H_OVER_E / energy,
                role: role.clone(),
            })
            .collect();
        if let Some(first) = wavelengths.first() {
            // Move to the first wavelength before setting resolution,
            // so the resulting detector distance is right.
            self.hardware.set_wavelength(first.wavelength).await?;
        }

        let new_resolution = parameters.resolution.unwrap_or(strategy_resolution);
        let id = if new_resolution == strategy_resolution {
            default_detector_setting.as_ref().and_then(|d| d.id)
        } else {
            self.hardware.set_resolution(new_resolution).await?;
            None
        };
        let org_xy = self.hardware.get_beam_centre().await?;
        let detector_setting = BcsDetectorSetting {
            id,
            resolution: new_resolution,
            org_xy,
            distance: self.hardware.get_detector_distance().await?,
        };

        Ok(Reply::SampleCentred(SampleCentred {
            goniostat_translations,
            wavelengths,
            detector_setting,
            image_width: parameters.image_width,
            exposure: parameters.exposure,
            transmission: parameters.transmission,
            wedge_width: parameters.wedge_width,
            interleave_order: parameters.interleave_order,
        }))
    }

    /// Display the collection strategy for operator approval and query
    /// the parameters needed. Blocks on the answer; fails fast when no
    /// subscriber is registered.
    pub(crate) async fn query_collection_strategy(
        &mut self,
        geometric_strategy: &GeometricStrategy,
        default_energy: f64,
    ) -> Result<StrategyParameters, WorkflowError> {
        let (allowed_widths, default_width_index) = if geometric_strategy.allowed_widths.is_empty()
        {
            let mut widths = self.config.default_image_widths.clone();
            widths.sort_by(|a, b| a.partial_cmp(b).expect("image widths are finite"));
            info!("No allowed image widths returned by strategy - use defaults");
            (widths, 0)
        } else {
            let index = geometric_strategy
                .default_width_idx
                .unwrap_or(0)
                .min(geometric_strategy.allowed_widths.len() - 1);
            (geometric_strategy.allowed_widths.clone(), index)
        };

        // The geometric strategy is only given for one beam setting;
        // the strategy is repeated identically for all wavelengths.
        let axis_names = &self.config.rotation_axis_roles;
        let mut orientations: Vec<(RotationId, Vec<&Sweep>)> = Vec::new();
        let mut strategy_length = 0.0;
        for sweep in geometric_strategy.ordered_sweeps() {
            let rotation_id = sweep.goniostat_sweep_setting.id;
            match orientations.iter_mut().find(|(id, _)| *id == rotation_id) {
                Some((_, sweeps)) => sweeps.push(sweep),
                None => {
                    strategy_length += sweep.width;
                    orientations.push((rotation_id, vec![sweep]));
                }
            }
        }

        let mut beam_energies: Vec<(String, f64)> = Vec::new();
        let mut lines = vec!["Geometric strategy   :".to_string()];
        if self.model.lattice_selected {
            // Data collection: the configured role tags matter, not the
            // configured energies.
            let offsets = [0.0, 0.01, -0.01];
            for (index, tag) in self.model.beam_energy_roles.iter().enumerate() {
                let energy = default_energy + offsets.get(index).copied().unwrap_or(0.0);
                beam_energies.push((tag.clone(), energy));
            }
            let mut total_width = 0.0;
            for (tag, _) in &beam_energies {
                lines.push(format!("- {tag:<18} {strategy_length:6.1} degrees"));
                total_width += strategy_length;
            }
            lines.push(format!("{:<18}:  {total_width:6.1} degrees", "Total rotation"));
        } else {
            beam_energies.push((CHARACTERISATION_ROLE.to_string(), default_energy));
            lines.push(format!("    - Total rotation : {strategy_length:7.1} degrees"));
        }

        for (_, sweeps) in &orientations {
            let rotation = &sweeps[0].goniostat_sweep_setting;
            let description: Vec<String> = axis_names
                .iter()
                .filter(|name| **name != rotation.scan_axis)
                .filter_map(|name| {
                    rotation
                        .axis_settings
                        .get(name)
                        .map(|value| format!("{name}= {value:6.1}"))
                })
                .collect();
            lines.push(format!("\nOrientation: {}", description.join(", ")));
            for sweep in sweeps {
                lines.push(format!(
                    "    - sweep {}={:8.1}, width= {} degrees",
                    rotation.scan_axis, sweep.start, sweep.width
                ));
            }
        }
        let info_text = lines.join("\n");

        let defaults = self.hardware.acquisition_defaults().await?;
        let resolution = self.hardware.get_resolution().await?;

        let mut field_list = vec![
            Field::new("_info", "Data collection plan", FieldKind::TextArea)
                .with_default(info_text),
            Field::new("resolution", "Detector resolution (A)", FieldKind::Text)
                .with_default(resolution.to_string()),
            // Transmission is in % in the UI, but 0..=1 in the workflow.
            Field::new("transmission", "Transmission (%)", FieldKind::Text)
                .with_default(defaults.transmission.to_string())
                .with_bounds(0.0, 100.0),
            Field::new("exposure", "Exposure Time (s)", FieldKind::Text)
                .with_default(defaults.exposure_time.to_string())
                .with_bounds(0.003, 6000.0),
        ];
        if self.model.lattice_selected || self.model.is_calibration() {
            field_list.push(
                Field::new(
                    "centre_at_start",
                    "(Re)centre crystal before acquisition start?",
                    FieldKind::Boolean,
                )
                .with_default(self.config.centre_at_start.to_string()),
            );
            if orientations.len() > 1 {
                field_list.push(
                    Field::new(
                        "centre_before_sweep",
                        "(Re)centre crystal before the start of each sweep?",
                        FieldKind::Boolean,
                    )
                    .with_default(self.config.centre_before_sweep.to_string()),
                );
            }
            if self.model.snapshot_count > 0 {
                field_list.push(
                    Field::new(
                        "centring_snapshots",
                        "Collect snapshots after each centring?",
                        FieldKind::Boolean,
                    )
                    .with_default("false"),
                );
            }
        }
        if let Some(last) = field_list.last_mut() {
            last.new_column = true;
        }

        field_list.push(
            Field::new(
                "imageWidth",
                "Oscillation range",
                FieldKind::Combo {
                    choices: allowed_widths.iter().map(|w| w.to_string()).collect(),
                },
            )
            .with_default(allowed_widths[default_width_index].to_string()),
        );
        let plain_interleave = matches!(self.model.interleave_order.as_str(), "" | "gs");
        if geometric_strategy.is_interleaved && !plain_interleave {
            field_list.push(
                Field::new("wedgeWidth", "Images per wedge", FieldKind::Text)
                    .with_default("10")
                    .with_bounds(0.0, 1000.0),
            );
        }
        for (index, (tag, value)) in beam_energies.iter().enumerate() {
            let mut field = Field::new(tag.as_str(), format!("{tag} beam energy (keV)"), FieldKind::Text)
                .with_default(value.to_string())
                .with_bounds(4.0, 20.0);
            if index == 0 && self.model.lattice_selected {
                // Wavelength is pinned to the strategy's first energy.
                field = field.read_only();
            }
            field_list.push(field);
        }

        self.emit(Event::operator("GPhL collection parameters needed"));
        let params = self.gateway.request(field_list).await?;

        let mut result = StrategyParameters {
            image_width: params.float("imageWidth"),
            exposure: params.float("exposure"),
            // Convert from % to fraction.
            transmission: params.float("transmission").map(|t| t / 100.0),
            wedge_width: params.integer("wedgeWidth").map(|w| w as u32),
            resolution: params.float("resolution"),
            ..Default::default()
        };
        if geometric_strategy.is_interleaved {
            if plain_interleave {
                result.wedge_width = Some(10);
            }
            result.interleave_order = Some(self.model.interleave_order.clone());
        }
        result.beam_energies = beam_energies
            .into_iter()
            .map(|(tag, _)| {
                let energy = params.float(&tag).unwrap_or(0.0);
                (tag, energy)
            })
            .collect();
        // These default to false when the field was not queried.
        result.centre_before_sweep = params.boolean("centre_before_sweep");
        result.centre_at_start = params.boolean("centre_at_start");
        result.centring_snapshots = params.boolean("centring_snapshots");
        Ok(result)
    }

    /// Execute a queued centring; a missing centring result aborts the
    /// run.
    pub(crate) async fn execute_centring_or_abort(
        &self,
        coordinator: &CentringCoordinator,
        entry: QueueEntryHandle,
        rotation: &GoniostatRotation,
        requested_rotation_id: Option<RotationId>,
    ) -> Result<GoniostatTranslation, WorkflowError> {
        match coordinator.execute(entry, rotation, requested_rotation_id).await {
            Ok(translation) => Ok(translation),
            Err(centring_error @ CentringError::NoResult) => {
                self.abort(Some("No Centring result found".to_string()))
                    .await;
                Err(centring_error.into())
            }
            Err(other) => Err(other.into()),
        }
    }
}

/// The omega/kappa/phi triple of a settings map, in role order.
fn okp_from(settings: &AxisSettings, roles: &[String]) -> Option<Okp> {
    if roles.len() != 3 {
        return None;
    }
    Some([
        *settings.get(&roles[0])?,
        *settings.get(&roles[1])?,
        *settings.get(&roles[2])?,
    ])
}

/// The translation triple of a settings map, in role order.
fn xyz_from(settings: &AxisSettings, roles: &[String]) -> Option<[f64; 3]> {
    okp_from(settings, roles)
}

/// The subset of `settings` named by `roles`.
fn axis_subset(settings: &AxisSettings, roles: &[String]) -> AxisSettings {
    roles
        .iter()
        .filter_map(|role| settings.get(role).map(|value| (role.clone(), *value)))
        .collect()
}
