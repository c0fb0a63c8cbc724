//! Sample-centring coordination.
//!
//! Centrings are enqueued on the beamline queue first and executed
//! later, so the strategy builder can batch its centring decisions
//! before committing. Execution reads back the centred position and
//! turns it into a [`GoniostatTranslation`]; a centring that yields no
//! result is fatal to the run.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::debug;

use crate::beamline::{
    BeamlineError, BeamlineHardware, BeamlineQueue, QueueEntryHandle,
};
use crate::messages::{AxisSettings, GoniostatRotation, GoniostatTranslation, RotationId};
use crate::model::{DataCollectionGroup, WorkflowModel};

#[derive(Debug, Error, Diagnostic)]
pub enum CentringError {
    /// Executing the centring entry produced no centred position.
    /// Fatal: the run is aborted.
    #[error("no centring result found")]
    #[diagnostic(code(gphl_workflow::centring::no_result))]
    NoResult,

    /// The centred position lacks one of the configured translation
    /// axes.
    #[error("centring result lacks translation axis {role:?}")]
    #[diagnostic(code(gphl_workflow::centring::missing_axis))]
    MissingAxis { role: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Beamline(#[from] BeamlineError),
}

/// Enqueues and executes centring entries for one workflow run.
pub struct CentringCoordinator {
    pub queue: Arc<dyn BeamlineQueue>,
    pub hardware: Arc<dyn BeamlineHardware>,
    pub rotation_axis_roles: Vec<String>,
    pub translation_axis_roles: Vec<String>,
}

impl CentringCoordinator {
    /// Create a centring entry under the run's collection group without
    /// executing it, and return its handle.
    pub async fn enqueue(
        &self,
        group: &DataCollectionGroup,
        motor_settings: &AxisSettings,
    ) -> Result<QueueEntryHandle, CentringError> {
        let handle = self.queue.enqueue_centring(group, motor_settings).await?;
        debug!(group = %group.name, ?handle, "queued sample centring");
        Ok(handle)
    }

    /// Execute a queued centring entry synchronously and return the
    /// resulting translation for `rotation`.
    pub async fn execute(
        &self,
        entry: QueueEntryHandle,
        rotation: &GoniostatRotation,
        requested_rotation_id: Option<RotationId>,
    ) -> Result<GoniostatTranslation, CentringError> {
        let centred = self
            .queue
            .execute_centring(entry)
            .await?
            .ok_or(CentringError::NoResult)?;

        let mut axis_settings = AxisSettings::default();
        for role in &self.translation_axis_roles {
            let value =
                centred
                    .positions
                    .get(role)
                    .copied()
                    .ok_or_else(|| CentringError::MissingAxis {
                        role: role.clone(),
                    })?;
            axis_settings.insert(role.clone(), value);
        }
        Ok(GoniostatTranslation {
            rotation_id: rotation.id,
            requested_rotation_id,
            axis_settings,
        })
    }

    /// Take the configured number of crystal snapshots after a
    /// centring, rotating omega by 90 degrees between exposures and
    /// restoring the summed rotation afterwards.
    pub async fn collect_centring_snapshots(
        &self,
        model: &WorkflowModel,
        motor_settings: &AxisSettings,
    ) -> Result<(), CentringError> {
        let number_of_snapshots = model.snapshot_count;
        if number_of_snapshots == 0 {
            return Ok(());
        }
        tracing::info!(
            "Post-centring: Taking {number_of_snapshots} sample snapshot(s)"
        );
        let snapshot_directory = model
            .path_template
            .archive_directory
            .join("centring_snapshots");
        self.hardware.move_motors(motor_settings).await?;

        let okp: Vec<String> = self
            .rotation_axis_roles
            .iter()
            .map(|role| {
                let value = motor_settings.get(role).copied().unwrap_or_default();
                format!("{}", value as i64)
            })
            .collect();
        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S");

        let mut summed_angle = 0.0;
        for snapshot_index in 0..number_of_snapshots {
            if snapshot_index > 0 {
                self.hardware.move_omega_relative(90.0).await?;
                summed_angle += 90.0;
            }
            let filename = format!(
                "{}_{timestamp}_{}.jpeg",
                okp.join("_"),
                snapshot_index + 1
            );
            let path = snapshot_directory.join(filename);
            debug!(path = %path.display(), "centring snapshot stored");
            self.hardware.take_snapshot(&path).await?;
        }
        if summed_angle != 0.0 {
            self.hardware.move_omega_relative(-summed_angle).await?;
        }
        Ok(())
    }
}
