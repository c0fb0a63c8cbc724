//! Collection-proposal execution: map each proposed scan onto a
//! beamline data collection, enqueue the lot under the run's collection
//! group and execute it.

use rustc_hash::FxHashSet;
use tracing::info;
use uuid::Uuid;

use crate::beamline::{DataCollectionTask, QueueExecutionStatus, H_OVER_E};
use crate::messages::{CollectionDone, CollectionProposal, Reply, RotationId};
use crate::orchestrator::{GphlOrchestrator, WorkflowError};

impl GphlOrchestrator {
    /// Handle a CollectionProposal message: enqueue one data collection
    /// per scan, execute the group and reply `CollectionDone`.
    pub(crate) async fn collect_data(
        &mut self,
        collection_proposal: CollectionProposal,
    ) -> Result<Reply, WorkflowError> {
        let group = self
            .data_collection_group
            .clone()
            .ok_or(WorkflowError::MissingCollectionGroup)?;

        let master_path_template = self.model.path_template.clone();
        let relative_image_dir = collection_proposal.relative_image_dir.clone();

        let snapshot_count =
            if self.model.lattice_selected || self.model.is_calibration() {
                self.model.snapshot_count
            } else {
                // No snapshots during characterisation.
                0
            };
        let enqueue_centring = self.model.centre_before_sweep;

        let coordinator = self.centring_coordinator();
        // Sweeps whose snapshots are used up; keyed by rotation and
        // beam setting, which together identify a sweep here.
        let mut snapshots_done: FxHashSet<(RotationId, Uuid)> = FxHashSet::default();
        let mut found_orientations: FxHashSet<RotationId> = FxHashSet::default();

        for scan in &collection_proposal.scans {
            let sweep = &scan.sweep;
            let rotation = &sweep.goniostat_sweep_setting;

            let mut path_template = master_path_template.clone();
            if let Some(relative) = &relative_image_dir {
                path_template.directory.push(relative);
                path_template.process_directory.push(relative);
            }
            if let Some(subdir) = scan.filename_params.get("subdir").filter(|s| !s.is_empty()) {
                path_template.directory.push(subdir);
                path_template.process_directory.push(subdir);
            }
            path_template.run_number = scan
                .filename_params
                .get("run")
                .and_then(|run| run.parse().ok())
                .unwrap_or(1);
            let prefix = scan
                .filename_params
                .get("prefix")
                .cloned()
                .unwrap_or_default();
            let ib_component = scan
                .filename_params
                .get("inverse_beam_component_sign")
                .cloned()
                .unwrap_or_default();
            path_template.base_prefix = [&prefix, &ib_component]
                .iter()
                .filter(|part| !part.is_empty())
                .map(|part| part.as_str())
                .collect::<Vec<_>>()
                .join("_");
            let beam_setting_index = scan
                .filename_params
                .get("beam_setting_index")
                .cloned()
                .unwrap_or_default();
            path_template.mad_prefix = beam_setting_index.clone();
            path_template.wedge_prefix = scan
                .filename_params
                .get("gonio_setting_index")
                .cloned()
                .unwrap_or_default();
            path_template.start_num = scan.image_start_num;
            path_template.num_files = scan.width.num_images;

            info!(
                "Scan: {} images of {} deg. starting at {} ({} deg)",
                scan.width.num_images, scan.width.image_width, scan.image_start_num, scan.start
            );

            let centred_position = if enqueue_centring
                && !found_orientations.contains(&rotation.id)
            {
                // Put a centring on the queue and collect at whatever
                // position it produces; the actual translation values
                // will not be known to the workflow.
                coordinator.enqueue(&group, &sweep.initial_settings()).await?;
                None
            } else {
                // Collect at the precalculated centring position.
                let mut settings = sweep.initial_settings();
                settings.insert(rotation.scan_axis.clone(), scan.start);
                Some(settings)
            };
            found_orientations.insert(rotation.id);

            let sweep_key = (rotation.id, sweep.beam_setting.id);
            let take_snapshots = if snapshots_done.contains(&sweep_key) {
                0
            } else {
                snapshot_count
            };
            if !ib_component.is_empty()
                || !beam_setting_index.is_empty()
                || !self.model.lattice_selected
            {
                // Snapshots only the first time a sweep is encountered
                // when doing inverse beam, wavelength interleaving or
                // canned strategies.
                snapshots_done.insert(sweep_key);
            }

            let task = DataCollectionTask {
                name: path_template.prefix(),
                run_number: path_template.run_number,
                first_image: scan.image_start_num,
                num_images: scan.width.num_images,
                osc_start: scan.start,
                osc_range: scan.width.image_width,
                exp_time: scan.exposure.time,
                num_passes: 1,
                detector_distance: sweep.detector_setting.distance,
                energy: H_OVER_E / sweep.beam_setting.wavelength,
                // Fraction in the workflow, percent on the beamline.
                transmission: scan.exposure.transmission * 100.0,
                inverse_beam: false,
                take_snapshots,
                centred_position,
                image_directory: path_template.directory.clone(),
                process_directory: path_template.process_directory.clone(),
            };
            self.queue.enqueue_collection(&group, task).await?;
        }

        let status = match self.queue.execute_group(&group).await? {
            QueueExecutionStatus::Success => 0,
            QueueExecutionStatus::Failed => 1,
        };
        self.data_collection_group = None;

        Ok(Reply::CollectionDone(CollectionDone {
            status,
            proposal_id: collection_proposal.id,
        }))
    }
}
