//! Collection-proposal execution: scan mapping, snapshot suppression
//! and completion status.

mod common;
use common::*;

use gphl_workflow::beamline::H_OVER_E;
use gphl_workflow::channel::WorkflowMessage;
use gphl_workflow::messages::{
    CollectionProposal, MessagePayload, Reply, Scan, ScanExposure, ScanWidth, Sweep,
};
use gphl_workflow::orchestrator::WorkflowError;
use rustc_hash::FxHashMap;
use uuid::Uuid;

fn scan(sweep: &Sweep, image_start_num: u32, start: f64, params: &[(&str, &str)]) -> Scan {
    let mut filename_params = FxHashMap::default();
    for (key, value) in params {
        filename_params.insert((*key).to_string(), (*value).to_string());
    }
    Scan {
        sweep: sweep.clone(),
        image_start_num,
        start,
        width: ScanWidth {
            num_images: 1800,
            image_width: 0.1,
        },
        exposure: ScanExposure {
            time: 0.04,
            transmission: 0.1,
        },
        filename_params,
    }
}

#[tokio::test]
async fn scans_map_onto_collections_and_group_success_reports_zero() {
    let (reply_tx, reply_rx) = flume::unbounded();
    let sweep_a = sweep(rotation(0.0, 10.0, 20.0), 0.0, 180.0);
    let geometric = strategy(vec![sweep_a.clone()]);
    let filename_params: &[(&str, &str)] =
        &[("prefix", "insulin"), ("run", "3"), ("beam_setting_index", "1"), ("gonio_setting_index", "2")];
    let proposal = CollectionProposal {
        id: Uuid::new_v4(),
        relative_image_dir: Some("wf_001".to_string()),
        scans: vec![
            scan(&sweep_a, 1, 0.0, filename_params),
            scan(&sweep_a, 1801, 180.0, filename_params),
        ],
    };
    let script = vec![
        WorkflowMessage::new(MessagePayload::GeometricStrategy(geometric))
            .with_reply_to(reply_tx.clone()),
        WorkflowMessage::new(MessagePayload::CollectionProposal(proposal.clone()))
            .with_reply_to(reply_tx),
    ];
    let mut rig = rig(script);
    rig.orchestrator.model_mut().lattice_selected = true;
    rig.orchestrator.model_mut().snapshot_count = 2;
    let responder = auto_respond(rig.ui_requests.clone(), default_strategy_answers("2.0"));

    rig.orchestrator.pre_execute().await.unwrap();
    rig.orchestrator.execute().await.unwrap();

    let replies: Vec<_> = reply_rx.drain().collect();
    assert!(matches!(replies[0].0, Reply::SampleCentred(_)));
    let Reply::CollectionDone(done) = &replies[1].0 else {
        panic!("expected CollectionDone, got {:?}", replies[1].0);
    };
    assert_eq!(done.status, 0);
    assert_eq!(done.proposal_id, proposal.id);

    let tasks = rig.queue.collections.lock().unwrap().clone();
    assert_eq!(tasks.len(), 2);
    let first = &tasks[0];
    assert_eq!(first.name, "insulin_1_2");
    assert_eq!(first.run_number, 3);
    assert_eq!(first.first_image, 1);
    assert_eq!(first.num_images, 1800);
    assert_eq!(first.osc_range, 0.1);
    assert_eq!(first.energy, H_OVER_E / 0.9763);
    // Fraction in the proposal, percent on the beamline.
    assert!((first.transmission - 10.0).abs() < 1e-9);
    assert!(first.image_directory.ends_with("raw/wf_001"));
    // Collected at the precalculated centred position, scan axis moved
    // to the scan start.
    let centred = first.centred_position.as_ref().unwrap();
    assert_eq!(centred.get("omega"), Some(&0.0));
    assert_eq!(tasks[1].centred_position.as_ref().unwrap().get("omega"), Some(&180.0));

    // Interleaved-style collections only snapshot a sweep once.
    assert_eq!(first.take_snapshots, 2);
    assert_eq!(tasks[1].take_snapshots, 0);

    // The collection group is cleared once the proposal has run.
    responder.abort();
}

#[tokio::test]
async fn group_failure_reports_status_one() {
    let (reply_tx, reply_rx) = flume::unbounded();
    let sweep_a = sweep(rotation(0.0, 10.0, 20.0), 0.0, 180.0);
    let geometric = strategy(vec![sweep_a.clone()]);
    let proposal = CollectionProposal {
        id: Uuid::new_v4(),
        relative_image_dir: None,
        scans: vec![scan(&sweep_a, 1, 0.0, &[("prefix", "lysozyme")])],
    };
    let queue = MockQueue::new();
    *queue.fail_group.lock().unwrap() = true;
    let script = vec![
        WorkflowMessage::new(MessagePayload::GeometricStrategy(geometric))
            .with_reply_to(reply_tx.clone()),
        WorkflowMessage::new(MessagePayload::CollectionProposal(proposal))
            .with_reply_to(reply_tx),
    ];
    let mut rig = rig_with(script, queue, MockHardware::default(), false);
    let responder = auto_respond(rig.ui_requests.clone(), default_strategy_answers("2.0"));

    rig.orchestrator.pre_execute().await.unwrap();
    rig.orchestrator.execute().await.unwrap();

    let replies: Vec<_> = reply_rx.drain().collect();
    let Reply::CollectionDone(done) = &replies[1].0 else {
        panic!("expected CollectionDone");
    };
    assert_eq!(done.status, 1);
    responder.abort();
}

#[tokio::test]
async fn proposal_without_setup_is_fatal() {
    let (reply_tx, _reply_rx) = flume::unbounded();
    let sweep_a = sweep(rotation(0.0, 10.0, 20.0), 0.0, 180.0);
    let proposal = CollectionProposal {
        id: Uuid::new_v4(),
        relative_image_dir: None,
        scans: vec![scan(&sweep_a, 1, 0.0, &[])],
    };
    let script = vec![
        WorkflowMessage::new(MessagePayload::CollectionProposal(proposal)).with_reply_to(reply_tx),
    ];
    let mut rig = rig(script);

    rig.orchestrator.pre_execute().await.unwrap();
    let error = rig.orchestrator.execute().await.unwrap_err();
    assert!(matches!(error, WorkflowError::MissingCollectionGroup));
}
