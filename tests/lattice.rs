//! Lattice selection: solution-table parsing, highlighting and the
//! selected-solution reply.

mod common;
use common::*;

use gphl_workflow::channel::WorkflowMessage;
use gphl_workflow::messages::{ChooseLattice, MessagePayload, Reply};
use gphl_workflow::orchestrator::WorkflowError;
use gphl_workflow::ui::{FieldKind, ParameterValues, ParametersRequest};

const SOLUTIONS: &str = "\
  LATTICE-  BRAVAIS-   QUALITY  UNIT CELL CONSTANTS (ANGSTROEM & DEGREES)
 CHARACTER  LATTICE     OF FIT      a      b      c   alpha  beta gamma

 *  44        aP          0.0      56.3   56.3  102.3  90.0  90.0  90.0
 *  31        aP          0.0      56.3   56.3  102.3  90.0  90.0  90.0
 *  33        mP          0.0      56.3   56.3  102.3  90.0  90.0  90.0
    37        mC        250.0     212.2   56.3   56.3  90.0  90.0  74.6
    12        hP        250.1      56.3   56.3  102.3  90.0  90.0  90.0

 For protein crystals the possible space group numbers corresponding to";

fn choose_lattice(format: &str) -> ChooseLattice {
    ChooseLattice {
        format: format.to_string(),
        lattices: vec!["mP".to_string()],
        crystal_system: Some("m".to_string()),
        solutions: SOLUTIONS.to_string(),
    }
}

/// Answer a selection-table request by picking its first row.
fn select_first_row(
    requests: flume::Receiver<ParametersRequest>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(request) = requests.recv_async().await {
            let FieldKind::SelectionTable { rows, highlighted, .. } = &request.fields[0].kind
            else {
                panic!("expected a selection table");
            };
            // 3 starred + 2 unstarred candidates; only mP rows are
            // highlighted.
            assert_eq!(rows.len(), 5);
            assert_eq!(highlighted, &vec![false, false, true, false, false]);
            let mut values = ParameterValues::default();
            values.insert(
                "_cplx",
                serde_json::json!([rows[0].clone()]),
            );
            request.respond(values);
        }
    })
}

#[tokio::test]
async fn selected_solution_tokens_have_the_star_stripped() {
    let (reply_tx, reply_rx) = flume::unbounded();
    let script = vec![
        WorkflowMessage::new(MessagePayload::ChooseLattice(choose_lattice("IDXREF")))
            .with_reply_to(reply_tx),
    ];
    let mut rig = rig(script);
    let responder = select_first_row(rig.ui_requests.clone());

    assert!(!rig.orchestrator.model().lattice_selected);
    rig.orchestrator.pre_execute().await.unwrap();
    rig.orchestrator.execute().await.unwrap();

    let (reply, _) = reply_rx.recv().unwrap();
    let Reply::SelectedLattice(selected) = reply else {
        panic!("expected SelectedLattice, got {reply:?}");
    };
    assert_eq!(selected.format, "IDXREF");
    assert_eq!(
        selected.solution,
        vec!["44", "aP", "0.0", "56.3", "56.3", "102.3", "90.0", "90.0", "90.0"]
    );
    // Selection flips the model into final-collection mode.
    assert!(rig.orchestrator.model().lattice_selected);
    responder.abort();
}

#[tokio::test]
async fn unknown_solution_format_is_fatal() {
    let (reply_tx, reply_rx) = flume::unbounded();
    let script = vec![
        WorkflowMessage::new(MessagePayload::ChooseLattice(choose_lattice("MOSFLM")))
            .with_reply_to(reply_tx),
    ];
    let mut rig = rig(script);
    let responder = select_first_row(rig.ui_requests.clone());

    rig.orchestrator.pre_execute().await.unwrap();
    let error = rig.orchestrator.execute().await.unwrap_err();
    assert!(matches!(error, WorkflowError::Indexing(_)));
    assert!(reply_rx.drain().next().is_none());
    responder.abort();
}
