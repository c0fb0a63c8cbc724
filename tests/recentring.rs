//! Recentring calculator driven by a stub geometry solver.

mod common;
use common::*;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use gphl_workflow::config::GphlConfig;
use gphl_workflow::recentring::{calculate_recentring, RecentringContext};

fn write_solver(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write solver stub");
    let mut permissions = std::fs::metadata(&path).expect("stat stub").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("chmod stub");
    path
}

/// A solver that echoes back the --init-xyz triple as its solution.
const ECHO_SOLVER: &str = r#"#!/bin/sh
xyz=""
while [ $# -gt 0 ]; do
    case "$1" in
        --init-xyz) shift; xyz="$1" ;;
    esac
    shift
done
echo " Refined position X,Y,Z :  $xyz"
echo "NORMAL termination"
"#;

fn context(okp: [f64; 3], xyz: [f64; 3]) -> RecentringContext {
    RecentringContext {
        home_position: vec![0.0, 0.0, 0.0],
        cross_sec_of_soc: 0.02,
        ref_okp: okp,
        ref_xyz: xyz,
    }
}

#[tokio::test]
async fn echo_solver_returns_the_reference_position() {
    let dir = tempfile::tempdir().unwrap();
    write_instrumentation(dir.path());
    let solver = write_solver(dir.path(), "recen", ECHO_SOLVER);
    let config = GphlConfig::load(dir.path(), &solver, dir.path()).unwrap();

    let okp = [90.0, 30.0, 45.0];
    let ref_xyz = [0.1, -0.2, 0.3];
    let result =
        calculate_recentring(&config, dir.path(), okp, &context(okp, ref_xyz)).await;

    assert_eq!(result.len(), 3);
    assert_eq!(result.get("sampx"), Some(&0.1));
    assert_eq!(result.get("sampy"), Some(&-0.2));
    assert_eq!(result.get("phiy"), Some(&0.3));

    // The assembled input file is a well-formed namelist with the axis
    // directions and calibration values.
    let input = gphl_workflow::nml::read_group(&dir.path().join("temp_recen.in"), "recen_list")
        .expect("solver input file");
    assert_eq!(input.floats("omega_axis").unwrap().len(), 3);
    assert_eq!(input.float("cross_sec_of_soc"), Some(0.02));
    assert_eq!(input.floats("home").unwrap(), vec![0.0, 0.0, 0.0]);
}

#[tokio::test]
async fn non_zero_exit_yields_an_empty_result() {
    let dir = tempfile::tempdir().unwrap();
    write_instrumentation(dir.path());
    let solver = write_solver(
        dir.path(),
        "recen",
        "#!/bin/sh\necho 'X,Y,Z 1 2 3'\necho 'NORMAL termination'\nexit 3\n",
    );
    let config = GphlConfig::load(dir.path(), &solver, dir.path()).unwrap();

    let okp = [90.0, 30.0, 45.0];
    let result =
        calculate_recentring(&config, dir.path(), okp, &context(okp, [0.1, 0.2, 0.3])).await;
    assert!(result.is_empty());
}

#[tokio::test]
async fn missing_termination_marker_yields_an_empty_result() {
    let dir = tempfile::tempdir().unwrap();
    write_instrumentation(dir.path());
    let solver = write_solver(
        dir.path(),
        "recen",
        "#!/bin/sh\necho 'X,Y,Z 1 2 3'\necho 'ABNORMAL termination'\n",
    );
    let config = GphlConfig::load(dir.path(), &solver, dir.path()).unwrap();

    let okp = [90.0, 30.0, 45.0];
    let result =
        calculate_recentring(&config, dir.path(), okp, &context(okp, [0.1, 0.2, 0.3])).await;
    assert!(result.is_empty());
}

#[tokio::test]
async fn missing_executable_yields_an_empty_result() {
    let dir = tempfile::tempdir().unwrap();
    write_instrumentation(dir.path());
    let config =
        GphlConfig::load(dir.path(), dir.path().join("no-such-recen"), dir.path()).unwrap();

    let okp = [90.0, 30.0, 45.0];
    let result =
        calculate_recentring(&config, dir.path(), okp, &context(okp, [0.1, 0.2, 0.3])).await;
    assert!(result.is_empty());
}
