use aexec_common::exec::ProtocolError;
use aexec_common::relay::BOOT_WAIT_SCRIPT;
use aexec_common::resolve::ResolveError;
use aexec_common::{ExecError, Job, MemoryLock, RelayError, Session};
use std::path::Path;
use std::sync::Arc;

use crate::common::fixtures::DEVICE_ROOT;
use crate::common::{
    FakeRelay, FakeToolchain, RelayLog, TestPackage, init_test_logging, test_config,
};

fn session(
    relay: FakeRelay,
    toolchain: FakeToolchain,
    state: &Path,
) -> (Arc<FakeRelay>, Session<FakeRelay, FakeToolchain>) {
    let relay = Arc::new(relay);
    let session =
        Session::new(Arc::clone(&relay), toolchain, &test_config(state)).with_pid(1001);
    (relay, session)
}

fn job(pkg: &TestPackage, args: &[&str]) -> Job {
    Job::new(
        pkg.binary.clone(),
        args.iter().map(|a| a.to_string()).collect(),
        pkg.package_dir.clone(),
    )
}

/// The streamed remote command, if one was issued.
fn remote_command(relay: &FakeRelay) -> String {
    relay
        .calls()
        .into_iter()
        .find(|args| args[0] == "exec-out" && args[1].starts_with("export TMPDIR="))
        .map(|args| args[1].clone())
        .expect("no remote command issued")
}

#[tokio::test]
async fn test_standard_package_runs_in_mirrored_goroot() {
    init_test_logging();
    crate::test_log!("TEST START: test_standard_package_runs_in_mirrored_goroot");

    let state = tempfile::tempdir().unwrap();
    let pkg = TestPackage::new();
    let toolchain = FakeToolchain::new();
    toolchain.set_package("mime/multipart:true\n");
    let (relay, session) = session(
        FakeRelay::new().with_stream_output("PASS\nexitcode=0"),
        toolchain,
        state.path(),
    );

    let code = session.run(&job(&pkg, &["-test.v"])).await.unwrap();
    assert_eq!(code, 0);

    let calls = relay.calls();
    assert_eq!(
        calls[0],
        vec!["wait-for-device", "exec-out", BOOT_WAIT_SCRIPT]
    );

    let workspace = format!("{DEVICE_ROOT}/bind.test-1001");
    let pushes = relay.pushes();
    let staged: Vec<_> = pushes
        .iter()
        .filter(|args| args.last().unwrap().starts_with(&workspace))
        .collect();
    assert_eq!(staged.len(), 1, "only the binary is staged for std packages");
    assert_eq!(
        staged[0],
        &vec![
            "push".to_string(),
            pkg.binary.to_string_lossy().into_owned(),
            format!("{workspace}/bind.test"),
        ]
    );

    let command = remote_command(&relay);
    assert!(command.contains(&format!("cd \"{DEVICE_ROOT}/goroot/src/mime/multipart\"")));
    assert!(command.contains(&format!("'{workspace}/bind.test' -test.v;")));
    assert!(command.contains("export GOPROXY=https://proxy.golang.org,direct;"));
    assert!(command.ends_with("echo -n exitcode=$?"));

    assert_eq!(
        calls.last().unwrap(),
        &vec!["exec-out".to_string(), format!("rm -rf {workspace}")]
    );

    crate::test_log!("TEST PASS: test_standard_package_runs_in_mirrored_goroot");
}

#[tokio::test]
async fn test_external_package_stages_sources_and_ancestors() {
    init_test_logging();
    crate::test_log!("TEST START: test_external_package_stages_sources_and_ancestors");

    let state = tempfile::tempdir().unwrap();
    let pkg = TestPackage::new().with_outer_ancestors();
    let toolchain = FakeToolchain::new();
    toolchain.set_package(&format!("{}:false\n", TestPackage::IMPORT_PATH));
    let (relay, session) = session(FakeRelay::new(), toolchain, state.path());

    session.run(&job(&pkg, &[])).await.unwrap();

    let workspace = format!("{DEVICE_ROOT}/bind.test-1001");
    let src = format!("{workspace}/gopath/src");
    let cwd = format!("{src}/example.com/x/mobile/bind");
    let module = format!("{src}/example.com/x/mobile");
    let outer = format!("{src}/example.com/x");

    // Everything between the sync and the run, in order.
    let calls = relay.calls();
    let start = calls
        .iter()
        .position(|args| args[1] == format!("mkdir -p {cwd}"))
        .expect("package directory not created");
    let staging: Vec<Vec<String>> = calls[start..]
        .iter()
        .take_while(|args| !args[1].starts_with("export TMPDIR="))
        .cloned()
        .collect();

    // Ancestor files walk from the package directory up to `src`.
    let expected: Vec<Vec<String>> = vec![
        vec!["exec-out".into(), format!("mkdir -p {cwd}")],
        vec!["exec-out".into(), format!("mkdir -p {cwd}")],
        vec!["push".into(), pkg.local("testdata"), cwd.clone()],
        vec!["exec-out".into(), format!("mkdir -p {module}")],
        vec!["push".into(), pkg.local_up(1, "go.mod"), module.clone()],
        vec!["exec-out".into(), format!("mkdir -p {module}")],
        vec!["push".into(), pkg.local_up(1, "go.sum"), module.clone()],
        vec!["exec-out".into(), format!("mkdir -p {outer}")],
        vec!["push".into(), pkg.local_up(2, "testdata"), outer.clone()],
        vec!["exec-out".into(), format!("mkdir -p {src}")],
        vec!["push".into(), pkg.local_up(4, "go.mod"), src.clone()],
        vec![
            "push".into(),
            pkg.local("a.go"),
            pkg.local("a_test.go"),
            pkg.local("b.go"),
            cwd.clone(),
        ],
        vec![
            "push".into(),
            pkg.binary.to_string_lossy().into_owned(),
            format!("{workspace}/bind.test"),
        ],
    ];
    assert_eq!(staging, expected);

    let command = remote_command(&relay);
    assert!(command.contains(&format!("cd \"{cwd}\"")));
    assert!(command.contains(&format!("export GOPATH=\"{workspace}/gopath\"")));

    crate::test_log!("TEST PASS: test_external_package_stages_sources_and_ancestors");
}

#[tokio::test]
async fn test_remote_exit_code_is_returned() {
    init_test_logging();
    crate::test_log!("TEST START: test_remote_exit_code_is_returned");

    let state = tempfile::tempdir().unwrap();
    let pkg = TestPackage::new();
    let (_, session) = session(
        FakeRelay::new().with_stream_output("--- FAIL: TestX\nexitcode=3"),
        FakeToolchain::new(),
        state.path(),
    );

    assert_eq!(session.run(&job(&pkg, &[])).await.unwrap(), 3);

    crate::test_log!("TEST PASS: test_remote_exit_code_is_returned");
}

#[tokio::test]
async fn test_sentinel_wins_over_relay_failure() {
    init_test_logging();
    crate::test_log!("TEST START: test_sentinel_wins_over_relay_failure");

    let state = tempfile::tempdir().unwrap();
    let pkg = TestPackage::new();
    let (_, session) = session(
        FakeRelay::new()
            .with_stream_output("ok\nexitcode=0")
            .with_stream_failure(),
        FakeToolchain::new(),
        state.path(),
    );

    assert_eq!(session.run(&job(&pkg, &[])).await.unwrap(), 0);

    crate::test_log!("TEST PASS: test_sentinel_wins_over_relay_failure");
}

#[tokio::test]
async fn test_relay_failure_without_sentinel_is_fatal() {
    init_test_logging();
    crate::test_log!("TEST START: test_relay_failure_without_sentinel_is_fatal");

    let state = tempfile::tempdir().unwrap();
    let pkg = TestPackage::new();
    let (relay, session) = session(
        FakeRelay::new()
            .with_stream_output("error: device offline")
            .with_stream_failure(),
        FakeToolchain::new(),
        state.path(),
    );

    let err = session.run(&job(&pkg, &[])).await.unwrap_err();
    assert!(matches!(err, ExecError::Relay(RelayError::Failed { .. })));
    assert_eq!(
        relay.shells().last().unwrap(),
        &format!("rm -rf {DEVICE_ROOT}/bind.test-1001")
    );

    crate::test_log!("TEST PASS: test_relay_failure_without_sentinel_is_fatal");
}

#[tokio::test]
async fn test_missing_exit_code_is_protocol_error() {
    init_test_logging();
    crate::test_log!("TEST START: test_missing_exit_code_is_protocol_error");

    let state = tempfile::tempdir().unwrap();
    let pkg = TestPackage::new();
    let (_, session) = session(
        FakeRelay::new().with_stream_output("killed"),
        FakeToolchain::new(),
        state.path(),
    );

    let err = session.run(&job(&pkg, &[])).await.unwrap_err();
    match err {
        ExecError::Protocol(ProtocolError::NoExitCode { output }) => assert_eq!(output, "killed"),
        other => panic!("unexpected error: {other}"),
    }

    crate::test_log!("TEST PASS: test_missing_exit_code_is_protocol_error");
}

#[tokio::test]
async fn test_workspace_removed_when_resolution_fails() {
    init_test_logging();
    crate::test_log!("TEST START: test_workspace_removed_when_resolution_fails");

    let state = tempfile::tempdir().unwrap();
    let pkg = TestPackage::new();
    let toolchain = FakeToolchain::new();
    toolchain.set_package(".:false\n");
    let (relay, session) = session(FakeRelay::new(), toolchain, state.path());

    let err = session.run(&job(&pkg, &[])).await.unwrap_err();
    assert!(matches!(err, ExecError::Resolve(ResolveError::NoImportPath)));
    assert_eq!(
        err.to_string(),
        "current directory does not have a Go import path"
    );
    assert_eq!(
        relay.shells().last().unwrap(),
        &format!("rm -rf {DEVICE_ROOT}/bind.test-1001")
    );

    crate::test_log!("TEST PASS: test_workspace_removed_when_resolution_fails");
}

#[tokio::test]
async fn test_cleanup_failure_does_not_change_result() {
    init_test_logging();
    crate::test_log!("TEST START: test_cleanup_failure_does_not_change_result");

    let state = tempfile::tempdir().unwrap();
    let pkg = TestPackage::new();
    let (relay, session) = session(
        FakeRelay::new()
            .with_stream_output("exitcode=5")
            .fail_when(&format!("rm -rf {DEVICE_ROOT}/bind.test-")),
        FakeToolchain::new(),
        state.path(),
    );

    assert_eq!(session.run(&job(&pkg, &[])).await.unwrap(), 5);
    assert!(relay.shells().last().unwrap().starts_with("rm -rf"));

    crate::test_log!("TEST PASS: test_cleanup_failure_does_not_change_result");
}

#[tokio::test]
async fn test_second_run_reuses_mirror() {
    init_test_logging();
    crate::test_log!("TEST START: test_second_run_reuses_mirror");

    let state = tempfile::tempdir().unwrap();
    let pkg = TestPackage::new();
    let (relay, session) = session(FakeRelay::new(), FakeToolchain::new(), state.path());

    session.run(&job(&pkg, &[])).await.unwrap();
    let first = relay.calls().len();
    session.run(&job(&pkg, &[])).await.unwrap();
    let second = relay.calls().len() - first;

    // wait, push binary, run, cleanup
    assert_eq!(second, 4);

    crate::test_log!("TEST PASS: test_second_run_reuses_mirror");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_relay_lock_serializes_sessions() {
    init_test_logging();
    crate::test_log!("TEST START: test_relay_lock_serializes_sessions");

    let state = tempfile::tempdir().unwrap();
    let log = RelayLog::default();
    let lock = MemoryLock::new();

    let mut handles = Vec::new();
    for (label, pid) in [("first", 1001), ("second", 1002)] {
        let pkg = TestPackage::new();
        let relay = Arc::new(FakeRelay::shared(label, Arc::clone(&log)));
        let session = Session::new(relay, FakeToolchain::new(), &test_config(state.path()))
            .with_pid(pid);
        let lock = lock.clone();
        handles.push(tokio::spawn(async move {
            let code = session.run_exclusive(lock, &job(&pkg, &[])).await;
            drop(pkg);
            code
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 0);
    }

    // Each session's relay calls form one uninterrupted block.
    let labels: Vec<String> = log.lock().unwrap().iter().map(|(l, _)| l.clone()).collect();
    let mut blocks = labels.clone();
    blocks.dedup();
    assert_eq!(blocks.len(), 2, "relay calls interleaved: {labels:?}");

    // Only the first holder had to sync.
    let wipes = log
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, args)| args[0] == "exec-out" && args[1] == format!("rm -rf {DEVICE_ROOT}"))
        .count();
    assert_eq!(wipes, 1);

    let workspaces: Vec<String> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, args)| args[0] == "exec-out" && args[1].starts_with("rm -rf "))
        .map(|(_, args)| args[1].clone())
        .filter(|cmd| cmd.contains(".test-"))
        .collect();
    assert_eq!(workspaces.len(), 2);
    assert_ne!(workspaces[0], workspaces[1]);
    assert!(!lock.is_held());

    crate::test_log!("TEST PASS: test_relay_lock_serializes_sessions");
}
