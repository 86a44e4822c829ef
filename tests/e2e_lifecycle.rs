//! End-to-end lifecycle: real children through start, crash, restart, stop

use phpeek_pm::{AggregateState, InstanceState, ProcessType, RestartPolicy};
use pm_e2e::{longrun, stack_with, wait_for, wait_for_state};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_start_and_stop_longrun() {
    let stack = stack_with(vec![longrun("web", &["/bin/sleep", "60"])]).await;
    let cancel = CancellationToken::new();

    stack.scheduler.start_process("web", &cancel).await.unwrap();
    let (snapshot, _) = stack.scheduler.describe("web").await.unwrap();
    assert_eq!(snapshot.state, AggregateState::Running);
    assert_eq!(snapshot.instances.len(), 1);
    assert_eq!(snapshot.instances[0].id, "web-0");
    assert!(snapshot.instances[0].pid.is_some());

    stack.scheduler.stop_process("web", &cancel).await.unwrap();
    let (snapshot, _) = stack.scheduler.describe("web").await.unwrap();
    assert_eq!(snapshot.state, AggregateState::Stopped);
    assert_eq!(snapshot.instances[0].state, InstanceState::Stopped);
    assert!(snapshot.instances[0].pid.is_none());
}

#[tokio::test]
async fn test_crashing_process_restarts_with_counted_attempts() {
    let mut def = longrun("flaky", &["/bin/sh", "-c", "sleep 2; exit 1"]);
    def.restart = RestartPolicy::OnFailure;
    def.restart_delay_seconds = 1;
    let stack = stack_with(vec![def]).await;
    let cancel = CancellationToken::new();

    stack.scheduler.start_process("flaky", &cancel).await.unwrap();

    // the child dies after 2 s and comes back; watch the counter move
    wait_for(&stack.scheduler, "flaky", Duration::from_secs(20), |s| {
        s.instances.first().map(|i| i.restart_count >= 1).unwrap_or(false)
    })
    .await;

    stack.scheduler.stop_process("flaky", &cancel).await.unwrap();
}

#[tokio::test]
async fn test_never_policy_fails_terminally() {
    let mut def = longrun("brittle", &["/bin/sh", "-c", "exit 7"]);
    def.restart = RestartPolicy::Never;
    let stack = stack_with(vec![def]).await;
    let cancel = CancellationToken::new();

    // the child exits within the min-healthy window, so start reports
    // the failure
    let err = stack
        .scheduler
        .start_process("brittle", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "spawn_failed");

    let (snapshot, _) = stack.scheduler.describe("brittle").await.unwrap();
    assert_eq!(snapshot.state, AggregateState::Failed);
    assert_eq!(snapshot.instances[0].last_exit_code, Some(7));
}

#[tokio::test]
async fn test_oneshot_completes_and_reruns_on_start() {
    let mut def = longrun("migrate", &["/bin/sh", "-c", "exit 0"]);
    def.process_type = ProcessType::Oneshot;
    let stack = stack_with(vec![def]).await;
    let cancel = CancellationToken::new();

    stack.scheduler.start_process("migrate", &cancel).await.unwrap();
    wait_for_state(
        &stack.scheduler,
        "migrate",
        AggregateState::Completed,
        Duration::from_secs(10),
    )
    .await;

    // a completed oneshot can be started again as a new execution
    stack.scheduler.start_process("migrate", &cancel).await.unwrap();
    wait_for_state(
        &stack.scheduler,
        "migrate",
        AggregateState::Completed,
        Duration::from_secs(10),
    )
    .await;

    // give the history collector a beat
    tokio::time::sleep(Duration::from_millis(200)).await;
    let history = stack.scheduler.oneshot_history(0);
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.exit_code == Some(0)));
}

#[tokio::test]
async fn test_stop_timeout_escalates_to_kill() {
    // the child ignores SIGTERM; the stop must escalate to SIGKILL after
    // the configured timeout
    let mut def = longrun(
        "stubborn",
        &["/bin/sh", "-c", "trap '' TERM; sleep 60 & wait"],
    );
    def.stop_timeout_seconds = 1;
    let stack = stack_with(vec![def]).await;
    let cancel = CancellationToken::new();

    stack.scheduler.start_process("stubborn", &cancel).await.unwrap();

    let started = std::time::Instant::now();
    stack.scheduler.stop_process("stubborn", &cancel).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(1), "stopped in {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "stopped in {:?}", elapsed);
    let (snapshot, _) = stack.scheduler.describe("stubborn").await.unwrap();
    assert_eq!(snapshot.state, AggregateState::Stopped);
}

#[tokio::test]
async fn test_child_sees_exported_identity() {
    let stack = stack_with(vec![]).await;
    let cancel = CancellationToken::new();
    let marker = stack.dir.path().join("identity");

    let mut def = longrun(
        "ident",
        &[
            "/bin/sh",
            "-c",
            &format!(
                "echo \"$PHPEEK_PM_PROCESS_NAME/$PHPEEK_PM_INSTANCE_ID\" > {}; sleep 60",
                marker.display()
            ),
        ],
    );
    def.process_type = ProcessType::Longrun;
    stack.scheduler.add_process(def).await.unwrap();
    stack.scheduler.start_process("ident", &cancel).await.unwrap();

    let content = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(content.trim(), "ident/ident-0");
    stack.scheduler.stop_process("ident", &cancel).await.unwrap();
}
