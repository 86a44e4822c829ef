//! End-to-end health checking: probes gate readiness and drive restarts

use phpeek_pm::{AggregateState, HealthCheckConfig, HealthProbe};
use pm_e2e::{longrun, stack_with, wait_for_state};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn tcp_check(port: u16) -> HealthCheckConfig {
    HealthCheckConfig {
        probe: HealthProbe::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        },
        interval_seconds: 1,
        timeout_seconds: 1,
        healthy_threshold: 1,
        unhealthy_threshold: 3,
        grace_period_seconds: 0,
    }
}

#[tokio::test]
async fn test_health_gated_start_with_listening_port() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            drop(stream);
        }
    });

    let mut def = longrun("api", &["/bin/sleep", "60"]);
    def.health_check = Some(tcp_check(port));
    let stack = stack_with(vec![def]).await;
    let cancel = CancellationToken::new();

    stack.scheduler.start_process("api", &cancel).await.unwrap();
    let (snapshot, _) = stack.scheduler.describe("api").await.unwrap();
    assert_eq!(snapshot.state, AggregateState::Running);
    stack.scheduler.stop_process("api", &cancel).await.unwrap();
}

#[tokio::test]
async fn test_unhealthy_process_gets_restarted() {
    // probe a port nothing listens on; after three failures the monitor
    // restarts the instance and the restart counter moves
    let mut def = longrun("deaf", &["/bin/sleep", "60"]);
    def.health_check = Some(tcp_check(1));
    let stack = stack_with(vec![def]).await;
    let cancel = CancellationToken::new();

    // readiness never arrives, so run start in the background
    let scheduler = stack.scheduler.clone();
    let start_cancel = cancel.child_token();
    let start_token = start_cancel.clone();
    let start = tokio::spawn(async move {
        let _ = scheduler.start_process("deaf", &start_token).await;
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let (snapshot, _) = stack.scheduler.describe("deaf").await.unwrap();
        if snapshot
            .instances
            .first()
            .map(|i| i.restart_count >= 1)
            .unwrap_or(false)
        {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "health monitor never restarted the instance"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    start_cancel.cancel();
    let _ = start.await;
    stack.scheduler.stop_process("deaf", &cancel).await.unwrap();
}

#[tokio::test]
async fn test_exec_probe_process_stays_up() {
    let mut def = longrun("checked", &["/bin/sleep", "60"]);
    def.health_check = Some(HealthCheckConfig {
        probe: HealthProbe::Exec {
            command: vec!["/bin/true".to_string()],
        },
        interval_seconds: 1,
        timeout_seconds: 2,
        healthy_threshold: 1,
        unhealthy_threshold: 3,
        grace_period_seconds: 0,
    });
    let stack = stack_with(vec![def]).await;
    let cancel = CancellationToken::new();

    stack.scheduler.start_process("checked", &cancel).await.unwrap();
    wait_for_state(
        &stack.scheduler,
        "checked",
        AggregateState::Running,
        Duration::from_secs(10),
    )
    .await;

    // a few probe cycles pass without a restart
    tokio::time::sleep(Duration::from_secs(3)).await;
    let (snapshot, _) = stack.scheduler.describe("checked").await.unwrap();
    assert_eq!(snapshot.instances[0].restart_count, 0);
    stack.scheduler.stop_process("checked", &cancel).await.unwrap();
}
