//! End-to-end scale reconciliation with real children

use phpeek_pm::{AggregateState, InstanceState};
use pm_e2e::{longrun, stack_with, wait_for};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_scale_one_to_three_to_one() {
    let stack = stack_with(vec![longrun("pool", &["/bin/sleep", "60"])]).await;
    let cancel = CancellationToken::new();

    stack.scheduler.start_process("pool", &cancel).await.unwrap();
    let (snapshot, _) = stack.scheduler.describe("pool").await.unwrap();
    assert_eq!(snapshot.instances.len(), 1);
    let original_pid = snapshot.instances[0].pid.unwrap();

    // up to three: slots 0, 1, 2 all running
    stack.scheduler.set_scale("pool", 3, &cancel).await.unwrap();
    let (snapshot, _) = stack.scheduler.describe("pool").await.unwrap();
    assert_eq!(snapshot.state, AggregateState::Running);
    let mut slots: Vec<u32> = snapshot.instances.iter().map(|i| i.slot).collect();
    slots.sort_unstable();
    assert_eq!(slots, vec![0, 1, 2]);
    assert!(snapshot
        .instances
        .iter()
        .all(|i| i.state == InstanceState::Running));

    // back to one: the highest slots drain, slot 0 is untouched
    stack.scheduler.set_scale("pool", 1, &cancel).await.unwrap();
    let (snapshot, _) = stack.scheduler.describe("pool").await.unwrap();
    assert_eq!(snapshot.instances.len(), 1);
    assert_eq!(snapshot.instances[0].slot, 0);
    assert_eq!(snapshot.instances[0].pid, Some(original_pid));
    assert_eq!(snapshot.state, AggregateState::Running);
}

#[tokio::test]
async fn test_adjust_scale_is_inverse() {
    let mut def = longrun("pool", &["/bin/sleep", "60"]);
    def.scale = 2;
    let stack = stack_with(vec![def]).await;
    let cancel = CancellationToken::new();

    stack.scheduler.start_process("pool", &cancel).await.unwrap();
    stack.scheduler.adjust_scale("pool", 2, &cancel).await.unwrap();
    let (snapshot, _) = stack.scheduler.describe("pool").await.unwrap();
    assert_eq!(snapshot.desired_scale, 4);

    stack.scheduler.adjust_scale("pool", -2, &cancel).await.unwrap();
    let (snapshot, _) = stack.scheduler.describe("pool").await.unwrap();
    assert_eq!(snapshot.desired_scale, 2);
    assert_eq!(snapshot.instances.len(), 2);

    stack.scheduler.stop_process("pool", &cancel).await.unwrap();
}

#[tokio::test]
async fn test_crashed_slot_is_respawned_not_reslotted() {
    let mut def = longrun("pool", &["/bin/sleep", "60"]);
    def.scale = 2;
    def.restart_delay_seconds = 1;
    let stack = stack_with(vec![def]).await;
    let cancel = CancellationToken::new();

    stack.scheduler.start_process("pool", &cancel).await.unwrap();
    let (snapshot, _) = stack.scheduler.describe("pool").await.unwrap();
    let victim = snapshot.instances[1].pid.unwrap();

    // kill slot 1 from outside; the supervisor brings the same slot back
    std::process::Command::new("kill")
        .args(["-9", &victim.to_string()])
        .status()
        .unwrap();

    wait_for(&stack.scheduler, "pool", Duration::from_secs(15), |s| {
        s.instances.len() == 2
            && s.instances
                .iter()
                .all(|i| i.state == InstanceState::Running)
            && s.instances[1].pid != Some(victim)
    })
    .await;

    let (snapshot, _) = stack.scheduler.describe("pool").await.unwrap();
    let mut slots: Vec<u32> = snapshot.instances.iter().map(|i| i.slot).collect();
    slots.sort_unstable();
    assert_eq!(slots, vec![0, 1]);
    assert_eq!(snapshot.instances[1].restart_count, 1);

    stack.scheduler.stop_process("pool", &cancel).await.unwrap();
}
