//! Health monitor
//! One task per health-checked process. Probes on the configured cadence,
//! maintains the consecutive success/failure streaks, publishes the health
//! snapshot that gates starting instances, and asks the process controller
//! to restart the unhealthiest instance when the failure threshold trips.

use crate::application::instance_controller::{HealthSnapshot, RestartReason};
use crate::application::process_controller::ProcessController;
use crate::domain::{AggregateState, InstanceState};
use crate::infrastructure::{metrics, probes};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Start monitoring a process. The task ends on cancellation or when a
/// reload removes the health check from the definition.
pub fn spawn(controller: Arc<ProcessController>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run(controller, cancel))
}

async fn run(controller: Arc<ProcessController>, cancel: CancellationToken) {
    let process = controller.name().to_string();
    let mut consecutive_successes = 0u32;
    let mut consecutive_failures = 0u32;
    let mut snapshot = HealthSnapshot::default();
    info!(process = %process, "Health monitor started");

    loop {
        // Re-read the definition every cycle so reloads apply
        let def = controller.def();
        let Some(check) = def.health_check.clone() else {
            debug!(process = %process, "Health check removed, monitor exiting");
            break;
        };

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(check.interval_seconds.max(1))) => {}
            _ = cancel.cancelled() => break,
        }

        // Suspended while the process is not up at all or draining
        match controller.aggregate() {
            AggregateState::Stopped
            | AggregateState::Stopping
            | AggregateState::Failed
            | AggregateState::Completed => continue,
            _ => {}
        }

        // Suspended for the initial grace window after the newest spawn
        let within_grace = controller.snapshot().instances.iter().any(|i| {
            i.state == InstanceState::Starting
                && i.started_at
                    .map(|t| {
                        let now = std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .map(|d| d.as_secs())
                            .unwrap_or(u64::MAX);
                        now.saturating_sub(t) < check.grace_period_seconds
                    })
                    .unwrap_or(false)
        });
        if within_grace {
            debug!(process = %process, "Within start grace period, probe skipped");
            continue;
        }

        let healthy = probes::probe(&check.probe, Duration::from_secs(check.timeout_seconds)).await;
        metrics::inc_health_check(
            &process,
            check.probe.kind(),
            if healthy { "success" } else { "failure" },
        );

        if healthy {
            consecutive_failures = 0;
            consecutive_successes += 1;
            snapshot.last_success = Some(Instant::now());
            if consecutive_successes >= check.healthy_threshold {
                if !snapshot.healthy {
                    info!(process = %process, streak = consecutive_successes, "Process healthy");
                }
                snapshot.healthy = true;
            }
            controller.publish_health(snapshot);
        } else {
            consecutive_successes = 0;
            consecutive_failures += 1;
            debug!(
                process = %process,
                streak = consecutive_failures,
                threshold = check.unhealthy_threshold,
                "Probe failed"
            );
            if consecutive_failures >= check.unhealthy_threshold {
                snapshot.healthy = false;
                controller.publish_health(snapshot);
                if let Some(slot) = pick_unhealthiest(&controller) {
                    warn!(
                        process = %process,
                        slot,
                        streak = consecutive_failures,
                        "Unhealthy threshold crossed, requesting restart"
                    );
                    controller.request_restart(slot, RestartReason::HealthCheck);
                }
                // A fresh streak starts after the intervention
                consecutive_failures = 0;
            } else {
                controller.publish_health(snapshot);
            }
        }
    }
    info!(process = %process, "Health monitor stopped");
}

/// The live instance with the longest failure streak; lowest slot on ties
fn pick_unhealthiest(controller: &ProcessController) -> Option<u32> {
    controller
        .instance_health_view()
        .into_iter()
        .filter(|(_, state, _)| state.is_live())
        .max_by(|a, b| a.2.cmp(&b.2).then(b.0.cmp(&a.0)))
        .map(|(slot, _, _)| slot)
}
