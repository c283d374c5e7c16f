use std::sync::Arc;

use tracing::{error, info, warn};

use crate::detect::engine::DetectionEngine;
use crate::scheduler::history::{RunHistory, RunTrigger};
use crate::scheduler::FleetSchedule;

/// Main scheduler loop: sleep until the next cron time, run a fleet pass,
/// record it. A failed pass is logged and the loop carries on.
pub async fn run_scheduler_loop(
    schedule: FleetSchedule,
    engine: Arc<DetectionEngine>,
    history: RunHistory,
) {
    info!(cron = schedule.expr(), "Scheduler engine started");

    loop {
        let now = engine.clock().now();
        let Some(next) = schedule.next_after(now) else {
            warn!(cron = schedule.expr(), "cron schedule has no future fire times, stopping");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next = %next.to_rfc3339(), "next fleet pass scheduled");
        tokio::time::sleep(wait).await;

        match engine.run_for_fleet(RunTrigger::Scheduled).await {
            Ok(report) => {
                if let Err(e) = history.record(&report).await {
                    error!(run_id = %report.id, error = %e, "failed to record fleet run");
                }
            }
            Err(e) => error!(error = %e, "scheduled fleet pass failed"),
        }
    }
}
