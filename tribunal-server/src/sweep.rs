//! Background deadline sweep.
//!
//! Cases do not expire themselves: a periodic pass asks the orchestrator to
//! expire every lapsed window. The sweep is safe to run at any time and at
//! any frequency; not-yet-due cases are no-ops and version races with
//! caller commands are skipped until the next pass.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::orchestrator::Orchestrator;

pub async fn deadline_sweep_loop(orchestrator: Arc<Orchestrator>, interval_secs: u64) {
    let mut interval = interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        // Correlation id so one pass's log lines can be grouped.
        let pass_id = Uuid::new_v4().to_string();
        match orchestrator.run_deadline_sweep(Utc::now()).await {
            Ok(stats) => {
                if stats.transitioned > 0 || stats.conflicts > 0 {
                    info!(
                        "deadline sweep {}: {} examined, {} expired, {} version conflicts",
                        pass_id, stats.examined, stats.transitioned, stats.conflicts
                    );
                } else {
                    debug!(
                        "deadline sweep {}: {} examined, nothing due",
                        pass_id, stats.examined
                    );
                }
            }
            Err(e) => {
                error!("deadline sweep {} failed: {}", pass_id, e);
            }
        }
    }
}
