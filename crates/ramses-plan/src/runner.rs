//! Trigger-driven planning loop.
//!
//! Analyse signals the end of its iteration on an mpsc channel; each
//! signal runs exactly one planning iteration. A failed iteration is
//! logged and the loop keeps waiting: the failed-module flag in
//! Knowledge records the stall.

use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::planner::Planner;

pub struct PlanRunner {
    planner: Planner,
}

impl PlanRunner {
    pub fn new(planner: Planner) -> Self {
        Self { planner }
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Run until `shutdown` changes or every trigger sender is dropped.
    /// Returns the number of iterations run.
    pub async fn run(
        &mut self,
        mut trigger: mpsc::Receiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) -> u64 {
        info!("plan runner started");
        let mut iterations = 0;

        loop {
            tokio::select! {
                signal = trigger.recv() => {
                    if signal.is_none() {
                        info!("trigger channel closed, plan runner stopping");
                        break;
                    }
                    iterations += 1;
                    if let Err(e) = self.planner.run_iteration().await {
                        error!(error = %e, phase = %self.planner.phase(), "plan iteration failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("plan runner shutting down");
                    break;
                }
            }
        }
        iterations
    }
}
