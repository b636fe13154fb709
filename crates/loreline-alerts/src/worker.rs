//! Periodic alert evaluation worker.
//!
//! Walks the scopes seen in the ledger round-robin, bounding how many are
//! evaluated per tick so a large tenant population cannot starve the
//! request path.

use std::sync::Arc;

use loreline_ledger::TraceStore;
use tokio::sync::watch;
use tracing::{error, info};

use crate::manager::AlertsManager;

pub struct AlertWorker {
    manager: Arc<AlertsManager>,
    ledger: Arc<TraceStore>,
    window: String,
    interval_secs: u64,
    max_scopes_per_tick: usize,
    cursor: usize,
}

impl AlertWorker {
    pub fn new(
        manager: Arc<AlertsManager>,
        ledger: Arc<TraceStore>,
        window: impl Into<String>,
        interval_secs: u64,
        max_scopes_per_tick: usize,
    ) -> Self {
        Self {
            manager,
            ledger,
            window: window.into(),
            interval_secs,
            max_scopes_per_tick: max_scopes_per_tick.max(1),
            cursor: 0,
        }
    }

    /// One evaluation round over the next slice of scopes.
    pub async fn tick(&mut self) {
        let scopes = match self.ledger.scopes() {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "scope listing failed");
                return;
            }
        };
        if scopes.is_empty() {
            return;
        }

        let batch = self.max_scopes_per_tick.min(scopes.len());
        for _ in 0..batch {
            let scope = &scopes[self.cursor % scopes.len()];
            self.cursor = (self.cursor + 1) % scopes.len();
            if let Err(e) = self
                .manager
                .evaluate_and_persist(scope, &self.window, true)
                .await
            {
                error!(scope = %scope, error = %e, "alert evaluation failed");
            }
        }
    }

    /// Worker loop: ticks until `shutdown` broadcasts `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval_secs, "alert worker started");
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("alert worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
