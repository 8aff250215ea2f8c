//! The rotation engine: a long-lived task that converts pending photos and
//! periodically shows the least-shown one.
//!
//! Each cycle drains the conversion queue, then picks the next photo for
//! display. After a successful display the engine sleeps for a random
//! interval between the configured minimum and maximum; after an idle cycle
//! or any failure it backs off for a short fixed delay. No error ends the
//! loop; only [`RotationHandle::shutdown`] (or dropping every handle) does.
//!
//! Progress is published on a `watch` channel as [`EngineStatus`].

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::DisplayConfig;
use crate::db::Photo;
use crate::error::{Error, Result};
use crate::library::PhotoLibrary;

/// Sleep intervals of the rotation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationTiming {
    pub min_display: Duration,
    pub max_display: Duration,
    pub backoff: Duration,
}

impl RotationTiming {
    /// Uniformly sampled time to keep the current photo on the panel.
    pub fn sample_display_time(&self) -> Duration {
        if self.max_display <= self.min_display {
            return self.min_display;
        }
        let min = self.min_display.as_millis() as u64;
        let max = self.max_display.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

impl Default for RotationTiming {
    fn default() -> Self {
        Self::from(&DisplayConfig::default())
    }
}

impl From<&DisplayConfig> for RotationTiming {
    fn from(config: &DisplayConfig) -> Self {
        Self {
            min_display: config.min_display(),
            max_display: config.max_display(),
            backoff: config.backoff(),
        }
    }
}

/// What the engine is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Starting,
    Converting,
    Displaying,
    Sleeping,
    Idle,
    Backoff,
    Stopped,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Starting => "starting",
            EngineState::Converting => "converting",
            EngineState::Displaying => "displaying",
            EngineState::Sleeping => "sleeping",
            EngineState::Idle => "idle",
            EngineState::Backoff => "backoff",
            EngineState::Stopped => "stopped",
        }
    }
}

/// Snapshot published after every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    /// Filename of the photo currently on the panel.
    pub current_photo: Option<String>,
    pub conversions: u64,
    pub conversion_failures: u64,
    pub displays: u64,
    pub display_failures: u64,
    pub next_wake: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: EngineState::Starting,
            current_photo: None,
            conversions: 0,
            conversion_failures: 0,
            displays: 0,
            display_failures: 0,
            next_wake: None,
            last_error: None,
        }
    }
}

/// Result of one conversion pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub converted: usize,
    pub failed: usize,
}

/// Result of one full cycle; decides the following delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Displayed { photo_id: i64, next_in: Duration },
    Idle,
    RenderFailed(String),
    Failed(String),
}

impl CycleOutcome {
    pub fn delay(&self, timing: &RotationTiming) -> Duration {
        match self {
            CycleOutcome::Displayed { next_in, .. } => *next_in,
            CycleOutcome::Idle | CycleOutcome::RenderFailed(_) | CycleOutcome::Failed(_) => {
                timing.backoff
            }
        }
    }

    fn resting_state(&self) -> EngineState {
        match self {
            CycleOutcome::Displayed { .. } => EngineState::Sleeping,
            CycleOutcome::Idle => EngineState::Idle,
            CycleOutcome::RenderFailed(_) | CycleOutcome::Failed(_) => EngineState::Backoff,
        }
    }
}

pub struct RotationEngine {
    library: Arc<PhotoLibrary>,
    timing: RotationTiming,
    status: watch::Sender<EngineStatus>,
    shutdown: watch::Receiver<bool>,
}

impl RotationEngine {
    pub fn new(library: Arc<PhotoLibrary>, timing: RotationTiming) -> Self {
        let (status, _) = watch::channel(EngineStatus::default());
        // Replaced by spawn; until then nothing can request a stop
        let (_, shutdown) = watch::channel(false);
        Self {
            library,
            timing,
            status,
            shutdown,
        }
    }

    pub fn timing(&self) -> &RotationTiming {
        &self.timing
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn update(&self, modify: impl FnOnce(&mut EngineStatus)) {
        self.status.send_modify(modify);
    }

    /// Start the loop on the tokio runtime.
    pub fn spawn(mut self) -> RotationHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        self.shutdown = shutdown_rx;
        let status = self.status.subscribe();
        let join = tokio::spawn(self.run());
        RotationHandle {
            shutdown,
            status,
            join,
        }
    }

    async fn run(mut self) {
        tracing::info!(
            min_display = ?self.timing.min_display,
            max_display = ?self.timing.max_display,
            backoff = ?self.timing.backoff,
            "Rotation engine started"
        );

        while !self.is_shutdown() {
            let outcome = self.run_cycle().await;
            let delay = outcome.delay(&self.timing);

            let wake = chrono::Duration::from_std(delay)
                .ok()
                .map(|d| Utc::now() + d);
            self.update(|status| {
                status.state = outcome.resting_state();
                status.next_wake = wake;
            });
            tracing::debug!(?outcome, ?delay, "Rotation cycle finished");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = self.shutdown.changed() => {
                    // An error means every handle is gone
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.library.power_down_display().await;
        self.update(|status| {
            status.state = EngineState::Stopped;
            status.next_wake = None;
        });
        tracing::info!("Rotation engine stopped");
    }

    /// One complete cycle: drain conversions, then show the next photo.
    /// Never fails; failures are folded into the outcome.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if let Err(e) = self.drain_conversions().await {
            tracing::error!(error = %e, "Error in conversion pass");
            self.update(|status| status.last_error = Some(e.to_string()));
            return CycleOutcome::Failed(e.to_string());
        }

        if self.is_shutdown() {
            return CycleOutcome::Idle;
        }

        match self.select_and_display().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Error in display selection");
                self.update(|status| status.last_error = Some(e.to_string()));
                CycleOutcome::Failed(e.to_string())
            }
        }
    }

    /// Convert every pending photo. Photos that fail are skipped for the
    /// rest of this pass and retried on the next one.
    pub async fn drain_conversions(&self) -> Result<DrainSummary> {
        let mut summary = DrainSummary::default();
        let mut failed_ids = Vec::new();

        while !self.is_shutdown() {
            let Some(photo) = self.library.db().next_unconverted_excluding(&failed_ids)? else {
                break;
            };

            self.update(|status| status.state = EngineState::Converting);
            match self.library.convert_photo(&photo).await {
                Ok(_) => {
                    summary.converted += 1;
                    self.update(|status| status.conversions += 1);
                }
                Err(e) => {
                    tracing::error!(
                        photo_id = photo.id,
                        filename = %photo.filename,
                        error = %e,
                        "Conversion failed, will retry next cycle"
                    );
                    summary.failed += 1;
                    failed_ids.push(photo.id);
                    self.update(|status| {
                        status.conversion_failures += 1;
                        status.last_error = Some(e.to_string());
                    });
                }
            }
        }

        if summary.converted > 0 || summary.failed > 0 {
            tracing::info!(
                converted = summary.converted,
                failed = summary.failed,
                "Conversion pass complete"
            );
        }
        Ok(summary)
    }

    /// Show the least-shown converted photo. Store failures while picking are
    /// returned as errors; render failures become `RenderFailed`.
    pub async fn select_and_display(&self) -> Result<CycleOutcome> {
        let Some(photo) = self.library.db().next_for_display()? else {
            tracing::debug!("No converted photos to display");
            return Ok(CycleOutcome::Idle);
        };

        self.update(|status| status.state = EngineState::Displaying);
        match self.library.display_photo(&photo).await {
            Ok(shown) => Ok(self.displayed(&shown)),
            Err(e @ Error::Storage(_)) => Err(e),
            Err(e) => {
                tracing::error!(
                    photo_id = photo.id,
                    filename = %photo.filename,
                    error = %e,
                    "Display failed"
                );
                self.update(|status| {
                    status.display_failures += 1;
                    status.last_error = Some(e.to_string());
                });
                Ok(CycleOutcome::RenderFailed(e.to_string()))
            }
        }
    }

    fn displayed(&self, photo: &Photo) -> CycleOutcome {
        let next_in = self.timing.sample_display_time();
        tracing::info!(
            photo_id = photo.id,
            filename = %photo.filename,
            display_count = photo.display_count,
            next_in_secs = next_in.as_secs(),
            "Rotated display"
        );
        self.update(|status| {
            status.displays += 1;
            status.current_photo = Some(photo.filename.clone());
        });
        CycleOutcome::Displayed {
            photo_id: photo.id,
            next_in,
        }
    }
}

/// Owner's side of a running engine.
pub struct RotationHandle {
    shutdown: watch::Sender<bool>,
    status: watch::Receiver<EngineStatus>,
    join: JoinHandle<()>,
}

impl RotationHandle {
    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// A receiver that sees every status update.
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    /// Signal the loop to stop and wait for it. An in-flight conversion or
    /// render finishes first; sleeps are interrupted.
    /// Dropping the handle without calling this also stops the loop at its
    /// next sleep.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        match self.join.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => tracing::error!(error = ?e, "Rotation engine panicked"),
            Err(e) => tracing::warn!(error = ?e, "Rotation engine task was cancelled"),
        }
    }
}
