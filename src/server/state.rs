//! Application state shared across handlers.

use std::sync::Arc;
use tokio::sync::watch;

use crate::config::Config;
use crate::library::PhotoLibrary;
use crate::rotation::EngineStatus;

#[derive(Clone)]
pub struct AppState {
    pub library: Arc<PhotoLibrary>,
    pub config: Arc<Config>,
    /// Live rotation engine status, when an engine runs in this process.
    pub engine: Option<watch::Receiver<EngineStatus>>,
}

impl AppState {
    pub fn new(library: Arc<PhotoLibrary>, config: Arc<Config>) -> Self {
        Self {
            library,
            config,
            engine: None,
        }
    }

    pub fn with_engine(mut self, status: watch::Receiver<EngineStatus>) -> Self {
        self.engine = Some(status);
        self
    }

    pub fn engine_status(&self) -> Option<EngineStatus> {
        self.engine.as_ref().map(|rx| rx.borrow().clone())
    }
}
