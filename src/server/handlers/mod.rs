//! HTTP request handlers.

pub mod admin;
pub mod photos;
pub mod ui;

pub use admin::*;
pub use photos::*;
pub use ui::*;

use serde::Serialize;

/// Plain acknowledgement body.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
