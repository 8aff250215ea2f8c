//! inkframe: an e-ink photo frame.
//!
//! Photos arrive over HTTP, are transcoded into 1-bit dithered bitmaps sized
//! for the panel, and are rotated onto the display by a background engine
//! that always prefers the least-shown photo.

pub mod config;
pub mod db;
pub mod display;
pub mod error;
pub mod library;
pub mod logging;
pub mod rotation;
pub mod server;
pub mod transcode;

pub use error::{Error, Result};
