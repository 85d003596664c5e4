//! # Vehicle Position
//!
//! Decodes high-frequency positioning (HFP) messages published by the transit
//! operator into typed vehicle position reports.

mod error;
mod hfp;
mod report;

pub use self::error::DecodeError;
pub use self::hfp::{decode, decode_at, mode_from_topic};
pub use self::report::*;

/// Result type for the decoder.
pub type Result<T> = anyhow::Result<T, DecodeError>;
