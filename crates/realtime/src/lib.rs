//! # Realtime Core
//!
//! Core modules shared by the live map crates: the transport boundary and the
//! transport and configuration errors.

mod error;
mod provider;

pub use crate::error::*;
pub use crate::provider::*;
