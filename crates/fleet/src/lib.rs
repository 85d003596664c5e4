//! # Fleet
//!
//! Vehicle registry and the change feed that publishes its mutations to
//! renderers.

mod feed;
mod registry;

pub use self::feed::*;
pub use self::registry::*;
