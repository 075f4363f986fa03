//! Domain layer - Core provisioning types and port definitions
//!
//! This module defines the core traits (ports) that adapters implement,
//! following hexagonal architecture principles.

pub mod capacity;
pub mod ports;
pub mod tags;

pub use capacity::parse_capacity;
pub use ports::*;
pub use tags::{Tags, ADDITIONAL_TAGS_ANNOTATION};
