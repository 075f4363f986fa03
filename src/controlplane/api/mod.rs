//! API Module
//!
//! REST access to claim provisioning state.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
