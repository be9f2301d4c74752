//! Container device support for the LinkMotion SDK.
//!
//! The core is the device detection state machine in [`device::detect`]
//! and the target tool client in [`tool`]; everything else wires those
//! into a runnable agent.

pub mod cli;
pub mod config;
pub mod device;
pub mod issues;
pub mod registry;
pub mod setup;
pub mod tool;
pub mod types;
