//! Device access.
//!
//! [`DeviceBridge`] is the only way the rest of the crate touches a device;
//! [`AdbBridge`] implements it with the `adb` command line.

mod adb;
mod bridge;
mod model;
pub mod parse;

pub use adb::AdbBridge;
pub use bridge::{DeviceBridge, UninstallOutcome};
pub use model::{ConnectionState, Device, Package};
