//! Device and network configuration
//!
//! This module contains types for configuring the LoRaWAN MAC engine:
//! - Device identity and activation material (DevEUI, AppEUI, keys)
//! - MAC system parameters (timing, retries, ADR limits)
//! - Class B parameters (ping slot periodicity, beacon window expansion)

/// Device, MAC and Class B configuration
pub mod device;

pub use device::{ClassBConfig, DeviceConfig, MacConfig};
