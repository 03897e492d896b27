//! LoRaWAN protocol implementation
//!
//! This module contains the core LoRaWAN protocol implementation, including:
//! - MAC engine and its service primitives
//! - Frame layout and MAC command encoding
//! - Regional parameters behind the [`phy::LoRaPhy`] trait

/// MAC command handling
pub mod commands;

/// Frame header encoding
pub mod frame;

/// MAC layer implementation
pub mod mac;

/// Multicast groups
pub mod multicast;

/// Regional layer interface
pub mod phy;

/// Service primitives exchanged with the application
pub mod primitives;

/// Regional parameters and configurations
pub mod region;

pub use mac::{LoRaMac, MacError};
pub use phy::LoRaPhy;
