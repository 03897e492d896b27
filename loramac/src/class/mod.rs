//! LoRaWAN device class support
//!
//! Class A receive windows and the continuous Class C window are opened by
//! the MAC engine itself. Class B beacon tracking and ping slots live here.

/// Class B device implementation
pub mod class_b;
pub use class_b::ClassB;
