//! LoRaWAN 1.0.x end-device MAC in Rust
//!
//! This crate provides a `no_std` LoRaWAN MAC engine for Class A, B and C
//! end devices, with OTAA and ABP activation.
//!
//! # Features
//! - Event-driven MAC engine ([`lorawan::mac::LoRaMac`]) with a single owner
//!   of all protocol state
//! - Confirmed and unconfirmed uplinks, retransmissions and NbRep repetition
//! - Downlink MAC command processing, including the Class B commands
//! - Class B beacon acquisition, tracking and ping slots
//! - Continuous Class C reception on the RX2 channel
//! - EU868 regional parameters behind the [`lorawan::phy::LoRaPhy`] trait
//! - Hardware abstraction layer for radio drivers
//! - No unsafe code
//!
//! # Usage
//! The application owns an [`event::EventQueue`]. Radio interrupt handlers
//! post [`event::RadioEvent`]s through the producer half; the main loop hands
//! the consumer half to [`lorawan::mac::LoRaMac::process`], which also fires
//! the software timers that are due. Results come back through the
//! [`lorawan::primitives::MacPrimitives`] callbacks.

#![warn(missing_docs)]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

/// Class B beacon tracking and ping slots
pub mod class;

/// Device and network configuration
pub mod config;

/// Cryptographic functions
pub mod crypto;

/// Events posted to the MAC engine
pub mod event;

/// LoRaWAN protocol implementation
pub mod lorawan;

/// Radio hardware abstraction layer
pub mod radio;

/// Software timers
pub mod timer;
