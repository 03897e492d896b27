//! Radio driver interface
//!
//! Drivers implement [`Radio`]; completion is reported asynchronously by
//! posting [`crate::event::RadioEvent`]s to the MAC event queue.

pub mod traits;

pub use traits::{ModulationParams, Radio, RxConfig, TxConfig};
