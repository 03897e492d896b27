//! LoRaWAN Class B Ping Slot Management
//!
//! This module handles ping slot timing and randomization including:
//! - Pseudo-random ping offset derived from the beacon time
//! - Next slot time within the current beacon period
//! - Unicast and multicast slot bookkeeping

use crate::config::device::{DevAddr, WindowExpansionConfig};
use crate::crypto::{self, CryptoError};
use crate::lorawan::phy::RxConfigParams;
use crate::timer::TimerTime;

use super::beacon::WindowExpansion;
use super::timing::{ping_nb, ping_period, BEACON_RESERVED_MS, PING_SLOT_WINDOW_MS};

/// Multicast groups that may own a ping slot
pub const MAX_MULTICAST_PING_SLOTS: usize = 4;

/// Unicast slot plus multicast slots
pub const PING_SLOTS: usize = 1 + MAX_MULTICAST_PING_SLOTS;

/// Pseudo-random offset of the first ping slot in a beacon period
///
/// `beacon_time` is the Time field of the period's beacon in seconds.
pub fn compute_ping_offset(beacon_time: u32, address: DevAddr, periodicity: u8) -> Result<u16, CryptoError> {
    let rand = crypto::compute_ping_rand(beacon_time, address)?;
    let period = ping_period(periodicity);
    Ok((u16::from(rand[0]) + u16::from(rand[1]) * 256) % period)
}

/// Device time of the next ping slot at or after `now`
///
/// `beacon_start` is the device time the current beacon period started at.
/// Returns `None` once every slot of the period has passed.
pub fn compute_ping_slot_time(
    beacon_start: TimerTime,
    now: TimerTime,
    offset: u16,
    periodicity: u8,
) -> Option<TimerTime> {
    let first = beacon_start + BEACON_RESERVED_MS + TimerTime::from(offset) * PING_SLOT_WINDOW_MS;
    if first >= now {
        return Some(first);
    }
    let period_ms = TimerTime::from(ping_period(periodicity)) * PING_SLOT_WINDOW_MS;
    let slots = (now - first).div_ceil(period_ms);
    if slots >= TimerTime::from(ping_nb(periodicity)) {
        return None;
    }
    Some(first + slots * period_ms)
}

/// One ping slot owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingSlot {
    /// Unicast device address or multicast group address
    pub address: DevAddr,
    /// Offset in the current beacon period
    pub offset: u16,
    /// Device time of the next slot
    pub next_slot_time: Option<TimerTime>,
    /// Receive configuration of the next slot
    pub rx_config: Option<RxConfigParams>,
}

impl PingSlot {
    /// Slot for `address` with nothing scheduled
    pub fn new(address: DevAddr) -> Self {
        Self {
            address,
            offset: 0,
            next_slot_time: None,
            rx_config: None,
        }
    }
}

/// Ping slot state
#[derive(Debug, Clone)]
pub struct PingSlotContext {
    /// `slots[0]` is the unicast slot, the rest belong to multicast groups
    pub slots: [Option<PingSlot>; PING_SLOTS],
    /// Window expansion
    pub expansion: WindowExpansion,
    /// Slot scheduled in this period
    pub slot_idx: Option<usize>,
    /// Periodicity (0-7)
    pub periodicity: u8,
    /// Datarate override from PingSlotChannelReq, `None` for the regional default
    pub datarate: Option<u8>,
    /// Frequency override from PingSlotChannelReq, zero for the regional default
    pub frequency: u32,
}

impl PingSlotContext {
    /// Context with no slot
    pub fn new(periodicity: u8, expansion: WindowExpansionConfig) -> Self {
        Self {
            slots: [None; PING_SLOTS],
            expansion: WindowExpansion::new(expansion),
            slot_idx: None,
            periodicity: periodicity.min(super::timing::MAX_PING_SLOT_PERIODICITY),
            datarate: None,
            frequency: 0,
        }
    }

    /// Slot index owning `address`
    pub fn position(&self, address: DevAddr) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(s) if s.address == address))
    }

    /// Earliest scheduled slot
    pub fn earliest(&self) -> Option<(usize, TimerTime)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.and_then(|s| s.next_slot_time).map(|time| (idx, time)))
            .min_by_key(|&(_, time)| time)
    }

    /// Forget every scheduled slot time
    pub fn clear_schedule(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.next_slot_time = None;
            slot.rx_config = None;
        }
        self.slot_idx = None;
    }
}
