//! LoRaWAN Class B timing
//!
//! Beacon period geometry and GPS time arithmetic:
//! - 128 s beacon interval, starting at GPS time multiples of 128 s
//! - 2.12 s reserved after each beacon, 3 s guard before the next
//! - 4096 ping slots of 30 ms in between

use crate::timer::TimerTime;

/// Beacon period in milliseconds
pub const BEACON_INTERVAL_MS: TimerTime = 128_000;
/// Reserved time after the beacon start
pub const BEACON_RESERVED_MS: TimerTime = 2_120;
/// Length of one ping slot
pub const PING_SLOT_WINDOW_MS: TimerTime = 30;
/// Ping slots in a beacon window
pub const PING_SLOT_COUNT: u16 = 4_096;
/// Largest ping slot periodicity
pub const MAX_PING_SLOT_PERIODICITY: u8 = 7;

/// Ping slots per beacon period, `2^(7 - periodicity)`
pub fn ping_nb(periodicity: u8) -> u16 {
    1 << (MAX_PING_SLOT_PERIODICITY - periodicity.min(MAX_PING_SLOT_PERIODICITY))
}

/// Slots between two pings, `4096 / ping_nb`
pub fn ping_period(periodicity: u8) -> u16 {
    PING_SLOT_COUNT / ping_nb(periodicity)
}

/// Start of the beacon period containing `gps_ms`
pub fn beacon_period_start(gps_ms: TimerTime) -> TimerTime {
    gps_ms - gps_ms % BEACON_INTERVAL_MS
}

/// First beacon strictly after `gps_ms`
pub fn next_beacon_time(gps_ms: TimerTime) -> TimerTime {
    beacon_period_start(gps_ms) + BEACON_INTERVAL_MS
}

/// GPS time at the current instant, given a beacon timestamp
///
/// `beacon_time` is the beacon Time field in seconds, `elapsed_ms` the device
/// time elapsed since the beacon was received.
pub fn gps_time_from_beacon(beacon_time: u32, elapsed_ms: TimerTime) -> TimerTime {
    TimerTime::from(beacon_time) * 1_000 + elapsed_ms
}

/// Advance `expected` by whole beacon intervals until it is after `now`
pub fn advance_beacon_time(expected: TimerTime, now: TimerTime) -> TimerTime {
    if expected > now {
        return expected;
    }
    let periods = (now - expected) / BEACON_INTERVAL_MS + 1;
    expected + periods * BEACON_INTERVAL_MS
}
