//! LoRaWAN Class B Beacon Tracking
//!
//! This module handles the beacon side of Class B:
//! - Beacon frame parsing and CRC validation
//! - Receive window expansion after missed beacons
//! - Expected beacon time and miss accounting
//!
//! Beacon frame layout, little-endian:
//! `RFU1 | Time(4) | CRC1(2) | GwSpecific(7) | RFU2 | CRC2(2)`

use crc::{Crc, CRC_16_XMODEM};

use crate::config::device::WindowExpansionConfig;
use crate::lorawan::frame::{read_u16_le, read_u32_le};
use crate::timer::TimerTime;

/// CRC-16/CCITT, polynomial 0x1021, zero init, no reflection
const BEACON_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Gateway specific field length
pub const GW_SPECIFIC_SIZE: usize = 7;

/// Regional sizes of the RFU fields
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconFrameLayout {
    /// Bytes before the Time field
    pub rfu1_size: usize,
    /// Bytes between GwSpecific and CRC2
    pub rfu2_size: usize,
}

impl BeaconFrameLayout {
    /// Total frame length
    pub fn frame_len(&self) -> usize {
        self.rfu1_size + 4 + 2 + GW_SPECIFIC_SIZE + self.rfu2_size + 2
    }

    fn crc1_offset(&self) -> usize {
        self.rfu1_size + 4
    }

    fn gw_offset(&self) -> usize {
        self.crc1_offset() + 2
    }

    fn crc2_offset(&self) -> usize {
        self.gw_offset() + GW_SPECIFIC_SIZE + self.rfu2_size
    }
}

/// Beacon frame rejection reason
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconError {
    /// Frame length differs from the regional layout
    Length,
    /// CRC over RFU1 and Time does not match
    Crc,
}

/// Decoded beacon frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconFrame {
    /// GPS time of the beacon start in seconds
    pub time: u32,
    /// Gateway specific field, zeroed when CRC2 failed
    pub gw_specific: [u8; GW_SPECIFIC_SIZE],
    /// CRC2 matched
    pub gw_specific_valid: bool,
}

/// Beacon CRC
pub fn beacon_crc(data: &[u8]) -> u16 {
    BEACON_CRC.checksum(data)
}

/// Validate and decode a beacon frame
///
/// The two CRCs are independent: a bad CRC2 still yields the time.
pub fn parse_beacon_frame(payload: &[u8], layout: &BeaconFrameLayout) -> Result<BeaconFrame, BeaconError> {
    if payload.len() != layout.frame_len() {
        return Err(BeaconError::Length);
    }

    let crc1_offset = layout.crc1_offset();
    if beacon_crc(&payload[..crc1_offset]) != read_u16_le(payload, crc1_offset) {
        return Err(BeaconError::Crc);
    }
    let time = read_u32_le(payload, layout.rfu1_size);

    let gw_offset = layout.gw_offset();
    let crc2_offset = layout.crc2_offset();
    let gw_specific_valid =
        beacon_crc(&payload[gw_offset..crc2_offset]) == read_u16_le(payload, crc2_offset);
    let mut gw_specific = [0u8; GW_SPECIFIC_SIZE];
    if gw_specific_valid {
        gw_specific.copy_from_slice(&payload[gw_offset..gw_offset + GW_SPECIFIC_SIZE]);
    }

    Ok(BeaconFrame {
        time,
        gw_specific,
        gw_specific_valid,
    })
}

/// Beacon as reported to the application
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BeaconInfo {
    /// GPS time of the beacon in seconds
    pub time: u32,
    /// Gateway specific field
    pub gw_specific: [u8; GW_SPECIFIC_SIZE],
    /// RSSI of the beacon
    pub rssi: i16,
    /// SNR of the beacon
    pub snr: i8,
    /// Frequency the beacon was received on
    pub frequency: u32,
    /// Datarate the beacon was received with
    pub datarate: u8,
}

/// Receive window expansion state
///
/// Each miss multiplies both the symbol timeout and the window movement by
/// the configured factor, up to their maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowExpansion {
    config: WindowExpansionConfig,
    /// Current symbol timeout
    pub symbol_timeout: u16,
    /// Current window opening advance (ms)
    pub movement_ms: u32,
}

impl WindowExpansion {
    /// Expansion at its defaults
    pub fn new(config: WindowExpansionConfig) -> Self {
        Self {
            config,
            symbol_timeout: config.default_timeout,
            movement_ms: config.default_movement_ms,
        }
    }

    /// Back to the defaults after a successful reception
    pub fn reset(&mut self) {
        self.symbol_timeout = self.config.default_timeout;
        self.movement_ms = self.config.default_movement_ms;
    }

    /// Grow after a miss
    pub fn expand(&mut self) {
        let factor = self.config.factor.max(1);
        self.symbol_timeout = self
            .symbol_timeout
            .saturating_mul(u16::from(factor))
            .min(self.config.max_timeout);
        self.movement_ms = self
            .movement_ms
            .saturating_mul(u32::from(factor))
            .min(self.config.max_movement_ms);
    }

    /// Larger of a computed timeout and the expanded one
    pub fn timeout_for(&self, computed: u16) -> u16 {
        computed.max(self.symbol_timeout)
    }
}

/// Beacon tracking state
#[derive(Debug, Clone)]
pub struct BeaconContext {
    /// Regional frame geometry
    pub layout: BeaconFrameLayout,
    /// Last received beacon
    pub last_beacon: Option<BeaconInfo>,
    /// GPS time (ms) of the next expected beacon, zero while unknown
    pub next_beacon_gps: TimerTime,
    /// Window expansion
    pub expansion: WindowExpansion,
    /// Consecutive misses since the last beacon
    pub missed: u8,
    /// Beacon frequency override, zero for the regional default
    pub frequency: u32,
    /// Device time of the next beacon announced by BeaconTimingAns
    pub announced_beacon: Option<TimerTime>,
}

impl BeaconContext {
    /// Empty context
    pub fn new(layout: BeaconFrameLayout, expansion: WindowExpansionConfig) -> Self {
        Self {
            layout,
            last_beacon: None,
            next_beacon_gps: 0,
            expansion: WindowExpansion::new(expansion),
            missed: 0,
            frequency: 0,
            announced_beacon: None,
        }
    }

    /// Record a received beacon received `elapsed_ms` ago
    ///
    /// Returns the GPS time of the current instant.
    pub fn on_beacon(&mut self, info: BeaconInfo, elapsed_ms: TimerTime) -> TimerTime {
        let gps_now = super::timing::gps_time_from_beacon(info.time, elapsed_ms);
        self.last_beacon = Some(info);
        self.next_beacon_gps = TimerTime::from(info.time) * 1_000 + super::timing::BEACON_INTERVAL_MS;
        self.expansion.reset();
        self.missed = 0;
        gps_now
    }

    /// Account for a missed beacon
    pub fn on_miss(&mut self) {
        self.missed = self.missed.saturating_add(1);
        if self.next_beacon_gps != 0 {
            self.next_beacon_gps += super::timing::BEACON_INTERVAL_MS;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EU868: BeaconFrameLayout = BeaconFrameLayout {
        rfu1_size: 2,
        rfu2_size: 0,
    };

    fn beacon(time: u32, gw: [u8; 7]) -> [u8; 17] {
        let mut frame = [0u8; 17];
        frame[2..6].copy_from_slice(&time.to_le_bytes());
        let crc1 = beacon_crc(&frame[..6]);
        frame[6..8].copy_from_slice(&crc1.to_le_bytes());
        frame[8..15].copy_from_slice(&gw);
        let crc2 = beacon_crc(&frame[8..15]);
        frame[15..17].copy_from_slice(&crc2.to_le_bytes());
        frame
    }

    #[test]
    fn crc_is_ccitt_xmodem() {
        assert_eq!(beacon_crc(b"123456789"), 0x31C3);
    }

    #[test]
    fn valid_beacon_is_decoded() {
        let gw = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let frame = beacon(1_234_567_936, gw);
        let parsed = parse_beacon_frame(&frame, &EU868).unwrap();
        assert_eq!(parsed.time, 1_234_567_936);
        assert_eq!(parsed.gw_specific, gw);
        assert!(parsed.gw_specific_valid);
    }

    #[test]
    fn bad_gw_crc_keeps_time_and_zeroes_gw_specific() {
        let mut frame = beacon(1_000_064, [0xAA; 7]);
        frame[16] ^= 0xFF;
        let parsed = parse_beacon_frame(&frame, &EU868).unwrap();
        assert_eq!(parsed.time, 1_000_064);
        assert_eq!(parsed.gw_specific, [0; 7]);
        assert!(!parsed.gw_specific_valid);
    }

    #[test]
    fn bad_time_crc_or_length_rejects_the_frame() {
        let mut frame = beacon(1_000_064, [0xAA; 7]);
        frame[3] ^= 0x01;
        assert_eq!(parse_beacon_frame(&frame, &EU868), Err(BeaconError::Crc));
        assert_eq!(parse_beacon_frame(&frame[..16], &EU868), Err(BeaconError::Length));
    }

    #[test]
    fn window_expansion_is_monotonic_and_capped() {
        let config = WindowExpansionConfig {
            default_timeout: 8,
            max_timeout: 256,
            default_movement_ms: 2,
            max_movement_ms: 100,
            factor: 2,
        };
        let mut expansion = WindowExpansion::new(config);
        let mut previous = (expansion.symbol_timeout, expansion.movement_ms);
        for _ in 0..20 {
            expansion.expand();
            assert!(expansion.symbol_timeout >= previous.0);
            assert!(expansion.movement_ms >= previous.1);
            assert!(expansion.symbol_timeout <= 256);
            assert!(expansion.movement_ms <= 100);
            previous = (expansion.symbol_timeout, expansion.movement_ms);
        }
        assert_eq!(previous, (256, 100));
        assert_eq!(expansion.timeout_for(300), 300);

        expansion.reset();
        assert_eq!((expansion.symbol_timeout, expansion.movement_ms), (8, 2));
    }

    #[test]
    fn missed_beacon_advances_the_expected_time() {
        let expansion = crate::config::device::ClassBConfig::default().beacon_expansion;
        let mut context = BeaconContext::new(EU868, expansion);
        let info = BeaconInfo {
            time: 1_280,
            ..BeaconInfo::default()
        };
        assert_eq!(context.on_beacon(info, 40), 1_280_040);
        assert_eq!(context.next_beacon_gps, 1_408_000);
        context.on_miss();
        assert_eq!(context.next_beacon_gps, 1_536_000);
        assert_eq!(context.missed, 1);
    }
}
