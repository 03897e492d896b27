//! MAC command encoding
//!
//! Downlink commands are decoded into [`MacCommand`]; uplink answers and
//! requests are queued in a [`MacCommandBuffer`] until the next uplink
//! carries them in FOpts or on port 0.

use heapless::Vec;

use crate::lorawan::frame::{read_u16_le, read_u24_le, read_u32_le};
use crate::lorawan::mac::MacError;

/// Capacity of the pending and repeat command buffers
pub const MAC_COMMAND_MAX_LENGTH: usize = 128;

/// MAC command identifiers
///
/// Requests and answers share the identifier; the direction tells them apart.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandIdentifier {
    /// Link quality check
    LinkCheck = 0x02,
    /// Datarate, power and channel mask
    LinkADR = 0x03,
    /// Aggregated duty cycle
    DutyCycle = 0x04,
    /// RX1 offset and RX2 channel
    RXParamSetup = 0x05,
    /// Battery and margin report
    DevStatus = 0x06,
    /// Channel definition
    NewChannel = 0x07,
    /// RX1 delay
    RXTimingSetup = 0x08,
    /// Dwell time and EIRP
    TxParamSetup = 0x09,
    /// RX1 downlink frequency
    DlChannel = 0x0A,
    /// Network time
    DeviceTime = 0x0D,
    /// Ping slot periodicity
    PingSlotInfo = 0x10,
    /// Ping slot channel
    PingSlotChannel = 0x11,
    /// Next beacon timing
    BeaconTiming = 0x12,
    /// Beacon frequency
    BeaconFreq = 0x13,
}

impl CommandIdentifier {
    /// Decode a CID byte
    pub fn from_u8(cid: u8) -> Option<Self> {
        Some(match cid {
            0x02 => Self::LinkCheck,
            0x03 => Self::LinkADR,
            0x04 => Self::DutyCycle,
            0x05 => Self::RXParamSetup,
            0x06 => Self::DevStatus,
            0x07 => Self::NewChannel,
            0x08 => Self::RXTimingSetup,
            0x09 => Self::TxParamSetup,
            0x0A => Self::DlChannel,
            0x0D => Self::DeviceTime,
            0x10 => Self::PingSlotInfo,
            0x11 => Self::PingSlotChannel,
            0x12 => Self::BeaconTiming,
            0x13 => Self::BeaconFreq,
            _ => return None,
        })
    }

    /// Payload length of the device-to-network command
    pub fn uplink_len(self) -> usize {
        match self {
            Self::DevStatus => 2,
            Self::LinkADR
            | Self::RXParamSetup
            | Self::NewChannel
            | Self::DlChannel
            | Self::PingSlotInfo
            | Self::PingSlotChannel
            | Self::BeaconFreq => 1,
            Self::LinkCheck
            | Self::DutyCycle
            | Self::RXTimingSetup
            | Self::TxParamSetup
            | Self::DeviceTime
            | Self::BeaconTiming => 0,
        }
    }

    /// Payload length of the network-to-device command
    pub fn downlink_len(self) -> usize {
        match self {
            Self::LinkCheck => 2,
            Self::LinkADR => 4,
            Self::DutyCycle => 1,
            Self::RXParamSetup => 4,
            Self::DevStatus => 0,
            Self::NewChannel => 5,
            Self::RXTimingSetup => 1,
            Self::TxParamSetup => 1,
            Self::DlChannel => 4,
            Self::DeviceTime => 5,
            Self::PingSlotInfo => 0,
            Self::PingSlotChannel => 4,
            Self::BeaconTiming => 3,
            Self::BeaconFreq => 3,
        }
    }

    /// Answers repeated in every uplink until a downlink is received
    pub fn is_sticky(self) -> bool {
        matches!(
            self,
            Self::RXParamSetup
                | Self::RXTimingSetup
                | Self::DlChannel
                | Self::PingSlotChannel
                | Self::BeaconFreq
        )
    }
}

/// Network-to-device MAC command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacCommand {
    /// Link check answer
    LinkCheckAns {
        /// Link margin in dB
        margin: u8,
        /// Number of gateways that received the request
        gateway_count: u8,
    },
    /// Link ADR request
    LinkADRReq {
        /// Data rate
        data_rate: u8,
        /// TX power
        tx_power: u8,
        /// Channel mask
        ch_mask: u16,
        /// Channel mask control
        ch_mask_cntl: u8,
        /// Number of transmissions
        nb_trans: u8,
    },
    /// Duty cycle request
    DutyCycleReq {
        /// Maximum duty cycle exponent, 255 switches the device off
        max_duty_cycle: u8,
    },
    /// RX parameter setup request
    RXParamSetupReq {
        /// RX1 data rate offset
        rx1_dr_offset: u8,
        /// RX2 data rate
        rx2_data_rate: u8,
        /// RX2 frequency in Hz
        freq: u32,
    },
    /// Device status request
    DevStatusReq,
    /// New channel request
    NewChannelReq {
        /// Channel index
        ch_index: u8,
        /// Frequency in Hz
        freq: u32,
        /// Maximum data rate
        max_dr: u8,
        /// Minimum data rate
        min_dr: u8,
    },
    /// RX timing setup request
    RXTimingSetupReq {
        /// RX1 delay in seconds (0 means 1)
        delay: u8,
    },
    /// TX parameter setup request
    TxParamSetupReq {
        /// Raw EIRP/dwell time byte
        eirp_dwell_time: u8,
    },
    /// Downlink channel request
    DlChannelReq {
        /// Channel index
        ch_index: u8,
        /// RX1 frequency in Hz
        freq: u32,
    },
    /// Device time answer
    DeviceTimeAns {
        /// Seconds since the GPS epoch
        seconds: u32,
        /// Fractional second in 1/256 s
        fraction: u8,
    },
    /// Ping slot periodicity acknowledged
    PingSlotInfoAns,
    /// Ping slot channel request
    PingSlotChannelReq {
        /// Frequency in Hz, zero restores the default
        freq: u32,
        /// Data rate
        data_rate: u8,
    },
    /// Beacon timing answer (LoRaWAN 1.0.2 Class B)
    BeaconTimingAns {
        /// Delay to the next beacon in 30 ms units
        delay: u16,
        /// Beacon channel index
        channel: u8,
    },
    /// Beacon frequency request
    BeaconFreqReq {
        /// Frequency in Hz, zero restores the default
        freq: u32,
    },
}

impl MacCommand {
    /// Decode the command at the start of `buffer`
    ///
    /// Returns the command and its length including the CID, or `None` for
    /// an unknown CID or a truncated payload.
    pub fn parse(buffer: &[u8]) -> Option<(Self, usize)> {
        let cid = CommandIdentifier::from_u8(*buffer.first()?)?;
        let len = 1 + cid.downlink_len();
        if buffer.len() < len {
            return None;
        }
        let p = &buffer[1..len];
        let command = match cid {
            CommandIdentifier::LinkCheck => MacCommand::LinkCheckAns {
                margin: p[0],
                gateway_count: p[1],
            },
            CommandIdentifier::LinkADR => MacCommand::LinkADRReq {
                data_rate: p[0] >> 4,
                tx_power: p[0] & 0x0F,
                ch_mask: read_u16_le(p, 1),
                ch_mask_cntl: (p[3] >> 4) & 0x07,
                nb_trans: p[3] & 0x0F,
            },
            CommandIdentifier::DutyCycle => MacCommand::DutyCycleReq {
                max_duty_cycle: p[0],
            },
            CommandIdentifier::RXParamSetup => MacCommand::RXParamSetupReq {
                rx1_dr_offset: (p[0] >> 4) & 0x07,
                rx2_data_rate: p[0] & 0x0F,
                freq: read_u24_le(p, 1) * 100,
            },
            CommandIdentifier::DevStatus => MacCommand::DevStatusReq,
            CommandIdentifier::NewChannel => MacCommand::NewChannelReq {
                ch_index: p[0],
                freq: read_u24_le(p, 1) * 100,
                max_dr: p[4] >> 4,
                min_dr: p[4] & 0x0F,
            },
            CommandIdentifier::RXTimingSetup => MacCommand::RXTimingSetupReq { delay: p[0] & 0x0F },
            CommandIdentifier::TxParamSetup => MacCommand::TxParamSetupReq {
                eirp_dwell_time: p[0],
            },
            CommandIdentifier::DlChannel => MacCommand::DlChannelReq {
                ch_index: p[0],
                freq: read_u24_le(p, 1) * 100,
            },
            CommandIdentifier::DeviceTime => MacCommand::DeviceTimeAns {
                seconds: read_u32_le(p, 0),
                fraction: p[4],
            },
            CommandIdentifier::PingSlotInfo => MacCommand::PingSlotInfoAns,
            CommandIdentifier::PingSlotChannel => MacCommand::PingSlotChannelReq {
                freq: read_u24_le(p, 0) * 100,
                data_rate: p[3] & 0x0F,
            },
            CommandIdentifier::BeaconTiming => MacCommand::BeaconTimingAns {
                delay: read_u16_le(p, 0),
                channel: p[2],
            },
            CommandIdentifier::BeaconFreq => MacCommand::BeaconFreqReq {
                freq: read_u24_le(p, 0) * 100,
            },
        };
        Some((command, len))
    }
}

/// Pending and repeated uplink MAC commands
#[derive(Debug, Clone, Default)]
pub struct MacCommandBuffer {
    pending: Vec<u8, MAC_COMMAND_MAX_LENGTH>,
    repeat: Vec<u8, MAC_COMMAND_MAX_LENGTH>,
    in_next_tx: bool,
}

impl MacCommandBuffer {
    /// Empty buffers
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a device-to-network command
    pub fn add(&mut self, cid: CommandIdentifier, params: &[u8]) -> Result<(), MacError> {
        if params.len() != cid.uplink_len() {
            return Err(MacError::ParameterInvalid);
        }
        if self.pending.len() + 1 + params.len() > MAC_COMMAND_MAX_LENGTH {
            return Err(MacError::BufferFull);
        }
        self.pending.push(cid as u8).map_err(|_| MacError::BufferFull)?;
        self.pending
            .extend_from_slice(params)
            .map_err(|_| MacError::BufferFull)?;
        self.in_next_tx = true;
        Ok(())
    }

    /// Commands waiting for the next uplink
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Length of the pending commands
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// No command pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop the pending commands
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Append the repeat buffer to the pending commands
    pub fn merge_repeat(&mut self) -> Result<(), MacError> {
        self.pending
            .extend_from_slice(&self.repeat)
            .map_err(|_| MacError::BufferFull)
    }

    /// Keep the sticky answers of the pending commands for the next uplinks
    pub fn parse_repeat(&mut self) {
        self.repeat.clear();
        let mut index = 0;
        while index < self.pending.len() {
            let Some(cid) = CommandIdentifier::from_u8(self.pending[index]) else {
                break;
            };
            let end = (index + 1 + cid.uplink_len()).min(self.pending.len());
            if cid.is_sticky() {
                // Cannot overflow: repeat is a subset of pending
                let _ = self.repeat.extend_from_slice(&self.pending[index..end]);
            }
            index = end;
        }
        self.in_next_tx = !self.repeat.is_empty();
    }

    /// Drop the repeated answers once a downlink arrived
    pub fn clear_repeat(&mut self) {
        self.repeat.clear();
    }

    /// Length of the repeated answers
    pub fn repeat_len(&self) -> usize {
        self.repeat.len()
    }

    /// Sticky answers still waiting for a downlink
    pub fn is_sticky_pending(&self) -> bool {
        !self.repeat.is_empty()
    }

    /// Commands must go out even without application payload
    pub fn in_next_tx(&self) -> bool {
        self.in_next_tx
    }

    /// Override the next-uplink flag
    pub fn set_in_next_tx(&mut self, value: bool) {
        self.in_next_tx = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grouped_downlink_commands() {
        // DevStatusReq, RXTimingSetupReq(5), BeaconFreqReq(869.525 MHz)
        let buffer = [0x06, 0x08, 0x05, 0x13, 0xD2, 0xAD, 0x84];
        let (first, len) = MacCommand::parse(&buffer).unwrap();
        assert_eq!(first, MacCommand::DevStatusReq);
        assert_eq!(len, 1);
        let (second, len) = MacCommand::parse(&buffer[1..]).unwrap();
        assert_eq!(second, MacCommand::RXTimingSetupReq { delay: 5 });
        assert_eq!(len, 2);
        let (third, _) = MacCommand::parse(&buffer[3..]).unwrap();
        assert_eq!(third, MacCommand::BeaconFreqReq { freq: 869_525_000 });
    }

    #[test]
    fn unknown_or_truncated_commands_stop_parsing() {
        assert_eq!(MacCommand::parse(&[0x7F, 0x00]), None);
        assert_eq!(MacCommand::parse(&[0x03, 0x50, 0x07]), None);
        assert_eq!(MacCommand::parse(&[]), None);
    }

    #[test]
    fn add_checks_length_and_capacity() {
        let mut buffer = MacCommandBuffer::new();
        assert_eq!(
            buffer.add(CommandIdentifier::DevStatus, &[0xFF]),
            Err(MacError::ParameterInvalid)
        );
        for _ in 0..(MAC_COMMAND_MAX_LENGTH / 3) {
            buffer.add(CommandIdentifier::DevStatus, &[0xFF, 0x0A]).unwrap();
        }
        assert_eq!(
            buffer.add(CommandIdentifier::DevStatus, &[0xFF, 0x0A]),
            Err(MacError::BufferFull)
        );
        assert!(buffer.in_next_tx());
    }

    #[test]
    fn only_sticky_answers_are_repeated() {
        let mut buffer = MacCommandBuffer::new();
        buffer.add(CommandIdentifier::LinkADR, &[0x07]).unwrap();
        buffer.add(CommandIdentifier::RXParamSetup, &[0x07]).unwrap();
        buffer.add(CommandIdentifier::DevStatus, &[0xFF, 0x0A]).unwrap();
        buffer.add(CommandIdentifier::RXTimingSetup, &[]).unwrap();
        buffer.parse_repeat();
        assert!(buffer.is_sticky_pending());
        assert!(buffer.in_next_tx());

        buffer.clear();
        buffer.merge_repeat().unwrap();
        assert_eq!(buffer.pending(), &[0x05, 0x07, 0x08]);

        buffer.clear_repeat();
        buffer.parse_repeat();
        assert!(buffer.is_sticky_pending());
        buffer.clear();
        buffer.parse_repeat();
        assert!(!buffer.is_sticky_pending());
        assert!(!buffer.in_next_tx());
    }
}
