//! LoRaWAN PHY payload layout
//!
//! `MHDR(1) | DevAddr(4) | FCtrl(1) | FCnt(2) | FOpts(0-15) | FPort(1) | FRMPayload | MIC(4)`
//!
//! All multi-byte fields are little-endian.

use heapless::Vec;

use crate::crypto::MIC_SIZE;

/// Largest PHY payload
pub const PHY_MAX_PAYLOAD: usize = 255;
/// Largest FOpts field
pub const MAX_FOPTS_LENGTH: usize = 15;
/// MHDR + FHDR without FOpts
pub const FRAME_HEADER_SIZE: usize = 8;
/// MHDR + FHDR + FPort + MIC, the overhead of a data frame without FOpts
pub const FRAME_PAYLOAD_OVERHEAD_SIZE: usize = FRAME_HEADER_SIZE + 1 + MIC_SIZE;
/// Join accept without CFList, MHDR and MIC included
pub const JOIN_ACCEPT_SIZE: usize = 17;
/// CFList length
pub const CF_LIST_SIZE: usize = 16;

/// MAC header types
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MType {
    /// Join request
    JoinRequest = 0x00,
    /// Join accept
    JoinAccept = 0x20,
    /// Unconfirmed data uplink
    UnconfirmedDataUp = 0x40,
    /// Unconfirmed data downlink
    UnconfirmedDataDown = 0x60,
    /// Confirmed data uplink
    ConfirmedDataUp = 0x80,
    /// Confirmed data downlink
    ConfirmedDataDown = 0xA0,
    /// Reserved for future use
    Rfu = 0xC0,
    /// Proprietary frame
    Proprietary = 0xE0,
}

impl MType {
    /// Decode the three most significant bits of an MHDR
    pub fn from_mhdr(mhdr: u8) -> Self {
        match mhdr & 0xE0 {
            0x00 => MType::JoinRequest,
            0x20 => MType::JoinAccept,
            0x40 => MType::UnconfirmedDataUp,
            0x60 => MType::UnconfirmedDataDown,
            0x80 => MType::ConfirmedDataUp,
            0xA0 => MType::ConfirmedDataDown,
            0xC0 => MType::Rfu,
            _ => MType::Proprietary,
        }
    }
}

/// MAC header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacHeader {
    /// Message type
    pub mtype: MType,
    /// Major version (0 = LoRaWAN R1)
    pub major: u8,
}

impl MacHeader {
    /// LoRaWAN R1 header of the given type
    pub fn new(mtype: MType) -> Self {
        Self { mtype, major: 0 }
    }

    /// Serialized MHDR
    pub fn to_byte(&self) -> u8 {
        self.mtype as u8 | (self.major & 0x03)
    }

    /// Parse an MHDR byte
    pub fn from_byte(byte: u8) -> Self {
        Self {
            mtype: MType::from_mhdr(byte),
            major: byte & 0x03,
        }
    }
}

/// Frame control flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FCtrl {
    /// Adaptive data rate
    pub adr: bool,
    /// ADR acknowledgement request (uplink) / RFU (downlink)
    pub adr_ack_req: bool,
    /// Acknowledges the last confirmed frame
    pub ack: bool,
    /// Frame pending (downlink) / Class B enabled (uplink)
    pub f_pending: bool,
    /// FOpts length
    pub f_opts_len: u8,
}

impl FCtrl {
    /// Serialized FCtrl
    pub fn to_byte(&self) -> u8 {
        let mut byte = self.f_opts_len & 0x0F;
        if self.adr {
            byte |= 0x80;
        }
        if self.adr_ack_req {
            byte |= 0x40;
        }
        if self.ack {
            byte |= 0x20;
        }
        if self.f_pending {
            byte |= 0x10;
        }
        byte
    }

    /// Parse an FCtrl byte
    pub fn from_byte(byte: u8) -> Self {
        Self {
            adr: (byte & 0x80) != 0,
            adr_ack_req: (byte & 0x40) != 0,
            ack: (byte & 0x20) != 0,
            f_pending: (byte & 0x10) != 0,
            f_opts_len: byte & 0x0F,
        }
    }
}

/// Most recently built uplink PHY payload
pub type FrameBuffer = Vec<u8, PHY_MAX_PAYLOAD>;

/// Read a little-endian u16 at `index`
pub fn read_u16_le(buffer: &[u8], index: usize) -> u16 {
    u16::from_le_bytes([buffer[index], buffer[index + 1]])
}

/// Read a little-endian u32 at `index`
pub fn read_u32_le(buffer: &[u8], index: usize) -> u32 {
    u32::from_le_bytes([
        buffer[index],
        buffer[index + 1],
        buffer[index + 2],
        buffer[index + 3],
    ])
}

/// Read a little-endian 24-bit value at `index`
pub fn read_u24_le(buffer: &[u8], index: usize) -> u32 {
    u32::from_le_bytes([buffer[index], buffer[index + 1], buffer[index + 2], 0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fctrl_round_trips_every_flag() {
        let fctrl = FCtrl {
            adr: true,
            adr_ack_req: false,
            ack: true,
            f_pending: false,
            f_opts_len: 15,
        };
        assert_eq!(fctrl.to_byte(), 0xAF);
        assert_eq!(FCtrl::from_byte(0xAF), fctrl);
    }

    #[test]
    fn mhdr_keeps_major_bits() {
        let header = MacHeader::from_byte(0x81);
        assert_eq!(header.mtype, MType::ConfirmedDataUp);
        assert_eq!(header.major, 1);
        assert_eq!(header.to_byte(), 0x81);
    }
}
