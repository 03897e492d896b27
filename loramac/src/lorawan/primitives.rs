//! Service primitives exchanged with the application
//!
//! Requests go down through [`LoRaMac::mcps_request`] and
//! [`LoRaMac::mlme_request`]; results come back through the
//! [`MacPrimitives`] callbacks, invoked at the end of a MAC state check.
//!
//! [`LoRaMac::mcps_request`]: crate::lorawan::mac::LoRaMac::mcps_request
//! [`LoRaMac::mlme_request`]: crate::lorawan::mac::LoRaMac::mlme_request

use heapless::Vec;

use crate::class::class_b::beacon::BeaconInfo;
use crate::config::device::DevAddr;
use crate::lorawan::frame::PHY_MAX_PAYLOAD;
use crate::lorawan::phy::RxSlot;

/// Status reported with confirms and indications
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventInfoStatus {
    /// Service performed successfully
    Ok,
    /// Generic error
    #[default]
    Error,
    /// Transmission timed out
    TxTimeout,
    /// RX1 window closed without a frame
    Rx1Timeout,
    /// RX2 window closed without a frame
    Rx2Timeout,
    /// Error in the RX1 window
    Rx1Error,
    /// Error in the RX2 window
    Rx2Error,
    /// Join accept MIC mismatch
    JoinFail,
    /// Downlink counter already seen
    DownlinkRepeated,
    /// Retransmission datarate cannot carry the payload
    TxDrPayloadSizeError,
    /// Downlink counter beyond the maximum gap
    DownlinkTooManyFramesLoss,
    /// Frame addressed to another device
    AddressFail,
    /// MIC mismatch
    MicFail,
    /// Cipher setup failed
    CryptoFail,
    /// Beacon received and locked
    BeaconLocked,
    /// Beacon lost after too many misses
    BeaconLost,
    /// Expected beacon not received
    BeaconNotFound,
}

/// Data service type
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum McpsType {
    /// Unconfirmed data
    #[default]
    Unconfirmed,
    /// Confirmed data
    Confirmed,
    /// Multicast data
    Multicast,
    /// Proprietary frame
    Proprietary,
}

/// Data service request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpsRequest<'a> {
    /// Unconfirmed uplink
    Unconfirmed {
        /// Application port (1-224)
        port: u8,
        /// Application payload
        payload: &'a [u8],
        /// Datarate used when ADR is off
        datarate: u8,
    },
    /// Confirmed uplink
    Confirmed {
        /// Application port (1-224)
        port: u8,
        /// Application payload
        payload: &'a [u8],
        /// Datarate used when ADR is off
        datarate: u8,
        /// Transmissions before giving up
        nb_trials: u8,
    },
    /// Proprietary frame, sent as is after the MHDR
    Proprietary {
        /// Raw payload
        payload: &'a [u8],
        /// Datarate used when ADR is off
        datarate: u8,
    },
}

impl McpsRequest<'_> {
    /// Service type of the request
    pub fn mcps_type(&self) -> McpsType {
        match self {
            McpsRequest::Unconfirmed { .. } => McpsType::Unconfirmed,
            McpsRequest::Confirmed { .. } => McpsType::Confirmed,
            McpsRequest::Proprietary { .. } => McpsType::Proprietary,
        }
    }
}

/// Result of a data service request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct McpsConfirm {
    /// Request type
    pub mcps_type: McpsType,
    /// Outcome
    pub status: EventInfoStatus,
    /// Datarate of the last transmission
    pub datarate: u8,
    /// Conducted TX power of the last transmission (dBm)
    pub tx_power: i8,
    /// Acknowledgement received
    pub ack_received: bool,
    /// Transmissions performed
    pub nb_retries: u8,
    /// Time on air of the last transmission (ms)
    pub tx_time_on_air: u32,
    /// Uplink counter of the frame
    pub uplink_counter: u32,
    /// Channel of the last transmission
    pub channel: u8,
}

/// Received data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpsIndication {
    /// Downlink type
    pub mcps_type: McpsType,
    /// Outcome
    pub status: EventInfoStatus,
    /// Frame addressed to a multicast group
    pub multicast: bool,
    /// Address the frame was sent to
    pub address: DevAddr,
    /// More data pending on the network side
    pub frame_pending: bool,
    /// Application port
    pub port: u8,
    /// Decrypted application payload
    pub payload: Vec<u8, PHY_MAX_PAYLOAD>,
    /// Application payload present
    pub rx_data: bool,
    /// RSSI of the frame
    pub rssi: i16,
    /// SNR of the frame
    pub snr: i8,
    /// Window the frame was received in
    pub rx_slot: RxSlot,
    /// Frame acknowledges the last confirmed uplink
    pub ack_received: bool,
    /// Downlink counter of the frame
    pub downlink_counter: u32,
    /// Datarate of the frame
    pub rx_datarate: u8,
}

impl Default for McpsIndication {
    fn default() -> Self {
        Self {
            mcps_type: McpsType::Unconfirmed,
            status: EventInfoStatus::Ok,
            multicast: false,
            address: 0,
            frame_pending: false,
            port: 0,
            payload: Vec::new(),
            rx_data: false,
            rssi: 0,
            snr: 0,
            rx_slot: RxSlot::Rx1,
            ack_received: false,
            downlink_counter: 0,
            rx_datarate: 0,
        }
    }
}

/// Management service type
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MlmeType {
    /// Over-the-air activation
    #[default]
    Join,
    /// Link check
    LinkCheck,
    /// Network time request
    DeviceTime,
    /// Ping slot periodicity announcement
    PingSlotInfo,
    /// Class B beacon acquisition
    BeaconAcquisition,
}

/// Management service request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlmeRequest {
    /// Join the network with the configured keys
    Join {
        /// Join request transmissions before giving up
        nb_trials: u8,
    },
    /// Piggy-back a LinkCheckReq on the next uplink
    LinkCheck,
    /// Piggy-back a DeviceTimeReq on the next uplink
    DeviceTime,
    /// Announce the ping slot periodicity
    PingSlotInfo {
        /// Ping every 2^periodicity seconds (0-7)
        periodicity: u8,
    },
    /// Search for the Class B beacon
    BeaconAcquisition,
}

impl MlmeRequest {
    /// Service type of the request
    pub fn mlme_type(&self) -> MlmeType {
        match self {
            MlmeRequest::Join { .. } => MlmeType::Join,
            MlmeRequest::LinkCheck => MlmeType::LinkCheck,
            MlmeRequest::DeviceTime => MlmeType::DeviceTime,
            MlmeRequest::PingSlotInfo { .. } => MlmeType::PingSlotInfo,
            MlmeRequest::BeaconAcquisition => MlmeType::BeaconAcquisition,
        }
    }
}

/// Result of a management request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MlmeConfirm {
    /// Request type
    pub mlme_type: MlmeType,
    /// Outcome
    pub status: EventInfoStatus,
    /// Time on air of the last transmission (ms)
    pub tx_time_on_air: u32,
    /// LinkCheckAns demodulation margin
    pub demod_margin: u8,
    /// LinkCheckAns gateway count
    pub nb_gateways: u8,
    /// Join request transmissions
    pub nb_retries: u16,
}

/// Unsolicited management event
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlmeIndicationType {
    /// Sticky answers wait for an uplink
    ScheduleUplink,
    /// Class B beacon received or missed
    Beacon,
    /// Class B beacon lost, device back in Class A
    BeaconLost,
}

/// Unsolicited management event and its status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MlmeIndication {
    /// Event type
    pub indication: MlmeIndicationType,
    /// Outcome
    pub status: EventInfoStatus,
    /// Received beacon, if any
    pub beacon: Option<BeaconInfo>,
}

/// Upward interface of the MAC
pub trait MacPrimitives {
    /// A data request completed
    fn mcps_confirm(&mut self, confirm: &McpsConfirm);

    /// Data was received
    fn mcps_indication(&mut self, indication: &McpsIndication);

    /// A management request completed
    fn mlme_confirm(&mut self, confirm: &MlmeConfirm);

    /// Unsolicited management event
    fn mlme_indication(&mut self, indication: &MlmeIndication);

    /// Battery level for DevStatusAns: 0 on external power, 1-254 level,
    /// 255 when unknown
    fn battery_level(&mut self) -> u8 {
        255
    }
}
