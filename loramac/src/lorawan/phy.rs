//! PHY abstraction
//!
//! [`LoRaPhy`] is everything the MAC engine asks of the regional layer:
//! channel and datarate policy, duty-cycle back-off, receive window
//! geometry, ADR tables and radio access. The engine calls it
//! synchronously; radio completion comes back through the event queue.

use crate::timer::TimerTime;

/// Receive slot a configuration belongs to
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxSlot {
    /// First Class A window
    Rx1,
    /// Second Class A window
    Rx2,
    /// Continuous Class C window on the RX2 channel
    Rx2ClassC,
    /// Class B ping slot
    PingSlot,
    /// Class B beacon window
    Beacon,
}

/// Receive window configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxConfigParams {
    /// Uplink channel index (RX1 follows it)
    pub channel: u8,
    /// Frequency in Hz, zero to derive it from `channel`
    pub frequency: u32,
    /// Datarate index
    pub datarate: u8,
    /// Bandwidth in Hz
    pub bandwidth: u32,
    /// Window length in symbols
    pub window_timeout: u16,
    /// Offset to the nominal window opening in milliseconds
    pub window_offset: i32,
    /// Keep receiving until stopped
    pub rx_continuous: bool,
    /// Slot this window belongs to
    pub rx_slot: RxSlot,
}

/// Transmission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxConfigParams {
    /// Channel index
    pub channel: u8,
    /// Datarate index
    pub datarate: u8,
    /// TX power index
    pub tx_power: u8,
    /// Maximum EIRP in dBm
    pub max_eirp: i8,
    /// Antenna gain in dBi
    pub antenna_gain: i8,
    /// Frame length in bytes
    pub pkt_len: u8,
}

/// Result of a transmission setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxConfigResult {
    /// Conducted power actually programmed (dBm)
    pub tx_power_dbm: i8,
    /// Time on air of the frame in milliseconds
    pub time_on_air: u32,
}

/// Channel selection request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextChannelParams {
    /// Aggregated time-off still to be respected
    pub aggregated_time_off: TimerTime,
    /// Time the last aggregated transmission completed
    pub last_aggregated_tx: TimerTime,
    /// Current time
    pub current_time: TimerTime,
    /// Datarate the channel must support
    pub datarate: u8,
    /// Network joined
    pub joined: bool,
    /// Duty-cycle enforcement
    pub duty_cycle_on: bool,
}

/// Selected channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextChannel {
    /// Channel index
    pub channel: u8,
    /// Time to wait before the channel may be used (ms)
    pub time_to_wait: TimerTime,
    /// Aggregated time-off after selection (reset once elapsed)
    pub aggregated_time_off: TimerTime,
}

/// Back-off update after a transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffParams {
    /// Network joined
    pub joined: bool,
    /// Last frame was a join request
    pub last_tx_is_join_request: bool,
    /// Duty-cycle enforcement
    pub duty_cycle_on: bool,
    /// Channel of the last transmission
    pub channel: u8,
    /// Time since the MAC was initialized
    pub elapsed_since_init: TimerTime,
    /// Time on air of the last transmission
    pub tx_time_on_air: u32,
    /// Time the last transmission completed
    pub last_tx_done: TimerTime,
}

/// Input of the ADR back-off algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdrNextParams {
    /// ADR bit of the frame being prepared
    pub adr_enabled: bool,
    /// Uplinks since the last downlink
    pub adr_ack_counter: u16,
    /// Current datarate
    pub datarate: u8,
    /// Current TX power index
    pub tx_power: u8,
    /// Restore default channels when reaching the lowest datarate
    pub update_chan_mask: bool,
    /// ADR_ACK_LIMIT
    pub adr_ack_limit: u16,
    /// ADR_ACK_DELAY
    pub adr_ack_delay: u16,
}

/// Output of the ADR back-off algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdrNext {
    /// Set ADRACKReq in the uplink
    pub adr_ack_req: bool,
    /// Datarate to use
    pub datarate: u8,
    /// TX power index to use
    pub tx_power: u8,
    /// Updated ADR ack counter
    pub adr_ack_counter: u16,
}

/// LinkADRReq evaluation input
#[derive(Debug, Clone, Copy)]
pub struct LinkAdrParams<'a> {
    /// Contiguous LinkADRReq commands, each starting with its CID
    pub payload: &'a [u8],
    /// ADR enabled on the device
    pub adr_enabled: bool,
    /// Current datarate
    pub datarate: u8,
    /// Current TX power index
    pub tx_power: u8,
    /// Current repetition count
    pub nb_rep: u8,
}

/// LinkADRReq evaluation result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAdrResult {
    /// LinkADRAns status bits (power, datarate, channel mask)
    pub status: u8,
    /// New datarate
    pub datarate: u8,
    /// New TX power index
    pub tx_power: u8,
    /// New repetition count
    pub nb_rep: u8,
    /// Bytes consumed from the payload
    pub consumed: usize,
}

/// RXParamSetupReq content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxParamSetup {
    /// RX2 datarate
    pub datarate: u8,
    /// RX1 datarate offset
    pub dr_offset: u8,
    /// RX2 frequency in Hz
    pub frequency: u32,
}

/// NewChannelReq content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewChannelParams {
    /// Channel index
    pub index: u8,
    /// Frequency in Hz, zero disables the channel
    pub frequency: u32,
    /// Minimum datarate
    pub min_dr: u8,
    /// Maximum datarate
    pub max_dr: u8,
}

/// Scalar regional parameters
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyParam {
    /// Lowest uplink datarate
    MinTxDatarate,
    /// Highest uplink datarate
    MaxTxDatarate,
    /// Highest downlink datarate
    MaxRxDatarate,
    /// Datarate used after reset
    DefaultDatarate,
    /// TX power index used after reset
    DefaultTxPower,
    /// Maximum EIRP in dBm
    DefaultMaxEirp,
    /// Antenna gain in dBi
    DefaultAntennaGain,
    /// RX1 delay in ms
    ReceiveDelay1,
    /// RX2 delay in ms
    ReceiveDelay2,
    /// Join accept RX1 delay in ms
    JoinAcceptDelay1,
    /// Join accept RX2 delay in ms
    JoinAcceptDelay2,
    /// Maximum receive window length in ms
    MaxRxWindow,
    /// Acknowledgement timeout in ms
    AckTimeout,
    /// Acknowledgement timeout randomization in ms
    AckTimeoutRnd,
    /// RX1 datarate offset after reset
    DefaultRx1DrOffset,
    /// RX2 frequency after reset
    DefaultRx2Frequency,
    /// RX2 datarate after reset
    DefaultRx2Datarate,
    /// Aggregated duty cycle after reset (1 = off)
    DefaultAggregatedDutyCycle,
    /// Beacon frequency in Hz
    BeaconFrequency,
    /// Beacon datarate
    BeaconDatarate,
    /// Ping slot frequency in Hz
    PingSlotFrequency,
    /// Ping slot datarate
    PingSlotDatarate,
    /// Size of the first RFU field of the beacon frame
    BeaconRfu1Size,
    /// Size of the second RFU field of the beacon frame
    BeaconRfu2Size,
}

/// Defaults to restore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitType {
    /// Every regional setting
    All,
    /// Only the default channels
    RestoreDefaultChannels,
}

/// PHY layer failure
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyError {
    /// The radio driver reported an error
    Radio,
    /// Parameter outside the regional range
    InvalidParameter,
    /// No enabled channel supports the requested datarate
    NoChannel,
    /// Feature not available in this region
    NotSupported,
}

/// Regional policy and radio access used by the MAC engine
pub trait LoRaPhy {
    /// Scalar regional parameter
    fn get_phy_params(&self, param: PhyParam) -> u32;

    /// Restore regional defaults
    fn load_defaults(&mut self, init: InitType);

    /// Select the public or private sync word
    fn set_public_network(&mut self, public: bool);

    /// Put the radio to sleep
    fn put_radio_to_sleep(&mut self);

    /// Put the radio in standby
    fn put_radio_to_standby(&mut self);

    /// Random number from the radio
    fn get_radio_rng(&mut self) -> u32;

    /// Program the radio for a receive window
    fn rx_config(&mut self, params: &RxConfigParams) -> Result<(), PhyError>;

    /// Start the reception configured by [`rx_config`](Self::rx_config)
    fn handle_receive(&mut self, timeout_ms: u32) -> Result<(), PhyError>;

    /// Program the radio for a transmission
    fn tx_config(&mut self, params: &TxConfigParams) -> Result<TxConfigResult, PhyError>;

    /// Start transmitting
    fn handle_send(&mut self, buffer: &[u8]) -> Result<(), PhyError>;

    /// Pick the next channel honoring band and aggregated duty cycles
    fn set_next_channel(&mut self, params: &NextChannelParams) -> Result<NextChannel, PhyError>;

    /// Update band time-off after a transmission
    fn calculate_backoff(&mut self, params: &BackoffParams);

    /// Receive window geometry for `datarate`
    fn compute_rx_win_params(
        &self,
        datarate: u8,
        min_rx_symbols: u8,
        rx_error_ms: u32,
        rx_slot: RxSlot,
    ) -> RxConfigParams;

    /// Beacon window geometry, `None` if the region has no Class B support
    fn compute_beacon_win_params(&self, min_rx_symbols: u8, rx_error_ms: u32) -> Option<RxConfigParams>;

    /// Ping slot window geometry, `None` if the region has no Class B support
    fn compute_ping_win_params(
        &self,
        datarate: u8,
        frequency: u32,
        min_rx_symbols: u8,
        rx_error_ms: u32,
    ) -> Option<RxConfigParams>;

    /// Apply the CFList of a join accept
    fn apply_cf_list(&mut self, cf_list: &[u8]);

    /// ADR back-off
    fn get_next_adr(&mut self, params: &AdrNextParams) -> AdrNext;

    /// Evaluate LinkADRReq commands
    fn link_adr_req(&mut self, params: &LinkAdrParams<'_>) -> LinkAdrResult;

    /// Evaluate RXParamSetupReq, returning the answer status bits
    fn rx_param_setup_req(&mut self, params: &RxParamSetup) -> u8;

    /// Evaluate NewChannelReq, returning the answer status bits
    fn new_channel_req(&mut self, params: &NewChannelParams) -> u8;

    /// Evaluate DlChannelReq, returning the answer status bits
    fn dl_channel_req(&mut self, index: u8, frequency: u32) -> u8;

    /// Evaluate TxParamSetupReq; `false` when the region ignores it
    fn tx_param_setup_req(&mut self, payload: u8) -> bool;

    /// Next lower uplink datarate, saturating at the minimum
    fn next_lower_tx_datarate(&self, datarate: u8) -> u8;

    /// Datarate for the given join attempt
    fn alternate_datarate(&self, nb_trials: u16) -> u8;

    /// RX1 datarate for an uplink datarate and offset
    fn apply_dr_offset(&self, datarate: u8, dr_offset: u8) -> u8;

    /// Maximum MACPayload size for `datarate`
    fn max_payload(&self, datarate: u8) -> u8;

    /// Datarate valid for uplinks
    fn verify_datarate(&self, datarate: u8) -> bool;

    /// TX power index valid
    fn verify_tx_power(&self, tx_power: u8) -> bool;

    /// Frequency usable in this region
    fn verify_frequency(&self, frequency: u32) -> bool;
}
