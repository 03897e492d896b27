//! LoRaWAN MAC engine
//!
//! [`LoRaMac`] is the sole owner of the protocol state. It is driven by
//! three kinds of input:
//! - service requests from the application ([`LoRaMac::mcps_request`],
//!   [`LoRaMac::mlme_request`])
//! - radio events posted to the [`EventQueue`](crate::event::EventQueue)
//! - software timer expiries, polled from the same loop
//!
//! Every entry point takes `&mut self`, so a transition always runs to
//! completion before the next one starts. Results reach the application
//! through [`MacPrimitives`] at the end of the MAC state check.

mod class_b_host;
mod mac_commands;
mod rx;
mod state;
mod tx;

use heapless::Vec;
use log::{debug, info, warn};

use crate::class::class_b::beacon::BeaconFrameLayout;
use crate::class::class_b::ClassB;
use crate::config::device::{
    AESKey, ActivationState, ClassBConfig, DevAddr, DeviceClass, DeviceConfig, MacConfig,
};
use crate::crypto::CryptoError;
use crate::event::{EventReceiver, MacEvent, RadioEvent};
use crate::timer::{Clock, TimerId, TimerService, TimerTime};

use super::commands::{CommandIdentifier, MacCommandBuffer};
use super::frame::{FrameBuffer, MType, MacHeader};
use super::multicast::{MulticastChannel, MulticastList};
use super::phy::{InitType, LoRaPhy, PhyParam, RxConfigParams, RxSlot};
use super::primitives::{
    EventInfoStatus, MacPrimitives, McpsConfirm, McpsIndication, McpsRequest, MlmeConfirm,
    MlmeIndication, MlmeRequest, MlmeType,
};

/// Largest number of queued MLME indications
const MAX_MLME_INDICATIONS: usize = 4;

/// MAC layer error
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacError {
    /// A transmission cycle is running
    Busy,
    /// Invalid request parameter
    ParameterInvalid,
    /// Unknown service or frame type
    ServiceUnknown,
    /// Data request before activation
    NoNetworkJoined,
    /// Payload does not fit the current datarate
    LengthError,
    /// Network switched the device off (DutyCycleReq 255)
    DeviceOff,
    /// No enabled channel for the current datarate
    NoChannelFound,
    /// Fixed-capacity buffer full
    BufferFull,
    /// Crypto engine failure
    Crypto(CryptoError),
    /// Class B used before initialization
    NotInitialized,
    /// Class B switch without a beacon
    NoBeaconFound,
    /// Region does not support the operation
    NoOp,
}

impl From<CryptoError> for MacError {
    fn from(e: CryptoError) -> Self {
        MacError::Crypto(e)
    }
}

/// MAC state bitmask
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacState(u8);

impl MacState {
    /// Nothing in progress
    pub const IDLE: Self = Self(0);
    /// Uplink cycle in progress
    pub const TX_RUNNING: Self = Self(1 << 0);
    /// Class A receive window open
    pub const RX: Self = Self(1 << 1);
    /// Waiting for an acknowledgement
    pub const ACK_REQ: Self = Self(1 << 2);
    /// Transmission postponed by the duty cycle
    pub const TX_DELAYED: Self = Self(1 << 3);
    /// Radio being configured for a transmission
    pub const TX_CONFIG: Self = Self(1 << 4);
    /// Received frame dropped, cycle to be closed
    pub const RX_ABORT: Self = Self(1 << 5);

    /// All bits of `other` set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && (other.0 != 0 || self.0 == 0)
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// No bit set
    pub fn is_idle(self) -> bool {
        self.0 == 0
    }

    /// Raw bits
    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Pending primitives
///
/// A flag is cleared only once the corresponding primitive was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacFlags {
    /// McpsConfirm pending
    pub mcps_req: bool,
    /// MlmeConfirm pending
    pub mlme_req: bool,
    /// McpsIndication pending
    pub mcps_ind: bool,
    /// McpsIndication must not reach the application
    pub mcps_ind_skip: bool,
    /// MlmeIndication pending
    pub mlme_ind: bool,
    /// Radio side of the cycle finished
    pub mac_done: bool,
    /// MlmeConfirm waits for the uplink carrying its command
    pub mlme_cmd: bool,
}

/// Protocol parameters
#[derive(Debug, Clone)]
pub struct MacParams {
    /// Device address
    pub dev_addr: DevAddr,
    /// Network identifier
    pub net_id: u32,
    /// Network session key
    pub nwk_skey: AESKey,
    /// Application session key
    pub app_skey: AESKey,
    /// DevNonce of the last join request
    pub dev_nonce: u16,
    /// Activation mode
    pub activation: ActivationState,
    /// Session established
    pub network_joined: bool,
    /// Device class
    pub device_class: DeviceClass,

    /// Next uplink counter
    pub uplink_counter: u32,
    /// Last accepted downlink counter
    pub downlink_counter: u32,
    /// Uplinks since the last downlink
    pub adr_ack_counter: u16,

    /// Adaptive data rate
    pub adr_on: bool,
    /// Uplink datarate
    pub datarate: u8,
    /// TX power index
    pub tx_power: u8,
    /// Maximum EIRP in dBm
    pub max_eirp: i8,
    /// Antenna gain in dBi
    pub antenna_gain: i8,
    /// Channel of the current transmission
    pub channel: u8,
    /// Channel of the last completed transmission
    pub last_tx_channel: u8,
    /// Transmissions of each unconfirmed frame
    pub nb_rep: u8,
    /// Transmissions of the current frame
    pub nb_rep_counter: u8,

    /// DutyCycleReq exponent, 255 switches the device off
    pub max_duty_cycle: u8,
    /// Aggregated duty cycle as 1/x
    pub aggregated_duty_cycle: u32,
    /// Remaining aggregated time-off
    pub aggregated_time_off: TimerTime,
    /// Completion time of the last transmission
    pub last_aggregated_tx_done: TimerTime,
    /// Time on air of the current frame
    pub tx_time_on_air: u32,

    /// RX1 datarate offset
    pub rx1_dr_offset: u8,
    /// RX2 frequency
    pub rx2_frequency: u32,
    /// RX2 datarate
    pub rx2_datarate: u8,
    /// RX1 delay in ms
    pub receive_delay1: u32,
    /// RX2 delay in ms
    pub receive_delay2: u32,
    /// Join accept RX1 delay in ms
    pub join_accept_delay1: u32,
    /// Join accept RX2 delay in ms
    pub join_accept_delay2: u32,
    /// Maximum receive window length in ms
    pub max_rx_window: u32,
    /// RX1 opening delay of the current frame
    pub rx_window1_delay: u32,
    /// RX2 opening delay of the current frame
    pub rx_window2_delay: u32,
    /// RX1 configuration of the current frame
    pub rx_window1_config: RxConfigParams,
    /// RX2 configuration of the current frame
    pub rx_window2_config: RxConfigParams,

    /// Current frame is confirmed
    pub node_ack_requested: bool,
    /// Last downlink was confirmed and must be acknowledged
    pub srv_ack_requested: bool,
    /// Transmissions allowed for the confirmed frame
    pub ack_timeout_retries: u8,
    /// Transmissions done for the confirmed frame
    pub ack_timeout_retries_counter: u8,
    /// Acknowledgement timeout elapsed, retransmission due
    pub ack_timeout_retry: bool,

    /// Join requests sent in the current procedure
    pub join_request_trials: u16,
    /// Join requests allowed in the current procedure
    pub max_join_request_trials: u16,
    /// Last frame was a join request
    pub last_tx_is_join_request: bool,

    /// Frame payload length of the current frame
    pub tx_payload_len: usize,
    /// FOpts length of the current frame
    pub tx_fopts_len: usize,
    /// Periodicity announced by the pending PingSlotInfoReq
    pub pending_ping_periodicity: Option<u8>,
    /// Device time at start-up
    pub init_time: TimerTime,
}

impl MacParams {
    fn new<P: LoRaPhy>(phy: &P, config: &MacConfig, now: TimerTime) -> Self {
        let rx_window = phy.compute_rx_win_params(
            phy.get_phy_params(PhyParam::DefaultDatarate) as u8,
            config.min_rx_symbols,
            config.max_rx_error_ms,
            RxSlot::Rx1,
        );
        let mut params = Self {
            dev_addr: 0,
            net_id: 0,
            nwk_skey: [0; 16],
            app_skey: [0; 16],
            dev_nonce: 0,
            activation: ActivationState::Idle,
            network_joined: false,
            device_class: DeviceClass::A,
            uplink_counter: 0,
            downlink_counter: 0,
            adr_ack_counter: 0,
            adr_on: config.adr_on,
            datarate: 0,
            tx_power: 0,
            max_eirp: 0,
            antenna_gain: 0,
            channel: 0,
            last_tx_channel: 0,
            nb_rep: 1,
            nb_rep_counter: 0,
            max_duty_cycle: 0,
            aggregated_duty_cycle: 1,
            aggregated_time_off: 0,
            last_aggregated_tx_done: 0,
            tx_time_on_air: 0,
            rx1_dr_offset: 0,
            rx2_frequency: 0,
            rx2_datarate: 0,
            receive_delay1: 0,
            receive_delay2: 0,
            join_accept_delay1: 0,
            join_accept_delay2: 0,
            max_rx_window: 0,
            rx_window1_delay: 0,
            rx_window2_delay: 0,
            rx_window1_config: rx_window,
            rx_window2_config: RxConfigParams {
                rx_slot: RxSlot::Rx2,
                ..rx_window
            },
            node_ack_requested: false,
            srv_ack_requested: false,
            ack_timeout_retries: 1,
            ack_timeout_retries_counter: 1,
            ack_timeout_retry: false,
            join_request_trials: 0,
            max_join_request_trials: 1,
            last_tx_is_join_request: false,
            tx_payload_len: 0,
            tx_fopts_len: 0,
            pending_ping_periodicity: None,
            init_time: now,
        };
        params.load_defaults(phy);
        params
    }

    /// Regional defaults of the radio parameters
    fn load_defaults<P: LoRaPhy>(&mut self, phy: &P) {
        self.datarate = phy.get_phy_params(PhyParam::DefaultDatarate) as u8;
        self.tx_power = phy.get_phy_params(PhyParam::DefaultTxPower) as u8;
        self.max_eirp = phy.get_phy_params(PhyParam::DefaultMaxEirp) as i8;
        self.antenna_gain = phy.get_phy_params(PhyParam::DefaultAntennaGain) as i8;
        self.rx1_dr_offset = phy.get_phy_params(PhyParam::DefaultRx1DrOffset) as u8;
        self.rx2_frequency = phy.get_phy_params(PhyParam::DefaultRx2Frequency);
        self.rx2_datarate = phy.get_phy_params(PhyParam::DefaultRx2Datarate) as u8;
        self.receive_delay1 = phy.get_phy_params(PhyParam::ReceiveDelay1);
        self.receive_delay2 = phy.get_phy_params(PhyParam::ReceiveDelay2);
        self.join_accept_delay1 = phy.get_phy_params(PhyParam::JoinAcceptDelay1);
        self.join_accept_delay2 = phy.get_phy_params(PhyParam::JoinAcceptDelay2);
        self.max_rx_window = phy.get_phy_params(PhyParam::MaxRxWindow);
        self.aggregated_duty_cycle = phy.get_phy_params(PhyParam::DefaultAggregatedDutyCycle).max(1);
        self.nb_rep = 1;
    }
}

/// LoRaWAN MAC engine
pub struct LoRaMac<P: LoRaPhy, C: Clock, H: MacPrimitives> {
    phy: P,
    timers: TimerService<C>,
    primitives: H,
    device: DeviceConfig,
    config: MacConfig,
    params: MacParams,
    state: MacState,
    flags: MacFlags,
    commands: MacCommandBuffer,
    multicast: MulticastList,
    class_b: ClassB,
    buffer: FrameBuffer,
    rx_slot: RxSlot,
    mcps_confirm: McpsConfirm,
    mcps_indication: McpsIndication,
    mlme_confirm: MlmeConfirm,
    mlme_indications: Vec<MlmeIndication, MAX_MLME_INDICATIONS>,
}

impl<P: LoRaPhy, C: Clock, H: MacPrimitives> LoRaMac<P, C, H> {
    /// Create the MAC engine
    ///
    /// An ABP configuration (address and both session keys present) is
    /// activated at once; an OTAA configuration waits for
    /// [`MlmeRequest::Join`].
    pub fn new(
        mut phy: P,
        clock: C,
        primitives: H,
        device: DeviceConfig,
        config: MacConfig,
        class_b_config: ClassBConfig,
    ) -> Self {
        phy.load_defaults(InitType::All);
        phy.set_public_network(config.public_network);
        phy.put_radio_to_sleep();

        let timers = TimerService::new(clock);
        let params = MacParams::new(&phy, &config, timers.get_current_time());
        let layout = BeaconFrameLayout {
            rfu1_size: phy.get_phy_params(PhyParam::BeaconRfu1Size) as usize,
            rfu2_size: phy.get_phy_params(PhyParam::BeaconRfu2Size) as usize,
        };
        let mut class_b = ClassB::new(class_b_config);
        class_b.initialize(device.dev_addr.unwrap_or(0), layout);

        let mut mac = Self {
            phy,
            timers,
            primitives,
            device,
            config,
            params,
            state: MacState::IDLE,
            flags: MacFlags::default(),
            commands: MacCommandBuffer::new(),
            multicast: MulticastList::new(),
            class_b,
            buffer: FrameBuffer::new(),
            rx_slot: RxSlot::Rx1,
            mcps_confirm: McpsConfirm::default(),
            mcps_indication: McpsIndication::default(),
            mlme_confirm: MlmeConfirm::default(),
            mlme_indications: Vec::new(),
        };

        if let (Some(dev_addr), Some(nwk_skey), Some(app_skey)) =
            (mac.device.dev_addr, mac.device.nwk_skey, mac.device.app_skey)
        {
            let net_id = mac.device.net_id;
            // Cannot fail: the state is idle
            let _ = mac.activate_personalization(net_id, dev_addr, nwk_skey, app_skey);
        }
        mac
    }

    /// Activate by personalization
    pub fn activate_personalization(
        &mut self,
        net_id: u32,
        dev_addr: DevAddr,
        nwk_skey: AESKey,
        app_skey: AESKey,
    ) -> Result<(), MacError> {
        if self.state.contains(MacState::TX_RUNNING) {
            return Err(MacError::Busy);
        }
        self.params.net_id = net_id;
        self.params.dev_addr = dev_addr;
        self.params.nwk_skey = nwk_skey;
        self.params.app_skey = app_skey;
        self.params.network_joined = true;
        self.params.activation = ActivationState::ABPActivated;
        self.device.dev_addr = Some(dev_addr);
        self.class_b.set_device_address(dev_addr);
        info!("ABP activated, address {:08x}", dev_addr);
        Ok(())
    }

    /// Data service request
    pub fn mcps_request(&mut self, request: McpsRequest<'_>) -> Result<(), MacError> {
        if self.state.contains(MacState::TX_RUNNING) || self.state.contains(MacState::TX_DELAYED) {
            return Err(MacError::Busy);
        }

        let (mtype, port, payload, datarate, retries) = match request {
            McpsRequest::Unconfirmed {
                port,
                payload,
                datarate,
            } => (MType::UnconfirmedDataUp, Some(port), payload, datarate, 1),
            McpsRequest::Confirmed {
                port,
                payload,
                datarate,
                nb_trials,
            } => (
                MType::ConfirmedDataUp,
                Some(port),
                payload,
                datarate,
                nb_trials.clamp(1, self.config.max_ack_retries),
            ),
            McpsRequest::Proprietary { payload, datarate } => {
                (MType::Proprietary, None, payload, datarate, 1)
            }
        };
        if matches!(port, Some(port) if port == 0 || port > 224) {
            return Err(MacError::ParameterInvalid);
        }

        let previous_datarate = self.params.datarate;
        if !self.params.adr_on {
            let datarate = datarate.max(self.phy.get_phy_params(PhyParam::MinTxDatarate) as u8);
            if !self.phy.verify_datarate(datarate) {
                return Err(MacError::ParameterInvalid);
            }
            self.params.datarate = datarate;
        }

        self.mcps_confirm = McpsConfirm {
            mcps_type: request.mcps_type(),
            status: EventInfoStatus::Error,
            ..McpsConfirm::default()
        };
        self.params.ack_timeout_retries_counter = 1;
        self.params.ack_timeout_retries = retries;

        match self.send(MacHeader::new(mtype), port, payload) {
            Ok(()) => {
                self.flags.mcps_req = true;
                if self.flags.mlme_cmd {
                    self.flags.mlme_cmd = false;
                    self.flags.mlme_req = true;
                }
                Ok(())
            }
            Err(e) => {
                self.params.datarate = previous_datarate;
                self.params.node_ack_requested = false;
                self.state.remove(MacState::ACK_REQ);
                Err(e)
            }
        }
    }

    /// Management service request
    pub fn mlme_request(&mut self, request: MlmeRequest) -> Result<(), MacError> {
        match request {
            MlmeRequest::Join { nb_trials } => {
                if self.state.contains(MacState::TX_RUNNING) || self.state.contains(MacState::TX_DELAYED) {
                    return Err(MacError::Busy);
                }
                if nb_trials == 0 {
                    return Err(MacError::ParameterInvalid);
                }
                self.mlme_confirm = MlmeConfirm {
                    mlme_type: MlmeType::Join,
                    status: EventInfoStatus::Error,
                    ..MlmeConfirm::default()
                };
                self.reset_mac_parameters();
                self.params.join_request_trials = 0;
                self.params.max_join_request_trials = u16::from(nb_trials);
                self.params.datarate = self.phy.alternate_datarate(1);
                self.flags.mlme_req = true;
                let result = self.send(MacHeader::new(MType::JoinRequest), None, &[]);
                if result.is_err() {
                    self.flags.mlme_req = false;
                }
                result
            }
            MlmeRequest::LinkCheck => self.queue_mlme_command(MlmeType::LinkCheck, CommandIdentifier::LinkCheck, &[]),
            MlmeRequest::DeviceTime => {
                self.queue_mlme_command(MlmeType::DeviceTime, CommandIdentifier::DeviceTime, &[])
            }
            MlmeRequest::PingSlotInfo { periodicity } => {
                if periodicity > 7 {
                    return Err(MacError::ParameterInvalid);
                }
                self.queue_mlme_command(MlmeType::PingSlotInfo, CommandIdentifier::PingSlotInfo, &[periodicity])?;
                self.params.pending_ping_periodicity = Some(periodicity);
                Ok(())
            }
            MlmeRequest::BeaconAcquisition => self.with_class_b(|class_b, host| class_b.enable_beacon_acquisition(host)),
        }
    }

    fn queue_mlme_command(&mut self, mlme_type: MlmeType, cid: CommandIdentifier, params: &[u8]) -> Result<(), MacError> {
        if self.state.contains(MacState::TX_RUNNING) || self.state.contains(MacState::TX_DELAYED) {
            return Err(MacError::Busy);
        }
        self.commands.add(cid, params)?;
        self.mlme_confirm = MlmeConfirm {
            mlme_type,
            status: EventInfoStatus::Error,
            ..MlmeConfirm::default()
        };
        // Confirmed once an uplink carried the command
        self.flags.mlme_cmd = true;
        Ok(())
    }

    /// Switch the device class
    ///
    /// Class B requires a locked beacon; Class C opens the continuous RX2
    /// window at once when idle.
    pub fn set_device_class(&mut self, class: DeviceClass) -> Result<(), MacError> {
        let current = self.params.device_class;
        if current == class {
            return Ok(());
        }
        match class {
            DeviceClass::A => {
                if current == DeviceClass::B {
                    self.with_class_b(|class_b, host| class_b.disable(host));
                } else {
                    self.phy.put_radio_to_sleep();
                }
                self.params.device_class = DeviceClass::A;
            }
            DeviceClass::B => {
                if current != DeviceClass::A {
                    return Err(MacError::ParameterInvalid);
                }
                self.with_class_b(|class_b, host| class_b.enable(host))?;
                self.params.device_class = DeviceClass::B;
            }
            DeviceClass::C => {
                if current != DeviceClass::A {
                    return Err(MacError::ParameterInvalid);
                }
                self.params.device_class = DeviceClass::C;
                self.params.node_ack_requested = false;
                self.state.remove(MacState::ACK_REQ);
                if self.state.is_idle() {
                    self.open_continuous_rx2_window();
                }
            }
        }
        info!("device class {:?}", class);
        Ok(())
    }

    /// Link a multicast group
    pub fn multicast_channel_link(&mut self, channel: MulticastChannel) -> Result<(), MacError> {
        if self.state.contains(MacState::TX_RUNNING) {
            return Err(MacError::Busy);
        }
        let address = channel.address;
        self.multicast.link(channel)?;
        if let Err(e) = self.with_class_b(|class_b, host| class_b.add_multicast_address(host, address)) {
            // Keep the list and the ping slots consistent
            let _ = self.multicast.unlink(address);
            return Err(e);
        }
        debug!("multicast {:08x} linked", address);
        Ok(())
    }

    /// Unlink a multicast group
    pub fn multicast_channel_unlink(&mut self, address: DevAddr) -> Result<MulticastChannel, MacError> {
        if self.state.contains(MacState::TX_RUNNING) {
            return Err(MacError::Busy);
        }
        let channel = self.multicast.unlink(address)?;
        if let Err(e) = self.with_class_b(|class_b, host| class_b.remove_multicast_address(host, address)) {
            warn!("multicast {:08x} had no ping slot: {:?}", address, e);
        }
        Ok(channel)
    }

    /// Linked multicast groups
    pub fn multicast_channels(&self) -> &MulticastList {
        &self.multicast
    }

    /// Dispatch one event
    pub fn handle_event(&mut self, event: MacEvent) {
        match event {
            MacEvent::Radio(RadioEvent::TxDone) => self.on_radio_tx_done(),
            MacEvent::Radio(RadioEvent::RxDone {
                payload,
                rssi,
                snr,
                timestamp,
            }) => self.on_radio_rx_done(&payload, rssi, snr, timestamp),
            MacEvent::Radio(RadioEvent::RxError) => self.on_radio_rx_error(),
            MacEvent::Radio(RadioEvent::RxTimeout) => self.on_radio_rx_timeout(),
            MacEvent::Radio(RadioEvent::TxTimeout) => self.on_radio_tx_timeout(),
            MacEvent::Timer(timer) => self.on_timer(timer),
        }
    }

    /// Drain the event queue, then fire expired timers
    pub fn process<const N: usize>(&mut self, events: &mut EventReceiver<'_, N>) {
        while let Some(event) = events.dequeue() {
            self.handle_event(event);
        }
        self.poll_timers();
    }

    /// Fire every expired timer
    pub fn poll_timers(&mut self) {
        while let Some(timer) = self.timers.poll_expired() {
            self.on_timer(timer);
        }
    }

    /// Earliest armed timer deadline
    pub fn next_deadline(&self) -> Option<TimerTime> {
        self.timers.next_deadline()
    }

    fn on_timer(&mut self, timer: TimerId) {
        match timer {
            TimerId::MacStateCheck => self.on_mac_state_check_timer_event(),
            TimerId::TxDelayed => self.on_tx_delayed_timer_event(),
            TimerId::RxWindow1 => self.on_rx_window1_timer_event(),
            TimerId::RxWindow2 => self.on_rx_window2_timer_event(),
            TimerId::AckTimeout => self.on_ack_timeout_timer_event(),
            TimerId::BeaconWindow => self.with_class_b(|class_b, host| class_b.open_beacon_window(host)),
            TimerId::BeaconAcquisition => {
                self.with_class_b(|class_b, host| class_b.handle_acquisition_timeout(host))
            }
            TimerId::PingSlot => self.with_class_b(|class_b, host| class_b.open_ping_slot(host)),
        }
    }

    /// Current state bits
    pub fn state(&self) -> MacState {
        self.state
    }

    /// Pending primitive flags
    pub fn flags(&self) -> MacFlags {
        self.flags
    }

    /// Protocol parameters
    pub fn params(&self) -> &MacParams {
        &self.params
    }

    /// Class B state
    pub fn class_b(&self) -> &ClassB {
        &self.class_b
    }

    /// Regional layer
    pub fn phy(&self) -> &P {
        &self.phy
    }

    /// Mutable regional layer
    pub fn phy_mut(&mut self) -> &mut P {
        &mut self.phy
    }

    /// Application callbacks
    pub fn primitives(&self) -> &H {
        &self.primitives
    }

    /// Mutable application callbacks
    pub fn primitives_mut(&mut self) -> &mut H {
        &mut self.primitives
    }

    /// Timer service
    pub fn timers(&self) -> &TimerService<C> {
        &self.timers
    }

    /// Last built uplink
    pub fn frame_buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Pending uplink MAC commands
    pub fn mac_commands(&self) -> &MacCommandBuffer {
        &self.commands
    }

    /// Device class
    pub fn device_class(&self) -> DeviceClass {
        self.params.device_class
    }

    /// Session established
    pub fn is_network_joined(&self) -> bool {
        self.params.network_joined
    }

    /// Force the joined flag
    pub fn set_network_joined(&mut self, joined: bool) {
        self.params.network_joined = joined;
    }

    /// Device address
    pub fn dev_addr(&self) -> DevAddr {
        self.params.dev_addr
    }

    /// Enable or disable ADR
    pub fn set_adr(&mut self, enabled: bool) {
        self.params.adr_on = enabled;
    }

    /// ADR enabled
    pub fn adr(&self) -> bool {
        self.params.adr_on
    }

    /// Set the uplink datarate
    pub fn set_datarate(&mut self, datarate: u8) -> Result<(), MacError> {
        if !self.phy.verify_datarate(datarate) {
            return Err(MacError::ParameterInvalid);
        }
        self.params.datarate = datarate;
        Ok(())
    }

    /// Uplink datarate
    pub fn datarate(&self) -> u8 {
        self.params.datarate
    }

    /// Set the TX power index
    pub fn set_tx_power(&mut self, tx_power: u8) -> Result<(), MacError> {
        if !self.phy.verify_tx_power(tx_power) {
            return Err(MacError::ParameterInvalid);
        }
        self.params.tx_power = tx_power;
        Ok(())
    }

    /// TX power index
    pub fn tx_power(&self) -> u8 {
        self.params.tx_power
    }

    /// Set the RX2 channel
    pub fn set_rx2_channel(&mut self, frequency: u32, datarate: u8) -> Result<(), MacError> {
        if !self.phy.verify_frequency(frequency)
            || datarate > self.phy.get_phy_params(PhyParam::MaxRxDatarate) as u8
        {
            return Err(MacError::ParameterInvalid);
        }
        self.params.rx2_frequency = frequency;
        self.params.rx2_datarate = datarate;
        if self.params.device_class == DeviceClass::C && self.state.is_idle() {
            self.open_continuous_rx2_window();
        }
        Ok(())
    }

    /// Set the next uplink counter
    pub fn set_uplink_counter(&mut self, counter: u32) {
        self.params.uplink_counter = counter;
    }

    /// Next uplink counter
    pub fn uplink_counter(&self) -> u32 {
        self.params.uplink_counter
    }

    /// Set the last accepted downlink counter
    pub fn set_downlink_counter(&mut self, counter: u32) {
        self.params.downlink_counter = counter;
    }

    /// Last accepted downlink counter
    pub fn downlink_counter(&self) -> u32 {
        self.params.downlink_counter
    }

    /// Enable or disable duty-cycle enforcement (test setups only)
    pub fn set_duty_cycle_on(&mut self, enabled: bool) {
        self.config.duty_cycle_on = enabled;
    }

    fn add_mac_command(&mut self, cid: CommandIdentifier, params: &[u8]) {
        if let Err(e) = self.commands.add(cid, params) {
            warn!("MAC answer {:?} dropped: {:?}", cid, e);
        }
    }

    fn push_mlme_indication(&mut self, indication: MlmeIndication) {
        if self.mlme_indications.push(indication).is_err() {
            warn!("MLME indication {:?} dropped", indication.indication);
            return;
        }
        self.flags.mlme_ind = true;
    }

    /// Restart the state check as soon as possible
    fn trigger_mac_state_check(&mut self) {
        self.timers.stop(TimerId::MacStateCheck);
        self.timers.start_with(TimerId::MacStateCheck, 1);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lorawan::primitives::McpsIndication;
    use crate::lorawan::region::EU868;
    use crate::radio::traits::{Radio, RxConfig, TxConfig};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::vec::Vec as StdVec;

    pub const DEV_ADDR: DevAddr = 0x0102_0304;
    pub const NWK_SKEY: AESKey = [0x2B; 16];
    pub const APP_SKEY: AESKey = [0x3C; 16];

    #[derive(Default)]
    pub struct RadioLog {
        pub sent: StdVec<StdVec<u8>>,
        pub tx_configs: StdVec<TxConfig>,
        pub rx_configs: StdVec<RxConfig>,
        pub receives: StdVec<u32>,
    }

    #[derive(Clone, Default)]
    pub struct TestRadio(pub Rc<RefCell<RadioLog>>);

    impl Radio for TestRadio {
        type Error = ();

        fn configure_tx(&mut self, config: TxConfig) -> Result<(), ()> {
            self.0.borrow_mut().tx_configs.push(config);
            Ok(())
        }

        fn configure_rx(&mut self, config: RxConfig) -> Result<(), ()> {
            self.0.borrow_mut().rx_configs.push(config);
            Ok(())
        }

        fn send(&mut self, buffer: &[u8]) -> Result<(), ()> {
            self.0.borrow_mut().sent.push(buffer.to_vec());
            Ok(())
        }

        fn receive(&mut self, timeout_ms: u32) -> Result<(), ()> {
            self.0.borrow_mut().receives.push(timeout_ms);
            Ok(())
        }

        fn sleep(&mut self) -> Result<(), ()> {
            Ok(())
        }

        fn standby(&mut self) -> Result<(), ()> {
            Ok(())
        }

        fn random(&mut self) -> u32 {
            0
        }

        fn set_public_network(&mut self, _public: bool) -> Result<(), ()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    pub struct TestClock(pub Rc<Cell<TimerTime>>);

    impl Clock for TestClock {
        fn now_ms(&self) -> TimerTime {
            self.0.get()
        }
    }

    #[derive(Default)]
    pub struct Recorded {
        pub mcps_confirms: StdVec<McpsConfirm>,
        pub mcps_indications: StdVec<McpsIndication>,
        pub mlme_confirms: StdVec<MlmeConfirm>,
        pub mlme_indications: StdVec<MlmeIndication>,
    }

    impl MacPrimitives for Recorded {
        fn mcps_confirm(&mut self, confirm: &McpsConfirm) {
            self.mcps_confirms.push(*confirm);
        }

        fn mcps_indication(&mut self, indication: &McpsIndication) {
            self.mcps_indications.push(indication.clone());
        }

        fn mlme_confirm(&mut self, confirm: &MlmeConfirm) {
            self.mlme_confirms.push(*confirm);
        }

        fn mlme_indication(&mut self, indication: &MlmeIndication) {
            self.mlme_indications.push(*indication);
        }
    }

    pub type TestMac = LoRaMac<EU868<TestRadio>, TestClock, Recorded>;

    pub fn abp_mac() -> (TestMac, Rc<RefCell<RadioLog>>, TestClock) {
        let radio = TestRadio::default();
        let log = radio.0.clone();
        let clock = TestClock::default();
        let device = DeviceConfig::new_abp([1; 8], [2; 8], 0, DEV_ADDR, NWK_SKEY, APP_SKEY);
        let mac = LoRaMac::new(
            EU868::new(radio),
            clock.clone(),
            Recorded::default(),
            device,
            MacConfig::default(),
            ClassBConfig::default(),
        );
        (mac, log, clock)
    }

    #[test]
    fn mac_state_bits() {
        let mut state = MacState::IDLE;
        assert!(state.is_idle());
        state.insert(MacState::TX_RUNNING);
        state.insert(MacState::ACK_REQ);
        assert!(state.contains(MacState::TX_RUNNING));
        assert!(!state.contains(MacState::RX));
        state.remove(MacState::TX_RUNNING);
        assert_eq!(state, MacState::ACK_REQ);
        state.remove(MacState::ACK_REQ);
        assert!(state.is_idle());
    }

    #[test]
    fn abp_configuration_is_activated() {
        let (mac, _, _) = abp_mac();
        assert!(mac.is_network_joined());
        assert_eq!(mac.dev_addr(), DEV_ADDR);
        assert_eq!(mac.params().activation, ActivationState::ABPActivated);
    }

    #[test]
    fn invalid_port_is_refused() {
        let (mut mac, log, _) = abp_mac();
        let request = McpsRequest::Unconfirmed {
            port: 0,
            payload: &[1],
            datarate: 0,
        };
        assert_eq!(mac.mcps_request(request), Err(MacError::ParameterInvalid));
        assert!(log.borrow().sent.is_empty());
    }

    #[test]
    fn multicast_link_is_refused_while_transmitting() {
        let (mut mac, _, _) = abp_mac();
        mac.mcps_request(McpsRequest::Unconfirmed {
            port: 1,
            payload: &[1],
            datarate: 0,
        })
        .unwrap();
        let channel = MulticastChannel::new(0x1111_2222, [0; 16], [0; 16]);
        assert_eq!(mac.multicast_channel_link(channel), Err(MacError::Busy));
        assert_eq!(mac.multicast_channel_unlink(0x1111_2222), Err(MacError::Busy));
        assert!(mac.multicast_channels().is_empty());
    }
}
