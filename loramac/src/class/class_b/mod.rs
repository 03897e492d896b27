//! LoRaWAN Class B Implementation
//!
//! This module implements LoRaWAN Class B functionality including:
//! - Beacon acquisition and tracking
//! - Ping slot timing and randomization
//! - Network time synchronization from beacons
//! - Beacon loss detection and recovery
//!
//! [`ClassB`] owns no radio or timer. Everything it needs from the MAC goes
//! through [`ClassBHost`], and every entry point is driven by the MAC engine
//! from its event loop. Class A activity takes precedence: the MAC pauses
//! Class B before transmitting and resumes it once the cycle is over.

pub mod beacon;
pub mod ping_slot;
pub mod timing;

use log::{debug, info, warn};

use crate::config::device::{ClassBConfig, DevAddr};
use crate::lorawan::mac::MacError;
use crate::lorawan::phy::{PhyParam, RxConfigParams, RxSlot};
use crate::timer::{TimerId, TimerTime};

use self::beacon::{parse_beacon_frame, BeaconContext, BeaconError, BeaconFrame, BeaconFrameLayout, BeaconInfo};
use self::ping_slot::{compute_ping_slot_time, PingSlot, PingSlotContext, PING_SLOTS};
use self::timing::{beacon_period_start, next_beacon_time, BEACON_INTERVAL_MS};

/// Class B operational status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperStatus {
    /// [`ClassB::initialize`] was called
    pub initialized: bool,
    /// Beacon tracking running
    pub beacon_on: bool,
    /// Beacon acquisition in progress
    pub beacon_acquisition: bool,
    /// At least one beacon received since tracking started
    pub beacon_found: bool,
    /// Ping slots running
    pub ping_on: bool,
    /// Class A activity in progress
    pub paused: bool,
    /// Beacon window open
    pub beacon_rx: bool,
    /// Ping slot window open
    pub ping_rx: bool,
    /// A miss happened while paused and is reported on resume
    pub beacon_miss_pending: bool,
}

/// Beacon event reported to the MAC
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconStatus {
    /// First beacon received during acquisition
    AcquisitionSuccess,
    /// Acquisition ended without a beacon
    AcquisitionFailed,
    /// Beacon received while tracking
    Lock,
    /// Expected beacon not received
    Miss,
    /// Too many consecutive misses, Class B stopped
    Lost,
}

/// MAC services used by Class B
pub trait ClassBHost {
    /// Open a receive window; `false` when the radio is busy
    fn open_rx_window(&mut self, params: &RxConfigParams) -> bool;

    /// Abort the window of `slot`
    fn close_rx_window(&mut self, slot: RxSlot);

    /// Beacon event for the application
    fn beacon_event(&mut self, status: BeaconStatus, beacon: Option<&BeaconInfo>);

    /// Regional beacon window, `None` without Class B support
    fn beacon_win_params(&self) -> Option<RxConfigParams>;

    /// Regional ping slot window, `None` without Class B support
    fn ping_win_params(&self, datarate: u8, frequency: u32) -> Option<RxConfigParams>;

    /// Scalar regional parameter
    fn phy_param(&self, param: PhyParam) -> u32;

    /// Arm `timer` to fire in `delay_ms`
    fn start_timer(&mut self, timer: TimerId, delay_ms: u32);

    /// Disarm `timer`
    fn stop_timer(&mut self, timer: TimerId);

    /// Device time
    fn current_time(&self) -> TimerTime;

    /// GPS time in milliseconds, zero while unknown
    fn gps_time(&self) -> TimerTime;

    /// Synchronize GPS time
    fn set_gps_time(&mut self, gps_ms: TimerTime);
}

fn clamp_delay(delay: TimerTime) -> u32 {
    u32::try_from(delay).unwrap_or(u32::MAX)
}

/// Class B state machine
#[derive(Debug, Clone)]
pub struct ClassB {
    config: ClassBConfig,
    status: OperStatus,
    beacon: BeaconContext,
    ping: PingSlotContext,
    dev_addr: DevAddr,
    /// Beacon window currently or last opened
    beacon_window: Option<RxConfigParams>,
    /// Device time of the current beacon period start
    period_start: Option<TimerTime>,
}

impl ClassB {
    /// Uninitialized Class B
    pub fn new(config: ClassBConfig) -> Self {
        let layout = BeaconFrameLayout {
            rfu1_size: 0,
            rfu2_size: 0,
        };
        Self {
            beacon: BeaconContext::new(layout, config.beacon_expansion),
            ping: PingSlotContext::new(config.ping_slot_periodicity, config.ping_expansion),
            config,
            status: OperStatus::default(),
            dev_addr: 0,
            beacon_window: None,
            period_start: None,
        }
    }

    /// Bind to the device address and the regional beacon layout
    pub fn initialize(&mut self, dev_addr: DevAddr, layout: BeaconFrameLayout) {
        self.beacon = BeaconContext::new(layout, self.config.beacon_expansion);
        self.ping = PingSlotContext::new(self.config.ping_slot_periodicity, self.config.ping_expansion);
        self.status = OperStatus {
            initialized: true,
            ..OperStatus::default()
        };
        self.beacon_window = None;
        self.period_start = None;
        self.set_device_address(dev_addr);
    }

    /// Update the unicast ping slot owner after activation
    pub fn set_device_address(&mut self, dev_addr: DevAddr) {
        self.dev_addr = dev_addr;
        match self.ping.slots[0].as_mut() {
            Some(slot) => slot.address = dev_addr,
            None => self.ping.slots[0] = Some(PingSlot::new(dev_addr)),
        }
    }

    /// Operational status
    pub fn status(&self) -> &OperStatus {
        &self.status
    }

    /// Beacon tracking state
    pub fn beacon_context(&self) -> &BeaconContext {
        &self.beacon
    }

    /// Ping slot state
    pub fn ping_context(&self) -> &PingSlotContext {
        &self.ping
    }

    /// Last received beacon
    pub fn last_beacon(&self) -> Option<&BeaconInfo> {
        self.beacon.last_beacon.as_ref()
    }

    /// Ping slot periodicity
    pub fn ping_slot_periodicity(&self) -> u8 {
        self.ping.periodicity
    }

    /// Start searching for the beacon
    ///
    /// With a known GPS time the window is scheduled on the next beacon
    /// boundary, otherwise a continuous window is opened at once. The search
    /// gives up after the configured number of beacon intervals.
    pub fn enable_beacon_acquisition<H: ClassBHost>(&mut self, host: &mut H) -> Result<(), MacError> {
        if !self.status.initialized {
            return Err(MacError::NotInitialized);
        }
        if host.beacon_win_params().is_none() {
            return Err(MacError::NoOp);
        }

        self.status.beacon_on = true;
        self.status.beacon_acquisition = true;
        self.status.beacon_found = false;
        self.beacon.missed = 0;
        self.beacon.expansion.reset();
        self.ping.expansion.reset();

        let trials = TimerTime::from(self.config.beacon_acquisition_nb_trials.max(1));
        host.stop_timer(TimerId::BeaconAcquisition);
        host.start_timer(TimerId::BeaconAcquisition, clamp_delay(trials * BEACON_INTERVAL_MS));

        let gps = host.gps_time();
        if gps != 0 {
            self.beacon.next_beacon_gps = next_beacon_time(gps);
            self.schedule_beacon_window(host);
        } else if let Some(at) = self.beacon.announced_beacon.take() {
            let delay = at
                .saturating_sub(host.current_time())
                .saturating_sub(TimerTime::from(self.beacon.expansion.movement_ms));
            host.start_timer(TimerId::BeaconWindow, clamp_delay(delay));
        } else {
            self.open_continuous_search(host);
        }
        debug!("beacon acquisition started, gps {}", gps);
        Ok(())
    }

    /// Stop a running search
    pub fn disable_beacon_acquisition<H: ClassBHost>(&mut self, host: &mut H) {
        host.stop_timer(TimerId::BeaconAcquisition);
        self.status.beacon_acquisition = false;
        if !self.status.beacon_found {
            host.stop_timer(TimerId::BeaconWindow);
            self.close_beacon_window(host);
            self.status.beacon_on = false;
        }
    }

    fn open_continuous_search<H: ClassBHost>(&mut self, host: &mut H) -> bool {
        if self.status.paused || self.status.beacon_rx {
            return false;
        }
        let Some(mut params) = host.beacon_win_params() else {
            return false;
        };
        params.rx_continuous = true;
        if self.beacon.frequency != 0 {
            params.frequency = self.beacon.frequency;
        }
        if host.open_rx_window(&params) {
            self.status.beacon_rx = true;
            self.beacon_window = Some(params);
            true
        } else {
            false
        }
    }

    fn close_beacon_window<H: ClassBHost>(&mut self, host: &mut H) {
        if self.status.beacon_rx {
            host.close_rx_window(RxSlot::Beacon);
            self.status.beacon_rx = false;
        }
    }

    /// Arm the beacon window timer for the next expected beacon
    pub fn schedule_beacon_window<H: ClassBHost>(&mut self, host: &mut H) {
        if !self.status.beacon_on {
            return;
        }
        let gps = host.gps_time();
        if gps == 0 {
            return;
        }
        let expected = match self.beacon.next_beacon_gps {
            0 => next_beacon_time(gps),
            expected => timing::advance_beacon_time(expected, gps),
        };
        self.beacon.next_beacon_gps = expected;
        let delay = (expected - gps).saturating_sub(TimerTime::from(self.beacon.expansion.movement_ms));
        host.start_timer(TimerId::BeaconWindow, clamp_delay(delay));
        debug!("beacon window in {} ms", delay);
    }

    /// Beacon window timer expired
    pub fn open_beacon_window<H: ClassBHost>(&mut self, host: &mut H) {
        if !self.status.beacon_on {
            return;
        }
        if self.status.paused {
            debug!("beacon window skipped, class A active");
            self.handle_beacon_miss(host);
            return;
        }
        let Some(mut params) = host.beacon_win_params() else {
            return;
        };
        params.window_timeout = self.beacon.expansion.timeout_for(params.window_timeout);
        if self.beacon.frequency != 0 {
            params.frequency = self.beacon.frequency;
        }
        if host.open_rx_window(&params) {
            self.status.beacon_rx = true;
            self.beacon_window = Some(params);
        } else {
            warn!("beacon window could not be opened");
            self.handle_beacon_miss(host);
        }
    }

    /// Validate a received beacon frame
    pub fn process_beacon_frame(&self, payload: &[u8]) -> Result<BeaconFrame, BeaconError> {
        parse_beacon_frame(payload, &self.beacon.layout)
    }

    /// Frame received in the beacon window at device time `timestamp`
    pub fn handle_beacon_rx<H: ClassBHost>(
        &mut self,
        host: &mut H,
        payload: &[u8],
        rssi: i16,
        snr: i8,
        timestamp: TimerTime,
    ) {
        self.status.beacon_rx = false;
        let frame = match self.process_beacon_frame(payload) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("beacon rejected: {:?}", err);
                self.handle_beacon_miss(host);
                return;
            }
        };

        let (frequency, datarate) = match self.beacon_window {
            Some(params) => (params.frequency, params.datarate),
            None => (
                host.phy_param(PhyParam::BeaconFrequency),
                host.phy_param(PhyParam::BeaconDatarate) as u8,
            ),
        };
        let info = BeaconInfo {
            time: frame.time,
            gw_specific: frame.gw_specific,
            rssi,
            snr,
            frequency,
            datarate,
        };

        let elapsed = host.current_time().saturating_sub(timestamp);
        let gps = self.beacon.on_beacon(info, elapsed);
        host.set_gps_time(gps);
        self.ping.expansion.reset();

        let first = !self.status.beacon_found;
        self.status.beacon_found = true;
        if self.status.beacon_acquisition {
            self.status.beacon_acquisition = false;
            host.stop_timer(TimerId::BeaconAcquisition);
        }
        if first {
            info!("beacon acquired, time {}", frame.time);
            host.beacon_event(BeaconStatus::AcquisitionSuccess, Some(&info));
        } else {
            debug!("beacon locked, time {}", frame.time);
            host.beacon_event(BeaconStatus::Lock, Some(&info));
        }

        self.schedule_beacon_window(host);
        if self.status.ping_on {
            self.compute_ping_offset(host);
            self.compute_ping_slot(host);
            self.schedule_ping_slot(host);
        }
    }

    /// Beacon window closed without a valid beacon
    pub fn handle_beacon_miss<H: ClassBHost>(&mut self, host: &mut H) {
        self.status.beacon_rx = false;

        if self.status.beacon_acquisition && !self.status.beacon_found {
            self.expand_window();
            if host.gps_time() == 0 {
                self.open_continuous_search(host);
            } else {
                self.beacon.on_miss();
                self.schedule_beacon_window(host);
            }
            return;
        }

        self.beacon.on_miss();
        self.expand_window();
        if self.beacon.missed >= self.config.max_missed_beacons {
            warn!("beacon lost after {} misses", self.beacon.missed);
            self.stop(host);
            host.beacon_event(BeaconStatus::Lost, None);
            return;
        }

        if self.status.paused {
            self.status.beacon_miss_pending = true;
        } else {
            host.beacon_event(BeaconStatus::Miss, None);
        }
        self.schedule_beacon_window(host);
        if self.status.ping_on {
            self.compute_ping_offset(host);
            self.compute_ping_slot(host);
            self.schedule_ping_slot(host);
        }
    }

    /// Acquisition timer expired
    pub fn handle_acquisition_timeout<H: ClassBHost>(&mut self, host: &mut H) {
        if !self.status.beacon_acquisition {
            return;
        }
        self.status.beacon_acquisition = false;
        if self.status.beacon_found {
            return;
        }
        host.stop_timer(TimerId::BeaconWindow);
        self.close_beacon_window(host);
        self.status.beacon_on = false;
        warn!("beacon acquisition failed");
        host.beacon_event(BeaconStatus::AcquisitionFailed, None);
    }

    /// Widen beacon and ping windows after a miss
    pub fn expand_window(&mut self) {
        self.beacon.expansion.expand();
        self.ping.expansion.expand();
    }

    /// Ping offsets for the current beacon period
    pub fn compute_ping_offset<H: ClassBHost>(&mut self, host: &mut H) {
        let gps = host.gps_time();
        if gps == 0 {
            return;
        }
        let beacon_time = (beacon_period_start(gps) / 1_000) as u32;
        let periodicity = self.ping.periodicity;
        for slot in self.ping.slots.iter_mut().flatten() {
            match ping_slot::compute_ping_offset(beacon_time, slot.address, periodicity) {
                Ok(offset) => slot.offset = offset,
                Err(err) => {
                    warn!("ping offset for {:08x} failed: {:?}", slot.address, err);
                    slot.next_slot_time = None;
                }
            }
        }
    }

    /// Next slot time of every ping slot owner
    pub fn compute_ping_slot<H: ClassBHost>(&mut self, host: &mut H) {
        self.ping.clear_schedule();
        let gps = host.gps_time();
        if gps == 0 {
            self.period_start = None;
            return;
        }
        let now = host.current_time();
        let into_period = gps - beacon_period_start(gps);
        let start = now.saturating_sub(into_period);
        self.period_start = Some(start);

        let movement = TimerTime::from(self.ping.expansion.movement_ms);
        let datarate = self
            .ping
            .datarate
            .unwrap_or(host.phy_param(PhyParam::PingSlotDatarate) as u8);
        let frequency = match self.ping.frequency {
            0 => host.phy_param(PhyParam::PingSlotFrequency),
            frequency => frequency,
        };
        let Some(mut params) = host.ping_win_params(datarate, frequency) else {
            return;
        };
        params.window_timeout = self.ping.expansion.timeout_for(params.window_timeout);

        let periodicity = self.ping.periodicity;
        for slot in self.ping.slots.iter_mut().flatten() {
            slot.next_slot_time = compute_ping_slot_time(start, now + movement, slot.offset, periodicity);
            slot.rx_config = slot.next_slot_time.map(|_| params);
        }
    }

    /// Arm the ping slot timer for the earliest slot
    pub fn schedule_ping_slot<H: ClassBHost>(&mut self, host: &mut H) {
        host.stop_timer(TimerId::PingSlot);
        if !self.status.ping_on || !self.status.beacon_found {
            self.ping.slot_idx = None;
            return;
        }
        match self.ping.earliest() {
            Some((idx, time)) => {
                self.ping.slot_idx = Some(idx);
                let movement = TimerTime::from(self.ping.expansion.movement_ms);
                let delay = time.saturating_sub(host.current_time() + movement);
                host.start_timer(TimerId::PingSlot, clamp_delay(delay));
            }
            None => self.ping.slot_idx = None,
        }
    }

    /// Ping slot timer expired
    pub fn open_ping_slot<H: ClassBHost>(&mut self, host: &mut H) {
        let Some(idx) = self.ping.slot_idx else {
            return;
        };
        let params = self.ping.slots[idx].and_then(|slot| slot.rx_config);
        let opened = match params {
            Some(params) if !self.status.paused && !self.status.beacon_rx => host.open_rx_window(&params),
            _ => false,
        };
        if opened {
            self.status.ping_rx = true;
        } else {
            debug!("ping slot {} skipped", idx);
            self.advance_ping_slot(idx);
            self.schedule_ping_slot(host);
        }
    }

    /// Ping slot window closed after a reception
    pub fn handle_ping_rx_done<H: ClassBHost>(&mut self, host: &mut H) {
        self.finish_ping_slot(host);
    }

    /// Ping slot window closed without a frame
    pub fn handle_ping_rx_timeout<H: ClassBHost>(&mut self, host: &mut H) {
        self.finish_ping_slot(host);
    }

    fn finish_ping_slot<H: ClassBHost>(&mut self, host: &mut H) {
        self.status.ping_rx = false;
        if let Some(idx) = self.ping.slot_idx {
            self.advance_ping_slot(idx);
        }
        self.schedule_ping_slot(host);
    }

    fn advance_ping_slot(&mut self, idx: usize) {
        let periodicity = self.ping.periodicity;
        let start = self.period_start;
        if let Some(slot) = self.ping.slots[idx].as_mut() {
            slot.next_slot_time = match (start, slot.next_slot_time) {
                (Some(start), Some(last)) => compute_ping_slot_time(start, last + 1, slot.offset, periodicity),
                _ => None,
            };
            if slot.next_slot_time.is_none() {
                slot.rx_config = None;
            }
        }
    }

    /// Start ping slots
    pub fn enable<H: ClassBHost>(&mut self, host: &mut H) -> Result<(), MacError> {
        if !self.status.initialized {
            return Err(MacError::NotInitialized);
        }
        if !self.status.beacon_found {
            return Err(MacError::NoBeaconFound);
        }
        self.status.ping_on = true;
        self.compute_ping_offset(host);
        self.compute_ping_slot(host);
        self.schedule_ping_slot(host);
        info!("class B ping slots enabled, periodicity {}", self.ping.periodicity);
        Ok(())
    }

    /// Stop ping slots and beacon tracking
    pub fn disable<H: ClassBHost>(&mut self, host: &mut H) {
        self.stop(host);
        debug!("class B disabled");
    }

    fn stop<H: ClassBHost>(&mut self, host: &mut H) {
        host.stop_timer(TimerId::BeaconWindow);
        host.stop_timer(TimerId::BeaconAcquisition);
        host.stop_timer(TimerId::PingSlot);
        self.close_beacon_window(host);
        if self.status.ping_rx {
            host.close_rx_window(RxSlot::PingSlot);
            self.status.ping_rx = false;
        }
        self.ping.clear_schedule();
        self.status = OperStatus {
            initialized: self.status.initialized,
            paused: self.status.paused,
            ..OperStatus::default()
        };
        self.beacon.missed = 0;
        self.beacon.next_beacon_gps = 0;
    }

    /// Hand the radio to Class A
    pub fn pause<H: ClassBHost>(&mut self, host: &mut H) {
        if self.status.paused {
            return;
        }
        self.status.paused = true;
        if self.status.ping_rx {
            host.close_rx_window(RxSlot::PingSlot);
            self.finish_ping_slot(host);
        }
        if self.status.beacon_rx {
            host.close_rx_window(RxSlot::Beacon);
            self.status.beacon_rx = false;
            if !self.status.beacon_acquisition || self.status.beacon_found {
                self.handle_beacon_miss(host);
            }
        }
    }

    /// Take the radio back after Class A
    pub fn resume<H: ClassBHost>(&mut self, host: &mut H) {
        if !self.status.paused {
            return;
        }
        self.status.paused = false;
        if self.status.beacon_miss_pending {
            self.status.beacon_miss_pending = false;
            host.beacon_event(BeaconStatus::Miss, None);
        }
        if self.status.beacon_acquisition && host.gps_time() == 0 {
            self.open_continuous_search(host);
        } else if self.status.beacon_on {
            self.schedule_beacon_window(host);
        }
        if self.status.ping_on {
            self.schedule_ping_slot(host);
        }
    }

    /// Give a multicast group a ping slot
    pub fn add_multicast_address<H: ClassBHost>(&mut self, host: &mut H, address: DevAddr) -> Result<(), MacError> {
        if self.ping.position(address).is_some() {
            return Err(MacError::ParameterInvalid);
        }
        let idx = (1..PING_SLOTS)
            .find(|&idx| self.ping.slots[idx].is_none())
            .ok_or(MacError::BufferFull)?;
        self.ping.slots[idx] = Some(PingSlot::new(address));
        if self.status.ping_on {
            self.compute_ping_offset(host);
            self.compute_ping_slot(host);
            self.schedule_ping_slot(host);
        }
        Ok(())
    }

    /// Release the ping slot of a multicast group
    pub fn remove_multicast_address<H: ClassBHost>(&mut self, host: &mut H, address: DevAddr) -> Result<(), MacError> {
        let idx = match self.ping.position(address) {
            Some(idx) if idx > 0 => idx,
            _ => return Err(MacError::ParameterInvalid),
        };
        self.ping.slots[idx] = None;
        if self.ping.slot_idx == Some(idx) {
            if self.status.ping_rx {
                host.close_rx_window(RxSlot::PingSlot);
                self.status.ping_rx = false;
            }
            self.schedule_ping_slot(host);
        }
        Ok(())
    }

    /// Change the ping slot periodicity (0-7)
    pub fn set_ping_slot_periodicity<H: ClassBHost>(&mut self, host: &mut H, periodicity: u8) {
        self.ping.periodicity = periodicity.min(timing::MAX_PING_SLOT_PERIODICITY);
        if self.status.ping_on {
            self.compute_ping_offset(host);
            self.compute_ping_slot(host);
            self.schedule_ping_slot(host);
        }
    }

    /// Ping slot channel from PingSlotChannelReq, zero frequency for the default
    pub fn set_ping_slot_channel(&mut self, datarate: u8, frequency: u32) {
        self.ping.datarate = Some(datarate);
        self.ping.frequency = frequency;
    }

    /// Beacon frequency from BeaconFreqReq, zero for the default
    pub fn set_beacon_frequency(&mut self, frequency: u32) {
        self.beacon.frequency = frequency;
    }

    /// Next beacon announced by BeaconTimingAns
    ///
    /// `delay` counts 30 ms steps from `now`.
    pub fn beacon_timing_ans(&mut self, now: TimerTime, delay: u16, channel: u8) {
        let at = now + TimerTime::from(delay) * timing::PING_SLOT_WINDOW_MS;
        debug!("next beacon at {} on channel {}", at, channel);
        self.beacon.announced_beacon = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::beacon::beacon_crc;
    use super::*;
    use heapless::Vec;

    const LAYOUT: BeaconFrameLayout = BeaconFrameLayout {
        rfu1_size: 2,
        rfu2_size: 0,
    };

    struct TestHost {
        now: TimerTime,
        gps_offset: Option<i64>,
        accept: bool,
        opened: Vec<RxConfigParams, 16>,
        closed: Vec<RxSlot, 16>,
        events: Vec<BeaconStatus, 64>,
        timers: [Option<u32>; TimerId::COUNT],
    }

    impl TestHost {
        fn new() -> Self {
            Self {
                now: 10_000,
                gps_offset: None,
                accept: true,
                opened: Vec::new(),
                closed: Vec::new(),
                events: Vec::new(),
                timers: [None; TimerId::COUNT],
            }
        }

        fn timer(&self, timer: TimerId) -> Option<u32> {
            self.timers[timer as usize]
        }
    }

    impl ClassBHost for TestHost {
        fn open_rx_window(&mut self, params: &RxConfigParams) -> bool {
            if self.accept {
                self.opened.push(*params).unwrap();
            }
            self.accept
        }

        fn close_rx_window(&mut self, slot: RxSlot) {
            self.closed.push(slot).unwrap();
        }

        fn beacon_event(&mut self, status: BeaconStatus, _beacon: Option<&BeaconInfo>) {
            self.events.push(status).unwrap();
        }

        fn beacon_win_params(&self) -> Option<RxConfigParams> {
            Some(RxConfigParams {
                channel: 0,
                frequency: 869_525_000,
                datarate: 3,
                bandwidth: 125_000,
                window_timeout: 8,
                window_offset: 0,
                rx_continuous: false,
                rx_slot: RxSlot::Beacon,
            })
        }

        fn ping_win_params(&self, datarate: u8, frequency: u32) -> Option<RxConfigParams> {
            Some(RxConfigParams {
                channel: 0,
                frequency,
                datarate,
                bandwidth: 125_000,
                window_timeout: 8,
                window_offset: 0,
                rx_continuous: false,
                rx_slot: RxSlot::PingSlot,
            })
        }

        fn phy_param(&self, param: PhyParam) -> u32 {
            match param {
                PhyParam::PingSlotFrequency | PhyParam::BeaconFrequency => 869_525_000,
                PhyParam::PingSlotDatarate | PhyParam::BeaconDatarate => 3,
                _ => 0,
            }
        }

        fn start_timer(&mut self, timer: TimerId, delay_ms: u32) {
            self.timers[timer as usize] = Some(delay_ms);
        }

        fn stop_timer(&mut self, timer: TimerId) {
            self.timers[timer as usize] = None;
        }

        fn current_time(&self) -> TimerTime {
            self.now
        }

        fn gps_time(&self) -> TimerTime {
            self.gps_offset
                .map(|offset| (self.now as i64 + offset) as TimerTime)
                .unwrap_or(0)
        }

        fn set_gps_time(&mut self, gps_ms: TimerTime) {
            self.gps_offset = Some(gps_ms as i64 - self.now as i64);
        }
    }

    fn beacon_frame(time: u32) -> [u8; 17] {
        let mut frame = [0u8; 17];
        frame[2..6].copy_from_slice(&time.to_le_bytes());
        let crc1 = beacon_crc(&frame[..6]);
        frame[6..8].copy_from_slice(&crc1.to_le_bytes());
        let crc2 = beacon_crc(&frame[8..15]);
        frame[15..17].copy_from_slice(&crc2.to_le_bytes());
        frame
    }

    fn class_b() -> ClassB {
        let mut class_b = ClassB::new(ClassBConfig::default());
        class_b.initialize(0x2601_1234, LAYOUT);
        class_b
    }

    fn locked(host: &mut TestHost) -> ClassB {
        let mut class_b = class_b();
        class_b.enable_beacon_acquisition(host).unwrap();
        let now = host.now;
        class_b.handle_beacon_rx(host, &beacon_frame(1_280), -90, 5, now);
        class_b
    }

    #[test]
    fn acquisition_requires_initialization() {
        let mut host = TestHost::new();
        let mut class_b = ClassB::new(ClassBConfig::default());
        assert_eq!(class_b.enable_beacon_acquisition(&mut host), Err(MacError::NotInitialized));
        assert_eq!(class_b.enable(&mut host), Err(MacError::NotInitialized));
        assert!(host.opened.is_empty());
    }

    #[test]
    fn acquisition_without_gps_time_searches_continuously() {
        let mut host = TestHost::new();
        let mut class_b = class_b();
        class_b.enable_beacon_acquisition(&mut host).unwrap();

        assert_eq!(host.opened.len(), 1);
        assert!(host.opened[0].rx_continuous);
        assert_eq!(host.timer(TimerId::BeaconAcquisition), Some(256_000));
        assert!(class_b.status().beacon_rx);
    }

    #[test]
    fn first_beacon_acquires_then_locks() {
        let mut host = TestHost::new();
        let mut class_b = locked(&mut host);

        assert_eq!(host.events.as_slice(), &[BeaconStatus::AcquisitionSuccess]);
        assert_eq!(host.gps_time(), 1_280_000);
        assert_eq!(host.timer(TimerId::BeaconAcquisition), None);
        // Next beacon 128 s later, window opened 2 ms early
        assert_eq!(host.timer(TimerId::BeaconWindow), Some(127_998));
        assert!(class_b.status().beacon_found);

        host.now += 128_000;
        class_b.open_beacon_window(&mut host);
        assert_eq!(host.opened.len(), 2);
        assert!(!host.opened[1].rx_continuous);
        let now = host.now;
        class_b.handle_beacon_rx(&mut host, &beacon_frame(1_408), -90, 5, now);
        assert_eq!(host.events.last(), Some(&BeaconStatus::Lock));
    }

    #[test]
    fn acquisition_timeout_reports_failure() {
        let mut host = TestHost::new();
        let mut class_b = class_b();
        class_b.enable_beacon_acquisition(&mut host).unwrap();
        class_b.handle_acquisition_timeout(&mut host);

        assert_eq!(host.events.as_slice(), &[BeaconStatus::AcquisitionFailed]);
        assert_eq!(host.closed.as_slice(), &[RxSlot::Beacon]);
        assert!(!class_b.status().beacon_on);
    }

    #[test]
    fn corrupted_beacon_takes_the_miss_path() {
        let mut host = TestHost::new();
        let mut class_b = locked(&mut host);
        let mut frame = beacon_frame(1_408);
        frame[4] ^= 0x10;
        host.now += 128_000;
        let now = host.now;
        class_b.handle_beacon_rx(&mut host, &frame, -90, 5, now);

        assert_eq!(host.events.last(), Some(&BeaconStatus::Miss));
        assert_eq!(class_b.beacon_context().missed, 1);
        assert_eq!(class_b.beacon_context().expansion.symbol_timeout, 16);
        assert_eq!(class_b.ping_context().expansion.symbol_timeout, 16);
    }

    #[test]
    fn beacon_is_lost_after_max_misses() {
        let mut host = TestHost::new();
        let mut class_b = locked(&mut host);
        for _ in 0..ClassBConfig::default().max_missed_beacons {
            host.now += 128_000;
            class_b.handle_beacon_miss(&mut host);
        }

        assert_eq!(host.events.last(), Some(&BeaconStatus::Lost));
        let misses = host.events.iter().filter(|e| **e == BeaconStatus::Miss).count();
        assert_eq!(misses, ClassBConfig::default().max_missed_beacons as usize - 1);
        assert!(!class_b.status().beacon_on);
        assert!(!class_b.status().beacon_found);
        assert_eq!(host.timer(TimerId::BeaconWindow), None);
    }

    #[test]
    fn miss_while_paused_is_reported_on_resume() {
        let mut host = TestHost::new();
        let mut class_b = locked(&mut host);
        class_b.pause(&mut host);
        host.now += 128_000;
        class_b.open_beacon_window(&mut host);

        assert_eq!(host.opened.len(), 1);
        assert_eq!(host.events.as_slice(), &[BeaconStatus::AcquisitionSuccess]);
        assert!(class_b.status().beacon_miss_pending);

        class_b.resume(&mut host);
        assert_eq!(host.events.last(), Some(&BeaconStatus::Miss));
        assert!(!class_b.status().beacon_miss_pending);
    }

    #[test]
    fn ping_slots_need_a_beacon() {
        let mut host = TestHost::new();
        let mut class_b = class_b();
        assert_eq!(class_b.enable(&mut host), Err(MacError::NoBeaconFound));

        let mut class_b = locked(&mut host);
        class_b.enable(&mut host).unwrap();
        assert!(class_b.status().ping_on);
        assert_eq!(class_b.ping_context().slot_idx, Some(0));
        let delay = host.timer(TimerId::PingSlot).unwrap();
        // Periodicity 7: one slot after the reserved time, within the period
        assert!(delay < 128_000);

        host.now += TimerTime::from(delay) + 2;
        class_b.open_ping_slot(&mut host);
        assert_eq!(host.opened.last().map(|p| p.rx_slot), Some(RxSlot::PingSlot));
        class_b.handle_ping_rx_timeout(&mut host);
        // Single slot per period: nothing left until the next beacon
        assert_eq!(class_b.ping_context().slot_idx, None);
    }

    #[test]
    fn multicast_slots_are_bounded() {
        let mut host = TestHost::new();
        let mut class_b = locked(&mut host);
        class_b.enable(&mut host).unwrap();
        for address in 1..=ping_slot::MAX_MULTICAST_PING_SLOTS as u32 {
            class_b.add_multicast_address(&mut host, address).unwrap();
        }
        assert_eq!(class_b.add_multicast_address(&mut host, 99), Err(MacError::BufferFull));
        assert_eq!(class_b.add_multicast_address(&mut host, 1), Err(MacError::ParameterInvalid));

        class_b.remove_multicast_address(&mut host, 2).unwrap();
        assert_eq!(class_b.remove_multicast_address(&mut host, 2), Err(MacError::ParameterInvalid));
        class_b.add_multicast_address(&mut host, 99).unwrap();
    }
}
