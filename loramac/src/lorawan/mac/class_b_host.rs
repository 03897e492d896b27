//! Class B glue: the MAC side of [`ClassBHost`]

use heapless::Vec;
use log::{debug, info, warn};

use crate::class::class_b::beacon::BeaconInfo;
use crate::class::class_b::{BeaconStatus, ClassB, ClassBHost};
use crate::config::device::{DeviceClass, MacConfig};
use crate::lorawan::phy::{LoRaPhy, PhyParam, RxConfigParams, RxSlot};
use crate::lorawan::primitives::{
    EventInfoStatus, MacPrimitives, MlmeConfirm, MlmeIndication, MlmeIndicationType, MlmeType,
};
use crate::timer::{Clock, TimerId, TimerService, TimerTime};

use super::{LoRaMac, MacState};

/// Beacon events raised during one Class B call
const MAX_BEACON_NOTICES: usize = 4;

/// Borrowed view of the MAC handed to [`ClassB`]
pub(super) struct MacHost<'a, P: LoRaPhy, C: Clock> {
    phy: &'a mut P,
    timers: &'a mut TimerService<C>,
    config: &'a MacConfig,
    state: MacState,
    max_rx_window: u32,
    rx_slot: &'a mut RxSlot,
    notices: Vec<(BeaconStatus, Option<BeaconInfo>), MAX_BEACON_NOTICES>,
}

impl<P: LoRaPhy, C: Clock> ClassBHost for MacHost<'_, P, C> {
    fn open_rx_window(&mut self, params: &RxConfigParams) -> bool {
        // Class A owns the radio while a cycle runs
        if !self.state.is_idle() {
            return false;
        }
        if let Err(e) = self.phy.rx_config(params) {
            warn!("{:?} window not opened: {:?}", params.rx_slot, e);
            return false;
        }
        let timeout = if params.rx_continuous { 0 } else { self.max_rx_window };
        if let Err(e) = self.phy.handle_receive(timeout) {
            warn!("{:?} receive failed: {:?}", params.rx_slot, e);
            return false;
        }
        *self.rx_slot = params.rx_slot;
        true
    }

    fn close_rx_window(&mut self, slot: RxSlot) {
        if *self.rx_slot == slot {
            self.phy.put_radio_to_sleep();
        }
    }

    fn beacon_event(&mut self, status: BeaconStatus, beacon: Option<&BeaconInfo>) {
        if self.notices.push((status, beacon.copied())).is_err() {
            warn!("beacon event {:?} dropped", status);
        }
    }

    fn beacon_win_params(&self) -> Option<RxConfigParams> {
        self.phy
            .compute_beacon_win_params(self.config.min_rx_symbols, self.config.max_rx_error_ms)
    }

    fn ping_win_params(&self, datarate: u8, frequency: u32) -> Option<RxConfigParams> {
        self.phy.compute_ping_win_params(
            datarate,
            frequency,
            self.config.min_rx_symbols,
            self.config.max_rx_error_ms,
        )
    }

    fn phy_param(&self, param: PhyParam) -> u32 {
        self.phy.get_phy_params(param)
    }

    fn start_timer(&mut self, timer: TimerId, delay_ms: u32) {
        self.timers.start_with(timer, delay_ms);
    }

    fn stop_timer(&mut self, timer: TimerId) {
        self.timers.stop(timer);
    }

    fn current_time(&self) -> TimerTime {
        self.timers.get_current_time()
    }

    fn gps_time(&self) -> TimerTime {
        self.timers.get_gps_time()
    }

    fn set_gps_time(&mut self, gps_ms: TimerTime) {
        self.timers.set_gps_time(gps_ms);
    }
}

impl<P: LoRaPhy, C: Clock, H: MacPrimitives> LoRaMac<P, C, H> {
    /// Run `f` against the Class B state machine, then report its beacon events
    pub(super) fn with_class_b<R>(&mut self, f: impl FnOnce(&mut ClassB, &mut MacHost<'_, P, C>) -> R) -> R {
        let mut host = MacHost {
            phy: &mut self.phy,
            timers: &mut self.timers,
            config: &self.config,
            state: self.state,
            max_rx_window: self.params.max_rx_window,
            rx_slot: &mut self.rx_slot,
            notices: Vec::new(),
        };
        let result = f(&mut self.class_b, &mut host);
        let notices = host.notices;
        for (status, beacon) in notices {
            self.on_beacon_event(status, beacon);
        }
        result
    }

    /// Cancel a running beacon search
    ///
    /// A beacon already locked is kept.
    pub fn stop_beacon_acquisition(&mut self) {
        self.with_class_b(|class_b, host| class_b.disable_beacon_acquisition(host));
    }

    fn on_beacon_event(&mut self, status: BeaconStatus, beacon: Option<BeaconInfo>) {
        debug!("beacon event {:?}", status);
        match status {
            BeaconStatus::AcquisitionSuccess => {
                self.set_beacon_acquisition_confirm(EventInfoStatus::Ok);
                self.push_beacon_indication(MlmeIndicationType::Beacon, EventInfoStatus::BeaconLocked, beacon);
            }
            BeaconStatus::AcquisitionFailed => {
                self.set_beacon_acquisition_confirm(EventInfoStatus::BeaconNotFound);
            }
            BeaconStatus::Lock => {
                self.push_beacon_indication(MlmeIndicationType::Beacon, EventInfoStatus::BeaconLocked, beacon);
            }
            BeaconStatus::Miss => {
                self.push_beacon_indication(MlmeIndicationType::Beacon, EventInfoStatus::BeaconNotFound, None);
            }
            BeaconStatus::Lost => {
                self.push_beacon_indication(MlmeIndicationType::BeaconLost, EventInfoStatus::BeaconLost, None);
                if self.params.device_class == DeviceClass::B {
                    info!("beacon lost, back to class A");
                    self.params.device_class = DeviceClass::A;
                }
            }
        }
        self.trigger_mac_state_check();
    }

    fn set_beacon_acquisition_confirm(&mut self, status: EventInfoStatus) {
        self.mlme_confirm = MlmeConfirm {
            mlme_type: MlmeType::BeaconAcquisition,
            status,
            ..MlmeConfirm::default()
        };
        self.flags.mlme_req = true;
    }

    fn push_beacon_indication(&mut self, indication: MlmeIndicationType, status: EventInfoStatus, beacon: Option<BeaconInfo>) {
        self.push_mlme_indication(MlmeIndication {
            indication,
            status,
            beacon,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::abp_mac;
    use super::*;
    use crate::lorawan::primitives::MlmeRequest;

    #[test]
    fn acquisition_failure_is_confirmed() {
        let (mut mac, log, clock) = abp_mac();
        mac.mlme_request(MlmeRequest::BeaconAcquisition).unwrap();
        assert!(mac.class_b().status().beacon_acquisition);
        // Without GPS time the search runs continuously
        assert_eq!(log.borrow().receives.last(), Some(&0));

        clock.0.set(clock.0.get() + 300_000);
        mac.poll_timers();
        clock.0.set(clock.0.get() + 1);
        mac.poll_timers();

        let confirms = &mac.primitives().mlme_confirms;
        assert_eq!(confirms.len(), 1);
        assert_eq!(confirms[0].mlme_type, MlmeType::BeaconAcquisition);
        assert_eq!(confirms[0].status, EventInfoStatus::BeaconNotFound);
        assert!(!mac.class_b().status().beacon_acquisition);
    }

    #[test]
    fn beacon_search_can_be_cancelled() {
        let (mut mac, _, clock) = abp_mac();
        mac.mlme_request(MlmeRequest::BeaconAcquisition).unwrap();
        assert!(mac.class_b().status().beacon_rx);
        assert!(mac.timers().is_running(TimerId::BeaconAcquisition));

        mac.stop_beacon_acquisition();
        let status = mac.class_b().status();
        assert!(!status.beacon_acquisition);
        assert!(!status.beacon_rx);
        assert!(!status.beacon_on);
        assert!(!mac.timers().is_running(TimerId::BeaconAcquisition));
        assert!(!mac.timers().is_running(TimerId::BeaconWindow));

        clock.0.set(clock.0.get() + 300_000);
        mac.poll_timers();
        assert!(mac.primitives().mlme_confirms.is_empty());
    }

    #[test]
    fn class_b_requires_a_beacon() {
        let (mut mac, _, _) = abp_mac();
        assert_eq!(mac.set_device_class(DeviceClass::B), Err(super::super::MacError::NoBeaconFound));
        assert_eq!(mac.device_class(), DeviceClass::A);
    }

    #[test]
    fn lost_beacon_falls_back_to_class_a() {
        let (mut mac, _, clock) = abp_mac();
        mac.params.device_class = DeviceClass::B;
        mac.on_beacon_event(BeaconStatus::Lost, None);
        assert_eq!(mac.device_class(), DeviceClass::A);

        clock.0.set(clock.0.get() + 1);
        mac.poll_timers();
        let indications = &mac.primitives().mlme_indications;
        assert_eq!(indications.len(), 1);
        assert_eq!(indications[0].indication, MlmeIndicationType::BeaconLost);
    }
}
