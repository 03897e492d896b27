//! MAC state check
//!
//! Runs once the radio side of a cycle is over (and periodically while a
//! cycle is running). It decides between retransmission and completion,
//! then hands the pending primitives to the application.

use log::{debug, info};

use crate::config::device::DeviceClass;
use crate::lorawan::phy::{InitType, LoRaPhy};
use crate::lorawan::primitives::{EventInfoStatus, MacPrimitives, MlmeIndication, MlmeIndicationType, MlmeType};
use crate::timer::{Clock, TimerId};

use super::{LoRaMac, MacState};

impl<P: LoRaPhy, C: Clock, H: MacPrimitives> LoRaMac<P, C, H> {
    pub(super) fn on_mac_state_check_timer_event(&mut self) {
        self.timers.stop(TimerId::MacStateCheck);
        let cycle_done = self.flags.mac_done;

        if self.flags.mac_done {
            self.close_cycle();
        }

        if !self.params.node_ack_requested {
            self.state.remove(MacState::ACK_REQ);
        }
        self.state.remove(MacState::RX);

        if self.state.is_idle() {
            if self.flags.mcps_req {
                self.flags.mcps_req = false;
                self.primitives.mcps_confirm(&self.mcps_confirm);
            }
            if self.flags.mlme_req {
                self.flags.mlme_req = false;
                self.mlme_confirm.nb_retries = self.params.join_request_trials;
                self.primitives.mlme_confirm(&self.mlme_confirm);
            }
            if cycle_done && self.commands.is_sticky_pending() {
                self.push_mlme_indication(MlmeIndication {
                    indication: MlmeIndicationType::ScheduleUplink,
                    status: EventInfoStatus::Ok,
                    beacon: None,
                });
            }
            self.flags.mac_done = false;
            self.with_class_b(|class_b, host| class_b.resume(host));
        } else {
            self.timers
                .start_with(TimerId::MacStateCheck, self.config.mac_state_check_timeout_ms);
        }

        if self.flags.mcps_ind {
            self.flags.mcps_ind = false;
            if self.params.device_class == DeviceClass::C {
                self.open_continuous_rx2_window();
            }
            if !self.flags.mcps_ind_skip {
                self.primitives.mcps_indication(&self.mcps_indication);
            }
            self.flags.mcps_ind_skip = false;
        }

        if self.flags.mlme_ind {
            self.flags.mlme_ind = false;
            for indication in self.mlme_indications.iter() {
                self.primitives.mlme_indication(indication);
            }
            self.mlme_indications.clear();
        }
    }

    /// Retransmit or end the cycle whose radio side just finished
    fn close_cycle(&mut self) {
        let mut tx_timeout = false;

        if self.state.contains(MacState::RX_ABORT) {
            self.state.remove(MacState::RX_ABORT);
            self.state.remove(MacState::TX_RUNNING);
        }

        if (self.flags.mlme_req && self.mlme_confirm.status == EventInfoStatus::TxTimeout)
            || (self.flags.mcps_req && self.mcps_confirm.status == EventInfoStatus::TxTimeout)
        {
            self.state.remove(MacState::TX_RUNNING);
            self.commands.clear();
            self.mcps_confirm.nb_retries = self.params.ack_timeout_retries_counter;
            self.mcps_confirm.ack_received = false;
            self.mcps_confirm.tx_time_on_air = 0;
            tx_timeout = true;
        }

        if !self.params.node_ack_requested && !tx_timeout && (self.flags.mlme_req || self.flags.mcps_req) {
            if self.flags.mlme_req && self.mlme_confirm.mlme_type == MlmeType::Join {
                if self.mlme_confirm.status == EventInfoStatus::Ok {
                    self.params.uplink_counter = 0;
                    self.params.nb_rep_counter = 0;
                    self.state.remove(MacState::TX_RUNNING);
                } else if self.params.join_request_trials >= self.params.max_join_request_trials {
                    info!("join failed after {} trials", self.params.join_request_trials);
                    self.state.remove(MacState::TX_RUNNING);
                } else {
                    self.flags.mac_done = false;
                    self.on_tx_delayed_timer_event();
                }
            } else if self.params.nb_rep_counter >= self.params.nb_rep || self.flags.mcps_ind {
                if !self.flags.mcps_ind {
                    // No downlink in any window
                    self.commands.clear();
                    self.params.adr_ack_counter = self.params.adr_ack_counter.saturating_add(1);
                }
                self.mcps_confirm.nb_retries = self.params.nb_rep_counter;
                self.params.nb_rep_counter = 0;
                self.advance_uplink_counter();
                self.state.remove(MacState::TX_RUNNING);
            } else {
                self.flags.mac_done = false;
                self.on_tx_delayed_timer_event();
            }
        }

        if self.flags.mcps_ind
            && (self.mcps_confirm.ack_received
                || self.params.ack_timeout_retries_counter > self.params.ack_timeout_retries)
        {
            self.params.ack_timeout_retry = false;
            self.params.node_ack_requested = false;
            self.advance_uplink_counter();
            self.mcps_confirm.nb_retries = self.params.ack_timeout_retries_counter;
            self.state.remove(MacState::TX_RUNNING);
        }

        if self.params.ack_timeout_retry && !self.state.contains(MacState::TX_DELAYED) {
            self.params.ack_timeout_retry = false;
            self.retransmit_confirmed();
        }
    }

    fn retransmit_confirmed(&mut self) {
        let counter = self.params.ack_timeout_retries_counter;
        if counter < self.params.ack_timeout_retries && counter <= self.config.max_ack_retries {
            self.params.ack_timeout_retries_counter += 1;
            if self.params.ack_timeout_retries_counter % 2 == 1 {
                self.params.datarate = self.phy.next_lower_tx_datarate(self.params.datarate);
            }
            debug!(
                "retransmission {} at dr {}",
                self.params.ack_timeout_retries_counter, self.params.datarate
            );
            match self.schedule_tx() {
                Ok(()) => self.flags.mac_done = false,
                Err(_) => {
                    // Frame no longer fits the lowered datarate
                    self.finish_confirmed();
                    self.mcps_confirm.status = EventInfoStatus::TxDrPayloadSizeError;
                    self.mcps_confirm.datarate = self.params.datarate;
                }
            }
        } else {
            self.phy.load_defaults(InitType::RestoreDefaultChannels);
            self.finish_confirmed();
        }
    }

    fn finish_confirmed(&mut self) {
        self.state.remove(MacState::TX_RUNNING);
        self.commands.clear();
        self.params.node_ack_requested = false;
        self.mcps_confirm.ack_received = false;
        self.mcps_confirm.nb_retries = self.params.ack_timeout_retries_counter;
        self.advance_uplink_counter();
    }

    fn advance_uplink_counter(&mut self) {
        if !self.config.uplink_counter_fixed {
            self.params.uplink_counter = self.params.uplink_counter.wrapping_add(1);
        }
    }

    pub(super) fn on_ack_timeout_timer_event(&mut self) {
        self.timers.stop(TimerId::AckTimeout);
        if self.params.node_ack_requested {
            self.params.ack_timeout_retry = true;
            self.state.remove(MacState::ACK_REQ);
        }
        if self.params.device_class == DeviceClass::C {
            self.flags.mac_done = true;
        }
    }

    /// Session parameters back to their regional defaults
    pub(super) fn reset_mac_parameters(&mut self) {
        self.params.network_joined = false;
        self.params.uplink_counter = 0;
        self.params.downlink_counter = 0;
        self.params.adr_ack_counter = 0;
        self.params.nb_rep_counter = 0;
        self.params.ack_timeout_retries = 1;
        self.params.ack_timeout_retries_counter = 1;
        self.params.ack_timeout_retry = false;
        self.params.max_duty_cycle = 0;

        self.commands.clear();
        self.commands.clear_repeat();
        self.commands.set_in_next_tx(false);
        self.flags.mlme_cmd = false;

        self.params.load_defaults(&self.phy);
        self.params.node_ack_requested = false;
        self.params.srv_ack_requested = false;
        self.multicast.reset_counters();
        self.params.channel = 0;
        self.params.last_tx_channel = 0;
    }
}
