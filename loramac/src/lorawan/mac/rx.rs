//! Downlink path: receive windows and radio event handlers

use log::{debug, info, trace, warn};

use crate::config::device::{ActivationState, DeviceClass};
use crate::crypto::{self, Direction, MIC_SIZE};
use crate::lorawan::frame::{
    read_u16_le, read_u24_le, read_u32_le, FCtrl, MType, MacHeader, CF_LIST_SIZE, FRAME_HEADER_SIZE,
    FRAME_PAYLOAD_OVERHEAD_SIZE, JOIN_ACCEPT_SIZE, PHY_MAX_PAYLOAD,
};
use crate::lorawan::phy::{BackoffParams, LoRaPhy, PhyParam, RxConfigParams, RxSlot};
use crate::lorawan::primitives::{EventInfoStatus, MacPrimitives, McpsIndication, McpsType, MlmeType};
use crate::timer::{Clock, TimerId, TimerTime};

use super::{LoRaMac, MacState};

impl<P: LoRaPhy, C: Clock, H: MacPrimitives> LoRaMac<P, C, H> {
    /// Transmission completed, arm the receive windows
    pub(super) fn on_radio_tx_done(&mut self) {
        let now = self.timers.get_current_time();
        let class_c = self.params.device_class == DeviceClass::C;
        if class_c {
            self.open_continuous_rx2_window();
        } else {
            self.phy.put_radio_to_sleep();
        }

        self.timers.start_with(TimerId::RxWindow1, self.params.rx_window1_delay);
        if !class_c {
            self.timers.start_with(TimerId::RxWindow2, self.params.rx_window2_delay);
        }
        if class_c || self.params.node_ack_requested {
            let timeout = self.ack_timeout();
            self.timers
                .start_with(TimerId::AckTimeout, self.params.rx_window2_delay.saturating_add(timeout));
        }

        self.params.last_tx_is_join_request = self.flags.mlme_req && self.mlme_confirm.mlme_type == MlmeType::Join;
        self.params.last_tx_channel = self.params.channel;
        self.phy.calculate_backoff(&BackoffParams {
            joined: self.params.network_joined,
            last_tx_is_join_request: self.params.last_tx_is_join_request,
            duty_cycle_on: self.config.duty_cycle_on,
            channel: self.params.channel,
            elapsed_since_init: self.timers.get_elapsed_time(self.params.init_time),
            tx_time_on_air: self.params.tx_time_on_air,
            last_tx_done: now,
        });
        let toa = TimerTime::from(self.params.tx_time_on_air);
        self.params.aggregated_time_off += toa * TimerTime::from(self.params.aggregated_duty_cycle) - toa;
        self.params.last_aggregated_tx_done = now;

        if !self.params.node_ack_requested {
            self.mcps_confirm.status = EventInfoStatus::Ok;
            self.params.nb_rep_counter = self.params.nb_rep_counter.saturating_add(1);
        }
        trace!("tx done, rx1 in {} ms", self.params.rx_window1_delay);
    }

    /// Regional ack timeout with its random spread
    fn ack_timeout(&mut self) -> u32 {
        let base = i64::from(self.phy.get_phy_params(PhyParam::AckTimeout));
        let spread = i64::from(self.phy.get_phy_params(PhyParam::AckTimeoutRnd));
        let rnd = i64::from(self.phy.get_radio_rng()) % (2 * spread + 1) - spread;
        (base + rnd).max(0) as u32
    }

    pub(super) fn on_rx_window1_timer_event(&mut self) {
        self.timers.stop(TimerId::RxWindow1);
        let mut config = self.params.rx_window1_config;
        config.channel = self.params.channel;
        config.frequency = 0;
        config.rx_continuous = false;
        config.rx_slot = RxSlot::Rx1;
        if self.params.device_class == DeviceClass::C {
            self.phy.put_radio_to_standby();
        }
        if self.open_rx_window(&config) {
            self.state.insert(MacState::RX);
        }
    }

    pub(super) fn on_rx_window2_timer_event(&mut self) {
        self.timers.stop(TimerId::RxWindow2);
        let mut config = self.params.rx_window2_config;
        config.channel = self.params.channel;
        config.frequency = self.params.rx2_frequency;
        config.rx_continuous = false;
        config.rx_slot = RxSlot::Rx2;
        if self.open_rx_window(&config) {
            self.state.insert(MacState::RX);
        }
    }

    /// Class C listens on RX2 whenever it does not transmit
    pub(super) fn open_continuous_rx2_window(&mut self) {
        let mut config = self.phy.compute_rx_win_params(
            self.params.rx2_datarate,
            self.config.min_rx_symbols,
            self.config.max_rx_error_ms,
            RxSlot::Rx2ClassC,
        );
        config.channel = self.params.channel;
        config.frequency = self.params.rx2_frequency;
        config.rx_continuous = true;
        self.open_rx_window(&config);
    }

    /// Configure the radio and start receiving
    pub(super) fn open_rx_window(&mut self, config: &RxConfigParams) -> bool {
        if let Err(e) = self.phy.rx_config(config) {
            warn!("{:?} window not opened: {:?}", config.rx_slot, e);
            return false;
        }
        let timeout = if config.rx_continuous {
            0
        } else {
            self.params.max_rx_window
        };
        if let Err(e) = self.phy.handle_receive(timeout) {
            warn!("{:?} receive failed: {:?}", config.rx_slot, e);
            return false;
        }
        self.rx_slot = config.rx_slot;
        true
    }

    fn rx_window_datarate(&self, slot: RxSlot) -> u8 {
        match slot {
            RxSlot::Rx1 => self.params.rx_window1_config.datarate,
            RxSlot::Rx2 | RxSlot::Rx2ClassC => self.params.rx2_datarate,
            RxSlot::PingSlot => self
                .class_b
                .ping_context()
                .datarate
                .unwrap_or(self.phy.get_phy_params(PhyParam::PingSlotDatarate) as u8),
            RxSlot::Beacon => self.phy.get_phy_params(PhyParam::BeaconDatarate) as u8,
        }
    }

    /// Frame received
    pub(super) fn on_radio_rx_done(&mut self, payload: &[u8], rssi: i16, snr: i8, timestamp: TimerTime) {
        let slot = self.rx_slot;
        self.state.remove(MacState::RX);

        if slot == RxSlot::Beacon {
            self.phy.put_radio_to_sleep();
            self.with_class_b(|class_b, host| class_b.handle_beacon_rx(host, payload, rssi, snr, timestamp));
            return;
        }

        self.mcps_confirm.ack_received = false;
        self.mcps_indication = McpsIndication {
            rssi,
            snr,
            rx_slot: slot,
            rx_datarate: self.rx_window_datarate(slot),
            ..McpsIndication::default()
        };
        self.phy.put_radio_to_sleep();
        self.timers.stop(TimerId::RxWindow2);

        let result = match payload.first().map(|&mhdr| MacHeader::from_byte(mhdr).mtype) {
            Some(MType::JoinAccept) => self.handle_join_accept(payload),
            Some(MType::ConfirmedDataDown) | Some(MType::UnconfirmedDataDown) => self.handle_data_down(payload, snr),
            Some(MType::Proprietary) => self.handle_proprietary(payload),
            _ => Err(EventInfoStatus::Error),
        };
        match result {
            Ok(()) => {
                self.flags.mac_done = true;
                self.trigger_mac_state_check();
            }
            Err(status) => {
                debug!("downlink dropped: {:?}", status);
                self.mcps_indication.status = status;
                self.prepare_rx_done_abort();
            }
        }

        if slot == RxSlot::PingSlot {
            self.with_class_b(|class_b, host| class_b.handle_ping_rx_done(host));
        }
    }

    fn handle_join_accept(&mut self, payload: &[u8]) -> Result<(), EventInfoStatus> {
        if self.params.network_joined {
            return Err(EventInfoStatus::Error);
        }
        let size = payload.len();
        if size != JOIN_ACCEPT_SIZE && size != JOIN_ACCEPT_SIZE + CF_LIST_SIZE {
            return Err(EventInfoStatus::Error);
        }

        let app_key = self.device.app_key;
        let mut clear = [0u8; JOIN_ACCEPT_SIZE + CF_LIST_SIZE];
        clear[0] = payload[0];
        crypto::decrypt_join_frame(&payload[1..], &app_key, &mut clear[1..size])
            .map_err(|_| EventInfoStatus::CryptoFail)?;
        let mic = crypto::compute_join_frame_mic(&clear[..size - MIC_SIZE], &app_key)
            .map_err(|_| EventInfoStatus::CryptoFail)?;

        if mic != read_u32_le(&clear, size - MIC_SIZE) {
            warn!("join accept MIC mismatch");
            self.mlme_confirm.status = EventInfoStatus::JoinFail;
            return Ok(());
        }

        let mut app_nonce = [0u8; 6];
        app_nonce.copy_from_slice(&clear[1..7]);
        let (nwk_skey, app_skey) = crypto::compute_skeys_for_join_frame(&app_key, &app_nonce, self.params.dev_nonce)
            .map_err(|_| EventInfoStatus::CryptoFail)?;

        self.params.nwk_skey = nwk_skey;
        self.params.app_skey = app_skey;
        self.params.net_id = read_u24_le(&clear, 4);
        self.params.dev_addr = read_u32_le(&clear, 7);

        let dl_settings = clear[11];
        self.params.rx1_dr_offset = (dl_settings >> 4) & 0x07;
        self.params.rx2_datarate = dl_settings & 0x0F;
        let rx_delay = u32::from(clear[12] & 0x0F).max(1);
        self.params.receive_delay1 = rx_delay * 1_000;
        self.params.receive_delay2 = self.params.receive_delay1 + 1_000;

        if size > JOIN_ACCEPT_SIZE {
            self.phy.apply_cf_list(&clear[13..13 + CF_LIST_SIZE]);
        }

        self.mlme_confirm.status = EventInfoStatus::Ok;
        self.params.network_joined = true;
        self.params.activation = ActivationState::OTAAActivated;
        self.params.datarate = self.phy.get_phy_params(PhyParam::DefaultDatarate) as u8;
        self.device.dev_addr = Some(self.params.dev_addr);
        self.device.nwk_skey = Some(nwk_skey);
        self.device.app_skey = Some(app_skey);
        self.class_b.set_device_address(self.params.dev_addr);
        info!("joined, address {:08x} net {:06x}", self.params.dev_addr, self.params.net_id);
        Ok(())
    }

    fn handle_data_down(&mut self, payload: &[u8], snr: i8) -> Result<(), EventInfoStatus> {
        let size = payload.len();
        let max = usize::from(self.phy.max_payload(self.mcps_indication.rx_datarate));
        if size < FRAME_HEADER_SIZE + MIC_SIZE || size.saturating_sub(FRAME_PAYLOAD_OVERHEAD_SIZE) > max {
            return Err(EventInfoStatus::Error);
        }

        let address = read_u32_le(payload, 1);
        let (multicast, nwk_skey, app_skey, counter) = if address == self.params.dev_addr {
            (false, self.params.nwk_skey, self.params.app_skey, self.params.downlink_counter)
        } else {
            let channel = self.multicast.find(address).ok_or(EventInfoStatus::AddressFail)?;
            (true, channel.nwk_skey, channel.app_skey, channel.downlink_counter)
        };
        self.mcps_indication.address = address;

        let fctrl = FCtrl::from_byte(payload[5]);
        let fopts_end = FRAME_HEADER_SIZE + usize::from(fctrl.f_opts_len);
        let mic_start = size - MIC_SIZE;
        if fopts_end > mic_start {
            return Err(EventInfoStatus::Error);
        }
        let mic_rx = read_u32_le(payload, mic_start);

        let sequence = read_u16_le(payload, 6);
        let diff = sequence.wrapping_sub(counter as u16);
        let mic_for = |counter: u32| crypto::compute_mic(&payload[..mic_start], &nwk_skey, address, Direction::Down, counter);
        let mut downlink_counter = counter;
        let mut mic_ok = false;
        if diff < 1 << 15 {
            downlink_counter = counter.wrapping_add(u32::from(diff));
            mic_ok = mic_for(downlink_counter).map_err(|_| EventInfoStatus::CryptoFail)? == mic_rx;
        } else {
            let rolled = counter.wrapping_add(0x1_0000).wrapping_add_signed(i32::from(diff as i16));
            if mic_for(rolled).map_err(|_| EventInfoStatus::CryptoFail)? == mic_rx {
                mic_ok = true;
                downlink_counter = rolled;
            }
        }

        if u32::from(diff) >= self.config.max_fcnt_gap {
            self.mcps_indication.downlink_counter = downlink_counter;
            return Err(EventInfoStatus::DownlinkTooManyFramesLoss);
        }
        if !mic_ok {
            return Err(EventInfoStatus::MicFail);
        }

        self.mcps_indication.status = EventInfoStatus::Ok;
        self.mcps_indication.multicast = multicast;
        self.mcps_indication.frame_pending = fctrl.f_pending;
        self.mcps_indication.downlink_counter = downlink_counter;
        self.mcps_confirm.status = EventInfoStatus::Ok;
        self.params.adr_ack_counter = 0;
        self.commands.clear_repeat();

        let mtype = MacHeader::from_byte(payload[0]).mtype;
        let repeated = downlink_counter == counter && counter != 0;
        let mut skip_indication = false;
        if multicast {
            self.mcps_indication.mcps_type = McpsType::Multicast;
            if repeated {
                return Err(EventInfoStatus::DownlinkRepeated);
            }
            if let Some(channel) = self.multicast.find_mut(address) {
                channel.downlink_counter = downlink_counter;
            }
        } else {
            if mtype == MType::ConfirmedDataDown {
                self.params.srv_ack_requested = true;
                self.mcps_indication.mcps_type = McpsType::Confirmed;
                // A retransmitted confirmed downlink still carries valid MAC commands
                skip_indication = repeated;
            } else {
                self.params.srv_ack_requested = false;
                self.mcps_indication.mcps_type = McpsType::Unconfirmed;
                if repeated {
                    return Err(EventInfoStatus::DownlinkRepeated);
                }
            }
            self.params.downlink_counter = downlink_counter;
        }

        if !self.params.node_ack_requested || fctrl.ack {
            self.commands.clear();
        }

        if mic_start > fopts_end {
            let port = payload[fopts_end];
            let frm_payload = &payload[fopts_end + 1..mic_start];
            self.mcps_indication.port = port;
            if port == 0 {
                if fctrl.f_opts_len == 0 {
                    let mut clear = [0u8; PHY_MAX_PAYLOAD];
                    let clear = &mut clear[..frm_payload.len()];
                    crypto::decrypt_payload(frm_payload, &nwk_skey, address, Direction::Down, downlink_counter, clear)
                        .map_err(|_| EventInfoStatus::CryptoFail)?;
                    self.process_mac_commands(clear, snr);
                } else {
                    skip_indication = true;
                }
            } else {
                if fctrl.f_opts_len > 0 {
                    self.process_mac_commands(&payload[FRAME_HEADER_SIZE..fopts_end], snr);
                }
                let buffer = &mut self.mcps_indication.payload;
                buffer.clear();
                // Cannot fail: the frame is at most PHY_MAX_PAYLOAD bytes
                let _ = buffer.resize(frm_payload.len(), 0);
                crypto::decrypt_payload(frm_payload, &app_skey, address, Direction::Down, downlink_counter, buffer)
                    .map_err(|_| EventInfoStatus::CryptoFail)?;
                if skip_indication {
                    buffer.clear();
                } else {
                    self.mcps_indication.rx_data = true;
                }
            }
        } else if fctrl.f_opts_len > 0 {
            self.process_mac_commands(&payload[FRAME_HEADER_SIZE..fopts_end], snr);
        }

        if !skip_indication {
            if fctrl.ack && self.params.node_ack_requested {
                self.mcps_confirm.ack_received = true;
                self.mcps_indication.ack_received = true;
                self.timers.stop(TimerId::AckTimeout);
            } else {
                self.mcps_confirm.ack_received = false;
                if self.params.ack_timeout_retries_counter > self.params.ack_timeout_retries {
                    self.timers.stop(TimerId::AckTimeout);
                }
            }
        }

        self.flags.mcps_ind = true;
        self.flags.mcps_ind_skip = skip_indication;
        debug!(
            "downlink fcnt {} port {} ack {} from {:08x}",
            downlink_counter, self.mcps_indication.port, fctrl.ack, address
        );
        Ok(())
    }

    fn handle_proprietary(&mut self, payload: &[u8]) -> Result<(), EventInfoStatus> {
        self.mcps_indication.mcps_type = McpsType::Proprietary;
        self.mcps_indication.status = EventInfoStatus::Ok;
        self.mcps_indication.payload.clear();
        // Cannot fail: the frame is at most PHY_MAX_PAYLOAD bytes
        let _ = self.mcps_indication.payload.extend_from_slice(&payload[1..]);
        self.mcps_indication.rx_data = true;
        self.flags.mcps_ind = true;
        Ok(())
    }

    /// Drop the received frame and close the cycle
    pub(super) fn prepare_rx_done_abort(&mut self) {
        self.state.insert(MacState::RX_ABORT);
        if self.params.node_ack_requested {
            self.on_ack_timeout_timer_event();
        }
        self.flags.mcps_ind = true;
        self.flags.mac_done = true;
        self.trigger_mac_state_check();
    }

    pub(super) fn on_radio_rx_timeout(&mut self) {
        self.on_radio_rx_failure(EventInfoStatus::Rx1Timeout, EventInfoStatus::Rx2Timeout);
    }

    pub(super) fn on_radio_rx_error(&mut self) {
        self.on_radio_rx_failure(EventInfoStatus::Rx1Error, EventInfoStatus::Rx2Error);
    }

    fn on_radio_rx_failure(&mut self, rx1_status: EventInfoStatus, rx2_status: EventInfoStatus) {
        let slot = self.rx_slot;
        self.state.remove(MacState::RX);
        let class_c = self.params.device_class == DeviceClass::C;
        if !class_c {
            self.phy.put_radio_to_sleep();
        }

        match slot {
            RxSlot::Beacon => self.with_class_b(|class_b, host| class_b.handle_beacon_miss(host)),
            RxSlot::PingSlot => self.with_class_b(|class_b, host| class_b.handle_ping_rx_timeout(host)),
            RxSlot::Rx2ClassC => {}
            RxSlot::Rx1 => {
                if self.params.node_ack_requested {
                    self.mcps_confirm.status = rx1_status;
                }
                self.mlme_confirm.status = rx1_status;
                let elapsed = self.timers.get_elapsed_time(self.params.last_aggregated_tx_done);
                if elapsed >= TimerTime::from(self.params.rx_window2_delay) {
                    self.timers.stop(TimerId::RxWindow2);
                    self.flags.mac_done = true;
                }
            }
            RxSlot::Rx2 => {
                if self.params.node_ack_requested {
                    self.mcps_confirm.status = rx2_status;
                }
                self.mlme_confirm.status = rx2_status;
                self.flags.mac_done = true;
            }
        }

        if class_c {
            self.open_continuous_rx2_window();
        }
    }

    pub(super) fn on_radio_tx_timeout(&mut self) {
        if self.params.device_class == DeviceClass::C {
            self.open_continuous_rx2_window();
        } else {
            self.phy.put_radio_to_sleep();
        }
        warn!("radio tx timeout");
        self.mcps_confirm.status = EventInfoStatus::TxTimeout;
        self.mlme_confirm.status = EventInfoStatus::TxTimeout;
        self.flags.mac_done = true;
    }
}
