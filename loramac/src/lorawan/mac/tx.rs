//! Uplink path
//!
//! Frame layout, little-endian:
//! `MHDR | DevAddr(4) | FCtrl | FCnt(2) | FOpts(0-15) | FPort | FRMPayload | MIC(4)`

use log::{debug, trace, warn};

use crate::crypto::{self, Direction, MIC_SIZE};
use crate::lorawan::frame::{FCtrl, MType, MacHeader, FRAME_HEADER_SIZE, MAX_FOPTS_LENGTH, PHY_MAX_PAYLOAD};
use crate::lorawan::phy::{AdrNextParams, LoRaPhy, NextChannelParams, PhyParam, RxSlot, TxConfigParams};
use crate::lorawan::primitives::{EventInfoStatus, MacPrimitives, MlmeType};
use crate::timer::{Clock, TimerId};

use super::{LoRaMac, MacError, MacState};

impl<P: LoRaPhy, C: Clock, H: MacPrimitives> LoRaMac<P, C, H> {
    /// Build and schedule an uplink
    pub(super) fn send(&mut self, header: MacHeader, port: Option<u8>, payload: &[u8]) -> Result<(), MacError> {
        let fctrl = FCtrl {
            adr: self.params.adr_on,
            ..FCtrl::default()
        };

        if header.mtype != MType::JoinRequest && header.mtype != MType::Proprietary {
            let fopts_len = self.commands.len() + self.commands.repeat_len();
            if !self.validate_payload_length(payload.len(), self.params.datarate, fopts_len) {
                return Err(MacError::LengthError);
            }
        }

        // Queued answers stay queued unless the frame goes out
        let commands = self.commands.clone();
        if let Err(e) = self.prepare_frame(header, fctrl, port, payload) {
            self.commands = commands;
            return Err(e);
        }

        self.mcps_confirm.nb_retries = 0;
        self.mcps_confirm.ack_received = false;
        self.mcps_confirm.uplink_counter = self.params.uplink_counter;

        match self.schedule_tx() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.commands = commands;
                Err(e)
            }
        }
    }

    fn validate_payload_length(&self, len: usize, datarate: u8, fopts_len: usize) -> bool {
        let size = len + fopts_len;
        size <= usize::from(self.phy.max_payload(datarate)) && size <= PHY_MAX_PAYLOAD
    }

    /// Serialize the frame into the frame buffer
    pub(super) fn prepare_frame(
        &mut self,
        header: MacHeader,
        mut fctrl: FCtrl,
        port: Option<u8>,
        payload: &[u8],
    ) -> Result<(), MacError> {
        self.buffer.clear();
        self.params.tx_fopts_len = 0;
        self.params.tx_payload_len = payload.len();

        match header.mtype {
            MType::JoinRequest => self.prepare_join_request(header),
            MType::ConfirmedDataUp | MType::UnconfirmedDataUp => {
                if !self.params.network_joined {
                    return Err(MacError::NoNetworkJoined);
                }
                self.params.node_ack_requested = header.mtype == MType::ConfirmedDataUp;
                self.prepare_data_frame(header, &mut fctrl, port, payload)
            }
            MType::Proprietary => {
                push_all(&mut self.buffer, &[header.to_byte()])?;
                push_all(&mut self.buffer, payload)?;
                Ok(())
            }
            _ => Err(MacError::ServiceUnknown),
        }
    }

    fn prepare_join_request(&mut self, header: MacHeader) -> Result<(), MacError> {
        self.params.tx_payload_len = 0;
        self.params.dev_nonce = self.phy.get_radio_rng() as u16;

        let mut app_eui = self.device.app_eui;
        app_eui.reverse();
        let mut dev_eui = self.device.dev_eui;
        dev_eui.reverse();

        push_all(&mut self.buffer, &[header.to_byte()])?;
        push_all(&mut self.buffer, &app_eui)?;
        push_all(&mut self.buffer, &dev_eui)?;
        push_all(&mut self.buffer, &self.params.dev_nonce.to_le_bytes())?;

        let mic = crypto::compute_join_frame_mic(&self.buffer, &self.device.app_key)?;
        push_all(&mut self.buffer, &mic.to_le_bytes())?;
        debug!("join request, dev nonce {:04x}", self.params.dev_nonce);
        Ok(())
    }

    fn prepare_data_frame(
        &mut self,
        header: MacHeader,
        fctrl: &mut FCtrl,
        port: Option<u8>,
        payload: &[u8],
    ) -> Result<(), MacError> {
        let adr = self.phy.get_next_adr(&AdrNextParams {
            adr_enabled: fctrl.adr,
            adr_ack_counter: self.params.adr_ack_counter,
            datarate: self.params.datarate,
            tx_power: self.params.tx_power,
            update_chan_mask: true,
            adr_ack_limit: self.config.adr_ack_limit,
            adr_ack_delay: self.config.adr_ack_delay,
        });
        fctrl.adr_ack_req = adr.adr_ack_req;
        self.params.datarate = adr.datarate;
        self.params.tx_power = adr.tx_power;
        self.params.adr_ack_counter = adr.adr_ack_counter;

        if self.params.srv_ack_requested {
            self.params.srv_ack_requested = false;
            fctrl.ack = true;
        }
        fctrl.f_pending = self.class_b.status().ping_on;

        self.commands.merge_repeat()?;
        let commands_len = self.commands.len();
        let send_commands = self.commands.in_next_tx() && commands_len > 0;

        let mut port = port;
        let mut frm_payload = payload;
        let in_fopts = send_commands && commands_len <= MAX_FOPTS_LENGTH;
        if in_fopts {
            fctrl.f_opts_len = commands_len as u8;
        }

        let mut pending = [0u8; MAX_COMMANDS_COPY];
        if send_commands && !in_fopts {
            if !payload.is_empty() {
                warn!("{} bytes of MAC commands take the frame, payload dropped", commands_len);
            }
            let len = commands_len.min(MAX_COMMANDS_COPY);
            pending[..len].copy_from_slice(&self.commands.pending()[..len]);
            frm_payload = &pending[..len];
            port = Some(0);
        }
        self.params.tx_payload_len = frm_payload.len();
        self.params.tx_fopts_len = usize::from(fctrl.f_opts_len);

        let dev_addr = self.params.dev_addr;
        let fcnt = self.params.uplink_counter;
        push_all(&mut self.buffer, &[header.to_byte()])?;
        push_all(&mut self.buffer, &dev_addr.to_le_bytes())?;
        push_all(&mut self.buffer, &[fctrl.to_byte()])?;
        push_all(&mut self.buffer, &(fcnt as u16).to_le_bytes())?;
        if in_fopts {
            let (buffer, commands) = (&mut self.buffer, &self.commands);
            push_all(buffer, commands.pending())?;
        }
        self.commands.set_in_next_tx(false);
        self.commands.parse_repeat();

        if !frm_payload.is_empty() {
            let port = port.unwrap_or(0);
            push_all(&mut self.buffer, &[port])?;
            let key = if port == 0 {
                self.params.nwk_skey
            } else {
                self.params.app_skey
            };
            let start = self.buffer.len();
            self.buffer
                .resize(start + frm_payload.len(), 0)
                .map_err(|_| MacError::LengthError)?;
            crypto::encrypt_payload(frm_payload, &key, dev_addr, Direction::Up, fcnt, &mut self.buffer[start..])?;
        }

        let mic = crypto::compute_mic(&self.buffer, &self.params.nwk_skey, dev_addr, Direction::Up, fcnt)?;
        push_all(&mut self.buffer, &mic.to_le_bytes())?;
        trace!(
            "uplink fcnt {} fopts {} payload {} len {}",
            fcnt,
            fctrl.f_opts_len,
            frm_payload.len(),
            self.buffer.len()
        );
        Ok(())
    }

    /// Select a channel and send the frame now or after the duty-cycle wait
    pub(super) fn schedule_tx(&mut self) -> Result<(), MacError> {
        if self.params.max_duty_cycle == 255 {
            return Err(MacError::DeviceOff);
        }
        if self.params.max_duty_cycle == 0 {
            self.params.aggregated_time_off = 0;
        }

        let mut next = NextChannelParams {
            aggregated_time_off: self.params.aggregated_time_off,
            last_aggregated_tx: self.params.last_aggregated_tx_done,
            current_time: self.timers.get_current_time(),
            datarate: self.params.datarate,
            joined: self.params.network_joined,
            duty_cycle_on: self.config.duty_cycle_on,
        };
        let selected = match self.phy.set_next_channel(&next) {
            Ok(selected) => selected,
            Err(_) => {
                self.params.datarate = self.phy.get_phy_params(PhyParam::DefaultDatarate) as u8;
                next.datarate = self.params.datarate;
                self.phy
                    .set_next_channel(&next)
                    .map_err(|_| MacError::NoChannelFound)?
            }
        };
        self.params.channel = selected.channel;
        self.params.aggregated_time_off = selected.aggregated_time_off;

        let rx1_datarate = self.phy.apply_dr_offset(self.params.datarate, self.params.rx1_dr_offset);
        self.params.rx_window1_config = self.phy.compute_rx_win_params(
            rx1_datarate,
            self.config.min_rx_symbols,
            self.config.max_rx_error_ms,
            RxSlot::Rx1,
        );
        self.params.rx_window2_config = self.phy.compute_rx_win_params(
            self.params.rx2_datarate,
            self.config.min_rx_symbols,
            self.config.max_rx_error_ms,
            RxSlot::Rx2,
        );

        let (delay1, delay2) = if self.params.network_joined {
            if !self.validate_payload_length(self.params.tx_payload_len, self.params.datarate, self.params.tx_fopts_len) {
                return Err(MacError::LengthError);
            }
            (self.params.receive_delay1, self.params.receive_delay2)
        } else {
            (self.params.join_accept_delay1, self.params.join_accept_delay2)
        };
        self.params.rx_window1_delay = offset_delay(delay1, self.params.rx_window1_config.window_offset);
        self.params.rx_window2_delay = offset_delay(delay2, self.params.rx_window2_config.window_offset);

        if selected.time_to_wait == 0 {
            return self.send_frame_on_channel(selected.channel);
        }
        let wait = u32::try_from(selected.time_to_wait).unwrap_or(u32::MAX);
        debug!("duty cycle: transmission delayed by {} ms", wait);
        self.state.insert(MacState::TX_DELAYED);
        self.timers.start_with(TimerId::TxDelayed, wait);
        Ok(())
    }

    fn send_frame_on_channel(&mut self, channel: u8) -> Result<(), MacError> {
        self.state.insert(MacState::TX_CONFIG);
        let tx = self
            .phy
            .tx_config(&TxConfigParams {
                channel,
                datarate: self.params.datarate,
                tx_power: self.params.tx_power,
                max_eirp: self.params.max_eirp,
                antenna_gain: self.params.antenna_gain,
                pkt_len: self.buffer.len() as u8,
            })
            .map_err(|e| {
                warn!("tx config on channel {} failed: {:?}", channel, e);
                MacError::ParameterInvalid
            });
        self.state.remove(MacState::TX_CONFIG);
        let tx = tx?;
        self.params.tx_time_on_air = tx.time_on_air;

        self.mlme_confirm.status = EventInfoStatus::Error;
        self.mlme_confirm.tx_time_on_air = tx.time_on_air;
        self.mcps_confirm.status = EventInfoStatus::Error;
        self.mcps_confirm.datarate = self.params.datarate;
        self.mcps_confirm.tx_power = tx.tx_power_dbm;
        self.mcps_confirm.tx_time_on_air = tx.time_on_air;
        self.mcps_confirm.channel = channel;

        self.with_class_b(|class_b, host| class_b.pause(host));
        self.timers
            .start_with(TimerId::MacStateCheck, self.config.mac_state_check_timeout_ms);

        self.state.insert(MacState::TX_RUNNING);
        if self.params.node_ack_requested {
            self.state.insert(MacState::ACK_REQ);
        }

        if let Err(e) = self.phy.handle_send(&self.buffer) {
            warn!("radio send failed: {:?}", e);
            self.state.remove(MacState::TX_RUNNING);
            self.state.remove(MacState::ACK_REQ);
            self.timers.stop(TimerId::MacStateCheck);
            self.with_class_b(|class_b, host| class_b.resume(host));
            return Err(MacError::ParameterInvalid);
        }
        if !self.params.network_joined {
            self.params.join_request_trials += 1;
        }
        debug!(
            "tx channel {} dr {} len {} toa {} ms",
            channel,
            self.params.datarate,
            self.buffer.len(),
            tx.time_on_air
        );
        Ok(())
    }

    /// Duty-cycle wait over, or a retransmission is due
    pub(super) fn on_tx_delayed_timer_event(&mut self) {
        self.timers.stop(TimerId::TxDelayed);
        self.state.remove(MacState::TX_DELAYED);

        if self.flags.mlme_req && self.mlme_confirm.mlme_type == MlmeType::Join {
            self.reset_mac_parameters();
            self.params.datarate = self.phy.alternate_datarate(self.params.join_request_trials + 1);
            let fctrl = FCtrl {
                adr: self.params.adr_on,
                ..FCtrl::default()
            };
            // A fresh DevNonce for every attempt
            if let Err(e) = self.prepare_frame(MacHeader::new(MType::JoinRequest), fctrl, None, &[]) {
                warn!("join request not rebuilt: {:?}", e);
            }
        }

        if let Err(e) = self.schedule_tx() {
            warn!("retransmission failed: {:?}", e);
            self.state.remove(MacState::TX_RUNNING);
            self.trigger_mac_state_check();
        }
    }
}

/// Largest FRMPayload made of MAC commands
const MAX_COMMANDS_COPY: usize = PHY_MAX_PAYLOAD - FRAME_HEADER_SIZE - 1 - MIC_SIZE;

fn push_all(buffer: &mut crate::lorawan::frame::FrameBuffer, data: &[u8]) -> Result<(), MacError> {
    buffer.extend_from_slice(data).map_err(|_| MacError::LengthError)
}

fn offset_delay(delay: u32, offset: i32) -> u32 {
    (i64::from(delay) + i64::from(offset)).max(0) as u32
}
