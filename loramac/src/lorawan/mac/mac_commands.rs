//! Downlink MAC command processing

use log::{debug, trace};

use crate::lorawan::commands::{CommandIdentifier, MacCommand};
use crate::lorawan::phy::{LinkAdrParams, LoRaPhy, NewChannelParams, PhyParam, RxParamSetup};
use crate::lorawan::primitives::{EventInfoStatus, MacPrimitives};
use crate::timer::{Clock, TimerTime};

use super::LoRaMac;

/// Length of one LinkADRReq including its CID
const LINK_ADR_REQ_SIZE: usize = 5;

impl<P: LoRaPhy, C: Clock, H: MacPrimitives> LoRaMac<P, C, H> {
    /// Apply the commands of one downlink and queue their answers
    ///
    /// Parsing stops at the first unknown or truncated command.
    pub(super) fn process_mac_commands(&mut self, payload: &[u8], snr: i8) {
        let mut index = 0;
        while index < payload.len() {
            let (command, len) = match MacCommand::parse(&payload[index..]) {
                Some(parsed) => parsed,
                None => {
                    debug!("MAC command {:02x} not understood, rest ignored", payload[index]);
                    return;
                }
            };
            trace!("MAC command {:?}", command);

            match command {
                MacCommand::LinkCheckAns { margin, gateway_count } => {
                    self.mlme_confirm.status = EventInfoStatus::Ok;
                    self.mlme_confirm.demod_margin = margin;
                    self.mlme_confirm.nb_gateways = gateway_count;
                }
                MacCommand::LinkADRReq { .. } => {
                    // Contiguous LinkADRReq form one block
                    let result = self.phy.link_adr_req(&LinkAdrParams {
                        payload: &payload[index..],
                        adr_enabled: self.params.adr_on,
                        datarate: self.params.datarate,
                        tx_power: self.params.tx_power,
                        nb_rep: self.params.nb_rep,
                    });
                    if result.status == 0x07 {
                        self.params.datarate = result.datarate;
                        self.params.tx_power = result.tx_power;
                        self.params.nb_rep = result.nb_rep;
                    }
                    for _ in 0..result.consumed / LINK_ADR_REQ_SIZE {
                        self.add_mac_command(CommandIdentifier::LinkADR, &[result.status]);
                    }
                    index += result.consumed.max(len);
                    continue;
                }
                MacCommand::DutyCycleReq { max_duty_cycle } => {
                    self.params.max_duty_cycle = max_duty_cycle;
                    if max_duty_cycle != 255 {
                        self.params.aggregated_duty_cycle = 1u32.checked_shl(u32::from(max_duty_cycle)).unwrap_or(u32::MAX);
                    }
                    self.add_mac_command(CommandIdentifier::DutyCycle, &[]);
                }
                MacCommand::RXParamSetupReq {
                    rx1_dr_offset,
                    rx2_data_rate,
                    freq,
                } => {
                    let status = self.phy.rx_param_setup_req(&RxParamSetup {
                        datarate: rx2_data_rate,
                        dr_offset: rx1_dr_offset,
                        frequency: freq,
                    });
                    if status == 0x07 {
                        self.params.rx2_datarate = rx2_data_rate;
                        self.params.rx2_frequency = freq;
                        self.params.rx1_dr_offset = rx1_dr_offset;
                    }
                    self.add_mac_command(CommandIdentifier::RXParamSetup, &[status]);
                }
                MacCommand::DevStatusReq => {
                    let battery = self.primitives.battery_level();
                    self.add_mac_command(CommandIdentifier::DevStatus, &[battery, (snr as u8) & 0x3F]);
                }
                MacCommand::NewChannelReq {
                    ch_index,
                    freq,
                    max_dr,
                    min_dr,
                } => {
                    let status = self.phy.new_channel_req(&NewChannelParams {
                        index: ch_index,
                        frequency: freq,
                        min_dr,
                        max_dr,
                    });
                    self.add_mac_command(CommandIdentifier::NewChannel, &[status]);
                }
                MacCommand::RXTimingSetupReq { delay } => {
                    let delay = u32::from(delay.max(1));
                    self.params.receive_delay1 = delay * 1_000;
                    self.params.receive_delay2 = self.params.receive_delay1 + 1_000;
                    self.add_mac_command(CommandIdentifier::RXTimingSetup, &[]);
                }
                MacCommand::TxParamSetupReq { eirp_dwell_time } => {
                    if self.phy.tx_param_setup_req(eirp_dwell_time) {
                        self.add_mac_command(CommandIdentifier::TxParamSetup, &[]);
                    }
                }
                MacCommand::DlChannelReq { ch_index, freq } => {
                    let status = self.phy.dl_channel_req(ch_index, freq);
                    self.add_mac_command(CommandIdentifier::DlChannel, &[status]);
                }
                MacCommand::DeviceTimeAns { seconds, fraction } => {
                    // Network time refers to the end of the uplink
                    let since_tx = self.timers.get_elapsed_time(self.params.last_aggregated_tx_done);
                    let gps = TimerTime::from(seconds) * 1_000 + ((TimerTime::from(fraction) * 1_000) >> 8) + since_tx;
                    self.timers.set_gps_time(gps);
                    self.mlme_confirm.status = EventInfoStatus::Ok;
                    debug!("GPS time set to {} ms", gps);
                }
                MacCommand::PingSlotInfoAns => {
                    if let Some(periodicity) = self.params.pending_ping_periodicity.take() {
                        self.with_class_b(|class_b, host| class_b.set_ping_slot_periodicity(host, periodicity));
                    }
                    self.mlme_confirm.status = EventInfoStatus::Ok;
                }
                MacCommand::PingSlotChannelReq { freq, data_rate } => {
                    let mut status = 0x03;
                    if freq != 0 && !self.phy.verify_frequency(freq) {
                        status &= 0xFE;
                    }
                    if u32::from(data_rate) > self.phy.get_phy_params(PhyParam::MaxRxDatarate) {
                        status &= 0xFD;
                    }
                    if status == 0x03 {
                        self.class_b.set_ping_slot_channel(data_rate, freq);
                    }
                    self.add_mac_command(CommandIdentifier::PingSlotChannel, &[status]);
                }
                MacCommand::BeaconTimingAns { delay, channel } => {
                    let now = self.timers.get_current_time();
                    self.class_b.beacon_timing_ans(now, delay, channel);
                }
                MacCommand::BeaconFreqReq { freq } => {
                    let valid = freq == 0 || self.phy.verify_frequency(freq);
                    if valid {
                        self.class_b.set_beacon_frequency(freq);
                    }
                    self.add_mac_command(CommandIdentifier::BeaconFreq, &[u8::from(valid)]);
                }
            }
            index += len;
        }
    }
}
