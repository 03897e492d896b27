//! EU868 regional parameters
//!
//! A compact reference implementation of [`LoRaPhy`]: the three mandatory
//! join channels plus up to thirteen network-defined channels, the 1% / 0.1%
//! / 10% sub-bands, LoRa datarates DR0-DR6 and Class B beacon/ping slot
//! defaults. FSK (DR7) and repeater payload tables are not modelled.

use crate::radio::traits::{ModulationParams, Radio, RxConfig, TxConfig};
use crate::timer::TimerTime;

use super::phy::{
    AdrNext, AdrNextParams, BackoffParams, InitType, LinkAdrParams, LinkAdrResult, LoRaPhy,
    NewChannelParams, NextChannel, NextChannelParams, PhyError, PhyParam, RxConfigParams,
    RxParamSetup, RxSlot, TxConfigParams, TxConfigResult,
};

/// Maximum number of channels
pub const MAX_NB_CHANNELS: usize = 16;
/// Join channels that cannot be modified
const NB_DEFAULT_CHANNELS: usize = 3;
const DEFAULT_CHANNEL_MASK: u16 = 0x0007;

const TX_MIN_DATARATE: u8 = 0;
const TX_MAX_DATARATE: u8 = 6;
const RX_MAX_DATARATE: u8 = 7;
const MAX_TX_POWER_INDEX: u8 = 7;
const DEFAULT_DATARATE: u8 = 0;
const DEFAULT_MAX_EIRP: i8 = 16;
const DEFAULT_ANTENNA_GAIN: i8 = 2;
const MAX_RX1_DR_OFFSET: u8 = 5;

const RX2_FREQUENCY: u32 = 869_525_000;
const RX2_DATARATE: u8 = 0;
const BEACON_FREQUENCY: u32 = 869_525_000;
const BEACON_DATARATE: u8 = 3;
const PING_SLOT_FREQUENCY: u32 = 869_525_000;
const PING_SLOT_DATARATE: u8 = 3;
const BEACON_RFU1_SIZE: u32 = 2;
const BEACON_RFU2_SIZE: u32 = 0;

const MIN_FREQUENCY: u32 = 863_000_000;
const MAX_FREQUENCY: u32 = 870_000_000;
const PREAMBLE_LEN: u16 = 8;
const TX_TIMEOUT_MS: u32 = 4_000;
const RADIO_WAKEUP_TIME_US: i64 = 1_000;

/// (spreading factor, bandwidth) per datarate
const DATARATES: [(u8, u32); 8] = [
    (12, 125_000),
    (11, 125_000),
    (10, 125_000),
    (9, 125_000),
    (8, 125_000),
    (7, 125_000),
    (7, 250_000),
    (7, 250_000),
];

/// Maximum MACPayload size per datarate
const MAX_PAYLOAD: [u8; 8] = [51, 51, 51, 115, 242, 242, 242, 242];

/// Uplink channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Channel {
    /// Uplink frequency in Hz, zero when undefined
    pub frequency: u32,
    /// RX1 frequency in Hz, zero to reuse the uplink frequency
    pub rx1_frequency: u32,
    /// Minimum datarate
    pub min_dr: u8,
    /// Maximum datarate
    pub max_dr: u8,
    /// Sub-band index
    pub band: u8,
}

/// Duty-cycle sub-band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    /// Lower frequency bound
    pub lower: u32,
    /// Upper frequency bound
    pub upper: u32,
    /// Duty cycle as 1/x
    pub duty_cycle: u16,
    /// Last transmission completion time
    pub last_tx_done: TimerTime,
    /// Time-off imposed by the last transmission
    pub time_off: TimerTime,
}

impl Band {
    const fn new(lower: u32, upper: u32, duty_cycle: u16) -> Self {
        Self {
            lower,
            upper,
            duty_cycle,
            last_tx_done: 0,
            time_off: 0,
        }
    }
}

const DEFAULT_BANDS: [Band; 5] = [
    Band::new(868_000_000, 868_600_000, 100),
    Band::new(868_700_000, 869_200_000, 1_000),
    Band::new(869_400_000, 869_650_000, 10),
    Band::new(869_700_000, 870_000_000, 100),
    Band::new(863_000_000, 868_000_000, 100),
];

fn default_channels() -> [Channel; MAX_NB_CHANNELS] {
    let mut channels = [Channel::default(); MAX_NB_CHANNELS];
    for (i, frequency) in [868_100_000, 868_300_000, 868_500_000].into_iter().enumerate() {
        channels[i] = Channel {
            frequency,
            rx1_frequency: 0,
            min_dr: 0,
            max_dr: 5,
            band: 0,
        };
    }
    channels
}

fn modulation(datarate: u8) -> ModulationParams {
    let (spreading_factor, bandwidth) = DATARATES[usize::from(datarate.min(RX_MAX_DATARATE))];
    ModulationParams {
        spreading_factor,
        bandwidth,
        coding_rate: 5,
    }
}

fn div_ceil_signed(numerator: i64, denominator: i64) -> i64 {
    if numerator >= 0 {
        (numerator + denominator - 1) / denominator
    } else {
        numerator / denominator
    }
}

/// EU868 region over a radio driver
pub struct EU868<R: Radio> {
    radio: R,
    channels: [Channel; MAX_NB_CHANNELS],
    channel_mask: u16,
    bands: [Band; 5],
}

impl<R: Radio> EU868<R> {
    /// Create the region with default channels
    pub fn new(radio: R) -> Self {
        Self {
            radio,
            channels: default_channels(),
            channel_mask: DEFAULT_CHANNEL_MASK,
            bands: DEFAULT_BANDS,
        }
    }

    /// Radio driver
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Mutable radio driver
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Channel table
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Enabled channel bitmask
    pub fn channel_mask(&self) -> u16 {
        self.channel_mask
    }

    fn band_for(frequency: u32) -> Option<u8> {
        DEFAULT_BANDS
            .iter()
            .position(|band| frequency >= band.lower && frequency <= band.upper)
            .map(|index| index as u8)
    }

    fn frequency_valid(frequency: u32) -> bool {
        (MIN_FREQUENCY..=MAX_FREQUENCY).contains(&frequency) && Self::band_for(frequency).is_some()
    }

    fn channel_enabled(&self, index: usize) -> bool {
        self.channel_mask & (1 << index) != 0 && self.channels[index].frequency != 0
    }

    fn update_band_time_off(&mut self, duty_cycle_on: bool, now: TimerTime) -> TimerTime {
        let mut next_tx_delay = TimerTime::MAX;
        for band in self.bands.iter_mut() {
            if !duty_cycle_on {
                band.time_off = 0;
                continue;
            }
            let elapsed = now.saturating_sub(band.last_tx_done);
            if band.time_off <= elapsed {
                band.time_off = 0;
            } else {
                next_tx_delay = next_tx_delay.min(band.time_off - elapsed);
            }
        }
        next_tx_delay
    }

    fn join_duty_cycle(elapsed_since_init: TimerTime) -> u16 {
        const HOUR: TimerTime = 3_600_000;
        if elapsed_since_init < HOUR {
            100
        } else if elapsed_since_init < 11 * HOUR {
            1_000
        } else {
            10_000
        }
    }
}

impl<R: Radio> LoRaPhy for EU868<R> {
    fn get_phy_params(&self, param: PhyParam) -> u32 {
        match param {
            PhyParam::MinTxDatarate => u32::from(TX_MIN_DATARATE),
            PhyParam::MaxTxDatarate => u32::from(TX_MAX_DATARATE),
            PhyParam::MaxRxDatarate => u32::from(RX_MAX_DATARATE),
            PhyParam::DefaultDatarate => u32::from(DEFAULT_DATARATE),
            PhyParam::DefaultTxPower => 0,
            PhyParam::DefaultMaxEirp => DEFAULT_MAX_EIRP as u32,
            PhyParam::DefaultAntennaGain => DEFAULT_ANTENNA_GAIN as u32,
            PhyParam::ReceiveDelay1 => 1_000,
            PhyParam::ReceiveDelay2 => 2_000,
            PhyParam::JoinAcceptDelay1 => 5_000,
            PhyParam::JoinAcceptDelay2 => 6_000,
            PhyParam::MaxRxWindow => 3_000,
            PhyParam::AckTimeout => 2_000,
            PhyParam::AckTimeoutRnd => 1_000,
            PhyParam::DefaultRx1DrOffset => 0,
            PhyParam::DefaultRx2Frequency => RX2_FREQUENCY,
            PhyParam::DefaultRx2Datarate => u32::from(RX2_DATARATE),
            PhyParam::DefaultAggregatedDutyCycle => 1,
            PhyParam::BeaconFrequency => BEACON_FREQUENCY,
            PhyParam::BeaconDatarate => u32::from(BEACON_DATARATE),
            PhyParam::PingSlotFrequency => PING_SLOT_FREQUENCY,
            PhyParam::PingSlotDatarate => u32::from(PING_SLOT_DATARATE),
            PhyParam::BeaconRfu1Size => BEACON_RFU1_SIZE,
            PhyParam::BeaconRfu2Size => BEACON_RFU2_SIZE,
        }
    }

    fn load_defaults(&mut self, init: InitType) {
        match init {
            InitType::All => {
                self.channels = default_channels();
                self.channel_mask = DEFAULT_CHANNEL_MASK;
                self.bands = DEFAULT_BANDS;
            }
            InitType::RestoreDefaultChannels => {
                self.channel_mask |= DEFAULT_CHANNEL_MASK;
            }
        }
    }

    fn set_public_network(&mut self, public: bool) {
        if let Err(e) = self.radio.set_public_network(public) {
            log::warn!("eu868: sync word not applied: {:?}", e);
        }
    }

    fn put_radio_to_sleep(&mut self) {
        if let Err(e) = self.radio.sleep() {
            log::warn!("eu868: radio sleep failed: {:?}", e);
        }
    }

    fn put_radio_to_standby(&mut self) {
        if let Err(e) = self.radio.standby() {
            log::warn!("eu868: radio standby failed: {:?}", e);
        }
    }

    fn get_radio_rng(&mut self) -> u32 {
        self.radio.random()
    }

    fn rx_config(&mut self, params: &RxConfigParams) -> Result<(), PhyError> {
        if params.datarate > RX_MAX_DATARATE {
            return Err(PhyError::InvalidParameter);
        }
        let frequency = if params.frequency != 0 {
            params.frequency
        } else {
            let channel = self
                .channels
                .get(usize::from(params.channel))
                .ok_or(PhyError::InvalidParameter)?;
            if channel.rx1_frequency != 0 {
                channel.rx1_frequency
            } else {
                channel.frequency
            }
        };
        let max_payload = self.max_payload(params.datarate).saturating_add(13);
        self.radio
            .configure_rx(RxConfig {
                frequency,
                modulation: modulation(params.datarate),
                symbol_timeout: params.window_timeout,
                continuous: params.rx_continuous,
                max_payload,
            })
            .map_err(|_| PhyError::Radio)
    }

    fn handle_receive(&mut self, timeout_ms: u32) -> Result<(), PhyError> {
        self.radio.receive(timeout_ms).map_err(|_| PhyError::Radio)
    }

    fn tx_config(&mut self, params: &TxConfigParams) -> Result<TxConfigResult, PhyError> {
        let channel = self
            .channels
            .get(usize::from(params.channel))
            .filter(|channel| channel.frequency != 0)
            .ok_or(PhyError::InvalidParameter)?;
        if params.datarate > TX_MAX_DATARATE || params.tx_power > MAX_TX_POWER_INDEX {
            return Err(PhyError::InvalidParameter);
        }
        let eirp = params.max_eirp - 2 * params.tx_power as i8;
        let tx_power_dbm = eirp - params.antenna_gain;
        let modulation = modulation(params.datarate);
        self.radio
            .configure_tx(TxConfig {
                power: tx_power_dbm,
                frequency: channel.frequency,
                modulation,
                preamble_len: PREAMBLE_LEN,
                timeout_ms: TX_TIMEOUT_MS,
            })
            .map_err(|_| PhyError::Radio)?;
        let time_on_air = self.radio.time_on_air(&modulation, PREAMBLE_LEN, params.pkt_len);
        Ok(TxConfigResult {
            tx_power_dbm,
            time_on_air,
        })
    }

    fn handle_send(&mut self, buffer: &[u8]) -> Result<(), PhyError> {
        self.radio.send(buffer).map_err(|_| PhyError::Radio)
    }

    fn set_next_channel(&mut self, params: &NextChannelParams) -> Result<NextChannel, PhyError> {
        let mut candidates = [0u8; MAX_NB_CHANNELS];
        let mut nb_candidates = 0;
        let mut first_blocked = None;
        let mut aggregated_time_off = params.aggregated_time_off;
        let next_tx_delay;

        let aggregated_elapsed = params.current_time.saturating_sub(params.last_aggregated_tx);
        if aggregated_time_off <= aggregated_elapsed {
            aggregated_time_off = 0;
            next_tx_delay = self.update_band_time_off(params.duty_cycle_on, params.current_time);

            for index in 0..MAX_NB_CHANNELS {
                if !self.channel_enabled(index) {
                    continue;
                }
                let channel = self.channels[index];
                if params.datarate < channel.min_dr || params.datarate > channel.max_dr {
                    continue;
                }
                if self.bands[usize::from(channel.band)].time_off > 0 {
                    if first_blocked.is_none() {
                        first_blocked = Some(index as u8);
                    }
                    continue;
                }
                candidates[nb_candidates] = index as u8;
                nb_candidates += 1;
            }
        } else {
            next_tx_delay = aggregated_time_off - aggregated_elapsed;
            first_blocked = (0..MAX_NB_CHANNELS)
                .find(|&index| self.channel_enabled(index))
                .map(|index| index as u8);
        }

        if nb_candidates > 0 {
            let pick = self.radio.random() as usize % nb_candidates;
            return Ok(NextChannel {
                channel: candidates[pick],
                time_to_wait: 0,
                aggregated_time_off,
            });
        }
        if let Some(channel) = first_blocked {
            return Ok(NextChannel {
                channel,
                time_to_wait: next_tx_delay,
                aggregated_time_off,
            });
        }

        // No channel supports the datarate, fall back on the join channels
        self.channel_mask |= DEFAULT_CHANNEL_MASK;
        Err(PhyError::NoChannel)
    }

    fn calculate_backoff(&mut self, params: &BackoffParams) {
        let Some(channel) = self.channels.get(usize::from(params.channel)) else {
            return;
        };
        let band = &mut self.bands[usize::from(channel.band)];
        let mut duty_cycle = band.duty_cycle;
        if !params.joined && params.last_tx_is_join_request {
            duty_cycle = duty_cycle.max(Self::join_duty_cycle(params.elapsed_since_init));
        } else if !params.duty_cycle_on {
            duty_cycle = 1;
        }
        let toa = TimerTime::from(params.tx_time_on_air);
        band.time_off = toa * TimerTime::from(duty_cycle) - toa;
        band.last_tx_done = params.last_tx_done;
    }

    fn compute_rx_win_params(
        &self,
        datarate: u8,
        min_rx_symbols: u8,
        rx_error_ms: u32,
        rx_slot: RxSlot,
    ) -> RxConfigParams {
        let datarate = datarate.min(RX_MAX_DATARATE);
        let modulation = modulation(datarate);
        let symbol_us = (1i64 << modulation.spreading_factor) * 1_000_000 / i64::from(modulation.bandwidth);
        let min_symbols = i64::from(min_rx_symbols);

        let timeout = div_ceil_signed(
            (2 * min_symbols - 8) * symbol_us + 2 * i64::from(rx_error_ms) * 1_000,
            symbol_us,
        )
        .max(min_symbols);
        let offset_us = 4 * symbol_us - (timeout * symbol_us) / 2 - RADIO_WAKEUP_TIME_US;

        RxConfigParams {
            channel: 0,
            frequency: 0,
            datarate,
            bandwidth: modulation.bandwidth,
            window_timeout: timeout.min(i64::from(u16::MAX)) as u16,
            window_offset: div_ceil_signed(offset_us, 1_000) as i32,
            rx_continuous: false,
            rx_slot,
        }
    }

    fn compute_beacon_win_params(&self, min_rx_symbols: u8, rx_error_ms: u32) -> Option<RxConfigParams> {
        let mut params =
            self.compute_rx_win_params(BEACON_DATARATE, min_rx_symbols, rx_error_ms, RxSlot::Beacon);
        params.frequency = BEACON_FREQUENCY;
        Some(params)
    }

    fn compute_ping_win_params(
        &self,
        datarate: u8,
        frequency: u32,
        min_rx_symbols: u8,
        rx_error_ms: u32,
    ) -> Option<RxConfigParams> {
        if datarate > RX_MAX_DATARATE {
            return None;
        }
        let mut params =
            self.compute_rx_win_params(datarate, min_rx_symbols, rx_error_ms, RxSlot::PingSlot);
        params.frequency = if frequency == 0 {
            PING_SLOT_FREQUENCY
        } else {
            frequency
        };
        Some(params)
    }

    fn apply_cf_list(&mut self, cf_list: &[u8]) {
        // Five frequencies of 3 bytes each, then the CFList type byte
        for (i, chunk) in cf_list.chunks_exact(3).take(5).enumerate() {
            let index = NB_DEFAULT_CHANNELS + i;
            let frequency = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], 0]) * 100;
            match Self::band_for(frequency) {
                Some(band) if frequency != 0 => {
                    self.channels[index] = Channel {
                        frequency,
                        rx1_frequency: 0,
                        min_dr: 0,
                        max_dr: 5,
                        band,
                    };
                    self.channel_mask |= 1 << index;
                }
                _ => {
                    self.channels[index] = Channel::default();
                    self.channel_mask &= !(1 << index);
                }
            }
        }
    }

    fn get_next_adr(&mut self, params: &AdrNextParams) -> AdrNext {
        let mut next = AdrNext {
            adr_ack_req: false,
            datarate: params.datarate,
            tx_power: params.tx_power,
            adr_ack_counter: params.adr_ack_counter,
        };
        if !params.adr_enabled {
            return next;
        }
        if params.datarate == TX_MIN_DATARATE {
            next.adr_ack_counter = 0;
            return next;
        }
        if params.adr_ack_counter >= params.adr_ack_limit {
            next.adr_ack_req = true;
            next.tx_power = 0;
        }
        if params.adr_ack_counter >= params.adr_ack_limit + params.adr_ack_delay
            && params.adr_ack_delay != 0
            && params.adr_ack_counter % params.adr_ack_delay == 1
        {
            next.datarate = self.next_lower_tx_datarate(params.datarate);
            if next.datarate == TX_MIN_DATARATE && params.update_chan_mask {
                self.load_defaults(InitType::RestoreDefaultChannels);
            }
        }
        next
    }

    fn link_adr_req(&mut self, params: &LinkAdrParams<'_>) -> LinkAdrResult {
        let mut status = 0x07u8;
        let mut consumed = 0;
        let mut mask = self.channel_mask;
        let mut datarate = params.datarate;
        let mut tx_power = params.tx_power;
        let mut nb_rep = params.nb_rep;

        while consumed + 5 <= params.payload.len() && params.payload[consumed] == 0x03 {
            let block = &params.payload[consumed..consumed + 5];
            datarate = block[1] >> 4;
            tx_power = block[1] & 0x0F;
            let ch_mask = u16::from_le_bytes([block[2], block[3]]);
            let ch_mask_cntl = (block[4] >> 4) & 0x07;
            nb_rep = block[4] & 0x0F;
            consumed += 5;

            match ch_mask_cntl {
                0 => mask = ch_mask,
                6 => {
                    mask = (0..MAX_NB_CHANNELS)
                        .filter(|&index| self.channels[index].frequency != 0)
                        .fold(0, |acc, index| acc | (1 << index));
                }
                _ => status &= 0xFE,
            }
        }

        let undefined = (0..MAX_NB_CHANNELS)
            .filter(|&index| mask & (1 << index) != 0 && self.channels[index].frequency == 0)
            .count();
        if mask == 0 || undefined > 0 {
            status &= 0xFE;
        }

        if !params.adr_enabled {
            datarate = params.datarate;
            tx_power = params.tx_power;
        } else {
            // 0xF keeps the current setting
            if datarate == 0x0F {
                datarate = params.datarate;
            }
            if tx_power == 0x0F {
                tx_power = params.tx_power;
            }
            let supported = (0..MAX_NB_CHANNELS).any(|index| {
                let channel = &self.channels[index];
                mask & (1 << index) != 0
                    && channel.frequency != 0
                    && datarate >= channel.min_dr
                    && datarate <= channel.max_dr
            });
            if !self.verify_datarate(datarate) || !supported {
                status &= 0xFD;
            }
            if !self.verify_tx_power(tx_power) {
                status &= 0xFB;
            }
        }

        if status == 0x07 {
            self.channel_mask = mask;
            if nb_rep == 0 {
                nb_rep = 1;
            }
            LinkAdrResult {
                status,
                datarate,
                tx_power,
                nb_rep,
                consumed,
            }
        } else {
            LinkAdrResult {
                status,
                datarate: params.datarate,
                tx_power: params.tx_power,
                nb_rep: params.nb_rep,
                consumed,
            }
        }
    }

    fn rx_param_setup_req(&mut self, params: &RxParamSetup) -> u8 {
        let mut status = 0x07;
        if !Self::frequency_valid(params.frequency) {
            status &= 0xFE;
        }
        if params.datarate > RX_MAX_DATARATE {
            status &= 0xFD;
        }
        if params.dr_offset > MAX_RX1_DR_OFFSET {
            status &= 0xFB;
        }
        status
    }

    fn new_channel_req(&mut self, params: &NewChannelParams) -> u8 {
        let index = usize::from(params.index);
        if index < NB_DEFAULT_CHANNELS || index >= MAX_NB_CHANNELS {
            return 0;
        }
        if params.frequency == 0 {
            self.channels[index] = Channel::default();
            self.channel_mask &= !(1 << index);
            return 0x03;
        }

        let mut status = 0x03;
        let band = Self::band_for(params.frequency);
        if band.is_none() || !Self::frequency_valid(params.frequency) {
            status &= 0xFE;
        }
        if params.min_dr > params.max_dr || params.max_dr > TX_MAX_DATARATE {
            status &= 0xFD;
        }
        if let (0x03, Some(band)) = (status, band) {
            self.channels[index] = Channel {
                frequency: params.frequency,
                rx1_frequency: 0,
                min_dr: params.min_dr,
                max_dr: params.max_dr,
                band,
            };
            self.channel_mask |= 1 << index;
        }
        status
    }

    fn dl_channel_req(&mut self, index: u8, frequency: u32) -> u8 {
        let mut status = 0x03;
        if !Self::frequency_valid(frequency) {
            status &= 0xFE;
        }
        let exists = self
            .channels
            .get(usize::from(index))
            .map(|channel| channel.frequency != 0)
            .unwrap_or(false);
        if !exists {
            status &= 0xFD;
        }
        if status == 0x03 {
            self.channels[usize::from(index)].rx1_frequency = frequency;
        }
        status
    }

    fn tx_param_setup_req(&mut self, _payload: u8) -> bool {
        false
    }

    fn next_lower_tx_datarate(&self, datarate: u8) -> u8 {
        datarate.saturating_sub(1).max(TX_MIN_DATARATE)
    }

    fn alternate_datarate(&self, nb_trials: u16) -> u8 {
        if nb_trials % 48 == 0 {
            0
        } else if nb_trials % 32 == 0 {
            1
        } else if nb_trials % 24 == 0 {
            2
        } else if nb_trials % 16 == 0 {
            3
        } else if nb_trials % 8 == 0 {
            4
        } else {
            5
        }
    }

    fn apply_dr_offset(&self, datarate: u8, dr_offset: u8) -> u8 {
        datarate.saturating_sub(dr_offset).max(TX_MIN_DATARATE)
    }

    fn max_payload(&self, datarate: u8) -> u8 {
        MAX_PAYLOAD[usize::from(datarate.min(RX_MAX_DATARATE))]
    }

    fn verify_datarate(&self, datarate: u8) -> bool {
        (TX_MIN_DATARATE..=TX_MAX_DATARATE).contains(&datarate)
    }

    fn verify_tx_power(&self, tx_power: u8) -> bool {
        tx_power <= MAX_TX_POWER_INDEX
    }

    fn verify_frequency(&self, frequency: u32) -> bool {
        Self::frequency_valid(frequency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct NullRadio;

    impl Radio for NullRadio {
        type Error = ();

        fn configure_tx(&mut self, _config: TxConfig) -> Result<(), ()> {
            Ok(())
        }
        fn configure_rx(&mut self, _config: RxConfig) -> Result<(), ()> {
            Ok(())
        }
        fn send(&mut self, _buffer: &[u8]) -> Result<(), ()> {
            Ok(())
        }
        fn receive(&mut self, _timeout_ms: u32) -> Result<(), ()> {
            Ok(())
        }
        fn sleep(&mut self) -> Result<(), ()> {
            Ok(())
        }
        fn standby(&mut self) -> Result<(), ()> {
            Ok(())
        }
        fn random(&mut self) -> u32 {
            4
        }
        fn set_public_network(&mut self, _public: bool) -> Result<(), ()> {
            Ok(())
        }
    }

    fn next_channel_params(now: TimerTime) -> NextChannelParams {
        NextChannelParams {
            aggregated_time_off: 0,
            last_aggregated_tx: 0,
            current_time: now,
            datarate: 5,
            joined: true,
            duty_cycle_on: true,
        }
    }

    #[test]
    fn band_time_off_delays_the_next_transmission() {
        let mut region = EU868::new(NullRadio);
        let first = region.set_next_channel(&next_channel_params(0)).unwrap();
        assert_eq!(first.time_to_wait, 0);

        region.calculate_backoff(&BackoffParams {
            joined: true,
            last_tx_is_join_request: false,
            duty_cycle_on: true,
            channel: first.channel,
            elapsed_since_init: 0,
            tx_time_on_air: 50,
            last_tx_done: 1_000,
        });

        // 1% band: 50 ms on air blocks the band for 4950 ms
        let blocked = region.set_next_channel(&next_channel_params(2_000)).unwrap();
        assert_eq!(blocked.time_to_wait, 3_950);
        let free = region.set_next_channel(&next_channel_params(6_000)).unwrap();
        assert_eq!(free.time_to_wait, 0);
    }

    #[test]
    fn unsupported_datarate_restores_join_channels() {
        let mut region = EU868::new(NullRadio);
        let mut params = next_channel_params(0);
        params.datarate = 6;
        assert_eq!(region.set_next_channel(&params), Err(PhyError::NoChannel));
        assert_eq!(region.channel_mask() & DEFAULT_CHANNEL_MASK, DEFAULT_CHANNEL_MASK);
    }

    #[test]
    fn cf_list_adds_channels() {
        let mut region = EU868::new(NullRadio);
        // 867.1 MHz and 867.3 MHz, three empty entries, CFList type
        let mut cf_list = [0u8; 16];
        cf_list[0..3].copy_from_slice(&(8_671_000u32).to_le_bytes()[..3]);
        cf_list[3..6].copy_from_slice(&(8_673_000u32).to_le_bytes()[..3]);
        region.apply_cf_list(&cf_list);
        assert_eq!(region.channels()[3].frequency, 867_100_000);
        assert_eq!(region.channels()[4].frequency, 867_300_000);
        assert_eq!(region.channel_mask(), 0x001F);
    }

    #[test]
    fn link_adr_req_applies_mask_and_datarate() {
        let mut region = EU868::new(NullRadio);
        let payload = [0x03, 0x52, 0x03, 0x00, 0x01];
        let result = region.link_adr_req(&LinkAdrParams {
            payload: &payload,
            adr_enabled: true,
            datarate: 0,
            tx_power: 0,
            nb_rep: 1,
        });
        assert_eq!(result.status, 0x07);
        assert_eq!(result.datarate, 5);
        assert_eq!(result.tx_power, 2);
        assert_eq!(result.consumed, 5);
        assert_eq!(region.channel_mask(), 0x0003);
    }

    #[test]
    fn link_adr_req_rejects_undefined_channels() {
        let mut region = EU868::new(NullRadio);
        let payload = [0x03, 0x52, 0xFF, 0x00, 0x01];
        let result = region.link_adr_req(&LinkAdrParams {
            payload: &payload,
            adr_enabled: true,
            datarate: 0,
            tx_power: 0,
            nb_rep: 1,
        });
        assert_eq!(result.status & 0x01, 0);
        assert_eq!(result.datarate, 0);
        assert_eq!(region.channel_mask(), DEFAULT_CHANNEL_MASK);
    }

    #[test]
    fn adr_backoff_requests_ack_then_lowers_datarate() {
        let mut region = EU868::new(NullRadio);
        let mut params = AdrNextParams {
            adr_enabled: true,
            adr_ack_counter: 64,
            datarate: 5,
            tx_power: 3,
            update_chan_mask: true,
            adr_ack_limit: 64,
            adr_ack_delay: 32,
        };
        let next = region.get_next_adr(&params);
        assert!(next.adr_ack_req);
        assert_eq!(next.datarate, 5);
        assert_eq!(next.tx_power, 0);

        params.adr_ack_counter = 97;
        let next = region.get_next_adr(&params);
        assert_eq!(next.datarate, 4);
    }

    #[test]
    fn rx_window_parameters_follow_symbol_time() {
        let region = EU868::new(NullRadio);
        // SF12: 32.768 ms symbols, timeout stays at the minimum
        let params = region.compute_rx_win_params(0, 6, 10, RxSlot::Rx1);
        assert_eq!(params.window_timeout, 6);
        assert_eq!(params.window_offset, 32);
        // SF7: 1.024 ms symbols, rx error dominates
        let params = region.compute_rx_win_params(5, 6, 10, RxSlot::Rx2);
        assert_eq!(params.window_timeout, 24);
        assert_eq!(params.window_offset, -9);
    }
}
