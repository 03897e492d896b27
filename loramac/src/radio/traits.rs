/// Radio modulation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModulationParams {
    /// Spreading factor (SF7-SF12)
    pub spreading_factor: u8,
    /// Bandwidth in Hz
    pub bandwidth: u32,
    /// Coding rate denominator (5 = 4/5 ... 8 = 4/8)
    pub coding_rate: u8,
}

/// Radio transmission parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxConfig {
    /// Transmission power in dBm
    pub power: i8,
    /// Frequency in Hz
    pub frequency: u32,
    /// Modulation parameters
    pub modulation: ModulationParams,
    /// Preamble length in symbols
    pub preamble_len: u16,
    /// Transmission watchdog in milliseconds
    pub timeout_ms: u32,
}

/// Radio receive parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxConfig {
    /// Frequency in Hz
    pub frequency: u32,
    /// Modulation parameters
    pub modulation: ModulationParams,
    /// Single reception timeout in symbols
    pub symbol_timeout: u16,
    /// Continuous reception (Class C RX2, beacon search)
    pub continuous: bool,
    /// Largest accepted payload
    pub max_payload: u8,
}

/// Generic radio interface trait
///
/// Calls only start operations. Completion (`TxDone`, `RxDone`,
/// `RxTimeout`, ...) is reported later through the event queue.
pub trait Radio {
    /// Error type for radio operations
    type Error: core::fmt::Debug;

    /// Configure the radio for transmission
    fn configure_tx(&mut self, config: TxConfig) -> Result<(), Self::Error>;

    /// Configure the radio for reception
    fn configure_rx(&mut self, config: RxConfig) -> Result<(), Self::Error>;

    /// Start transmitting `buffer`
    fn send(&mut self, buffer: &[u8]) -> Result<(), Self::Error>;

    /// Start receiving; a zero timeout keeps receiving until stopped
    fn receive(&mut self, timeout_ms: u32) -> Result<(), Self::Error>;

    /// Put the radio into sleep mode
    fn sleep(&mut self) -> Result<(), Self::Error>;

    /// Put the radio into standby mode
    fn standby(&mut self) -> Result<(), Self::Error>;

    /// Random number from the radio's wideband RSSI noise
    fn random(&mut self) -> u32;

    /// Select the public or private LoRaWAN sync word
    fn set_public_network(&mut self, public: bool) -> Result<(), Self::Error>;

    /// Time on air of a LoRa frame in milliseconds
    ///
    /// Explicit header, CRC on, low data rate optimization for symbols of
    /// 16 ms and longer.
    fn time_on_air(&self, modulation: &ModulationParams, preamble_len: u16, payload_len: u8) -> u32 {
        lora_time_on_air(modulation, preamble_len, payload_len)
    }
}

/// LoRa time on air in milliseconds, rounded up
pub fn lora_time_on_air(modulation: &ModulationParams, preamble_len: u16, payload_len: u8) -> u32 {
    let sf = i64::from(modulation.spreading_factor);
    let bw = i64::from(modulation.bandwidth.max(1));
    let cr = i64::from(modulation.coding_rate.clamp(5, 8)) - 4;
    let symbol_us = (1i64 << sf) * 1_000_000 / bw;
    let low_dr_optimize = if symbol_us >= 16_000 { 1 } else { 0 };

    let numerator = 8 * i64::from(payload_len) - 4 * sf + 28 + 16;
    let denominator = 4 * (sf - 2 * low_dr_optimize);
    let blocks = if numerator > 0 {
        (numerator + denominator - 1) / denominator
    } else {
        0
    };
    let payload_symbols = 8 + blocks * (cr + 4);

    // Preamble lasts preamble_len + 4.25 symbols; count in quarter symbols
    let quarter_symbols = 4 * i64::from(preamble_len) + 17 + 4 * payload_symbols;
    let toa_us = quarter_symbols * (1i64 << sf) * 1_000_000 / (4 * bw);
    ((toa_us + 999) / 1_000) as u32
}
