/// EUI-64 (8 bytes, stored MSB first as printed on the device label)
pub type EUI64 = [u8; 8];
/// AES-128 key (16 bytes)
pub type AESKey = [u8; 16];
/// Device Address (32 bits, serialized little-endian on air)
pub type DevAddr = u32;

/// LoRaWAN device class
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// Class A: Uplink followed by two receive windows
    A,
    /// Class B: Scheduled receive slots (beaconing)
    B,
    /// Class C: Continuously listening except when transmitting
    C,
}

/// Device activation state
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    /// Device is not activated
    Idle,
    /// Device is activated through OTAA
    OTAAActivated,
    /// Device is activated through ABP
    ABPActivated,
}

/// Device configuration for both OTAA and ABP activation
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device EUI (unique device identifier)
    pub dev_eui: EUI64,
    /// Application EUI
    pub app_eui: EUI64,
    /// Application key (used for OTAA)
    pub app_key: AESKey,
    /// Network identifier (used for ABP)
    pub net_id: u32,
    /// Device address (used for ABP or assigned during OTAA)
    pub dev_addr: Option<DevAddr>,
    /// Network session key (used for ABP or derived during OTAA)
    pub nwk_skey: Option<AESKey>,
    /// Application session key (used for ABP or derived during OTAA)
    pub app_skey: Option<AESKey>,
}

impl DeviceConfig {
    /// Create a new OTAA device configuration
    pub fn new_otaa(dev_eui: EUI64, app_eui: EUI64, app_key: AESKey) -> Self {
        Self {
            dev_eui,
            app_eui,
            app_key,
            net_id: 0,
            dev_addr: None,
            nwk_skey: None,
            app_skey: None,
        }
    }

    /// Create a new ABP device configuration
    pub fn new_abp(
        dev_eui: EUI64,
        app_eui: EUI64,
        net_id: u32,
        dev_addr: DevAddr,
        nwk_skey: AESKey,
        app_skey: AESKey,
    ) -> Self {
        Self {
            dev_eui,
            app_eui,
            app_key: [0; 16], // Not used in ABP
            net_id,
            dev_addr: Some(dev_addr),
            nwk_skey: Some(nwk_skey),
            app_skey: Some(app_skey),
        }
    }
}

/// MAC system parameters shared by every region
#[derive(Debug, Clone)]
pub struct MacConfig {
    /// Maximum timing error of the receiver in milliseconds
    pub max_rx_error_ms: u32,
    /// Minimum number of symbols to detect a frame
    pub min_rx_symbols: u8,
    /// Maximum allowed gap between the expected and received downlink counter
    pub max_fcnt_gap: u32,
    /// Upper bound on confirmed uplink retransmissions
    pub max_ack_retries: u8,
    /// Period of the MAC state check while a cycle is running (ms)
    pub mac_state_check_timeout_ms: u32,
    /// Number of uplinks without downlink before ADRACKReq is set
    pub adr_ack_limit: u16,
    /// Number of further uplinks before the datarate is lowered
    pub adr_ack_delay: u16,
    /// Adaptive data rate enabled at start-up
    pub adr_on: bool,
    /// Regulatory duty cycle enforcement
    pub duty_cycle_on: bool,
    /// Public (true) or private network sync word
    pub public_network: bool,
    /// Keep the uplink counter fixed (certification only)
    pub uplink_counter_fixed: bool,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            max_rx_error_ms: 10,
            min_rx_symbols: 6,
            max_fcnt_gap: 16_384,
            max_ack_retries: 8,
            mac_state_check_timeout_ms: 1_000,
            adr_ack_limit: 64,
            adr_ack_delay: 32,
            adr_on: true,
            duty_cycle_on: true,
            public_network: true,
            uplink_counter_fixed: false,
        }
    }
}

/// Receive window expansion parameters
///
/// Both the symbol timeout and the window movement are multiplied by
/// `factor` on every missed beacon/ping slot and capped at their maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowExpansionConfig {
    /// Symbol timeout used after a successful reception
    pub default_timeout: u16,
    /// Largest symbol timeout
    pub max_timeout: u16,
    /// Window movement (ms) used after a successful reception
    pub default_movement_ms: u32,
    /// Largest window movement (ms)
    pub max_movement_ms: u32,
    /// Geometric growth factor
    pub factor: u8,
}

/// Class B configuration
#[derive(Debug, Clone)]
pub struct ClassBConfig {
    /// Ping slot periodicity (0-7): 2^(7 - periodicity) slots per beacon period
    pub ping_slot_periodicity: u8,
    /// Number of beacon intervals spent searching before acquisition fails
    pub beacon_acquisition_nb_trials: u8,
    /// Consecutive beacon misses before the beacon is declared lost
    pub max_missed_beacons: u8,
    /// Beacon window expansion
    pub beacon_expansion: WindowExpansionConfig,
    /// Ping slot window expansion
    pub ping_expansion: WindowExpansionConfig,
}

impl Default for ClassBConfig {
    fn default() -> Self {
        Self {
            ping_slot_periodicity: 7,
            beacon_acquisition_nb_trials: 2,
            // 120 minutes without beacon
            max_missed_beacons: 56,
            beacon_expansion: WindowExpansionConfig {
                default_timeout: 8,
                max_timeout: 256,
                default_movement_ms: 2,
                max_movement_ms: 256,
                factor: 2,
            },
            ping_expansion: WindowExpansionConfig {
                default_timeout: 8,
                max_timeout: 64,
                default_movement_ms: 2,
                max_movement_ms: 64,
                factor: 2,
            },
        }
    }
}
