use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
    #[error("spreading factor {0} outside 6..=12")]
    SpreadingFactor(u8),
    #[error("coding rate denominator {0} outside 5..=8")]
    CodingRate(u8),
}

/// Knobs of the ARQ transport. Defaults match the deployed Go-Back-N firmware.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArqConfig {
    /// Text bytes per fragment.
    pub frag_chunk: usize,
    /// Go-Back-N window size; `1` degenerates to stop-and-wait.
    pub window_size: usize,
    /// Per-slot fragment acknowledgment timeout.
    pub ack_timeout_ms: u64,
    /// Pause between consecutive fragment transmissions.
    pub frag_spacing_ms: u64,
    /// Final ACK wait for a single-frame message.
    pub final_ack_timeout_ms: u64,
    /// Extra final ACK wait added per fragment of a fragmented message.
    pub per_fragment_margin_ms: u64,
    /// Whole-message attempts before giving up.
    pub max_tries: u32,
    /// A window attempt fails once it has run this many ack timeouts.
    pub window_ceiling_factor: u64,
    pub single_retry_backoff_ms: u64,
    pub fragmented_retry_backoff_ms: u64,
    /// Largest fragment count a receiver will allocate a reassembly for.
    pub max_fragments: u32,
    /// Idle sleep of the poll loops.
    pub poll_interval_ms: u64,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            frag_chunk: 200,
            window_size: 4,
            ack_timeout_ms: 2000,
            frag_spacing_ms: 20,
            final_ack_timeout_ms: 1800,
            per_fragment_margin_ms: 300,
            max_tries: 3,
            window_ceiling_factor: 3,
            single_retry_backoff_ms: 100,
            fragmented_retry_backoff_ms: 150,
            max_fragments: 256,
            poll_interval_ms: 1,
        }
    }
}

impl ArqConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frag_chunk == 0 {
            return Err(ConfigError::Zero("frag_chunk"));
        }
        if self.window_size == 0 {
            return Err(ConfigError::Zero("window_size"));
        }
        if self.max_tries == 0 {
            return Err(ConfigError::Zero("max_tries"));
        }
        if self.ack_timeout_ms == 0 {
            return Err(ConfigError::Zero("ack_timeout_ms"));
        }
        if self.max_fragments == 0 {
            return Err(ConfigError::Zero("max_fragments"));
        }
        Ok(())
    }

    /// Final ACK deadline after a fragmented message's window retired.
    pub fn fragmented_final_ack_timeout_ms(&self, total: u32) -> u64 {
        self.final_ack_timeout_ms + u64::from(total) * self.per_fragment_margin_ms
    }

    /// Elapsed window time after which an attempt is abandoned.
    pub fn window_ceiling_ms(&self) -> u64 {
        self.ack_timeout_ms * self.window_ceiling_factor
    }
}

/// LoRa modulation parameters, used for airtime estimation only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RadioConfig {
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    /// Denominator of the 4/x coding rate.
    pub coding_rate_denominator: u8,
    pub crc: bool,
    pub explicit_header: bool,
    /// `None` enables it automatically for SF11/SF12 at 125 kHz.
    pub low_data_rate_optimize: Option<bool>,
    pub preamble_symbols: u16,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            spreading_factor: 8,
            bandwidth_hz: 125_000,
            coding_rate_denominator: 5,
            crc: true,
            explicit_header: true,
            low_data_rate_optimize: None,
            preamble_symbols: 8,
        }
    }
}

impl RadioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(6..=12).contains(&self.spreading_factor) {
            return Err(ConfigError::SpreadingFactor(self.spreading_factor));
        }
        if !(5..=8).contains(&self.coding_rate_denominator) {
            return Err(ConfigError::CodingRate(self.coding_rate_denominator));
        }
        if self.bandwidth_hz == 0 {
            return Err(ConfigError::Zero("bandwidth_hz"));
        }
        Ok(())
    }

    pub fn low_data_rate_optimize(&self) -> bool {
        self.low_data_rate_optimize
            .unwrap_or(self.spreading_factor >= 11 && self.bandwidth_hz == 125_000)
    }
}

/// Channel model of the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub loss_rate: f64,
    pub min_latency: u64,
    pub max_latency: u64,
    pub seed: u64,
    /// Delay each arrival by the frame's estimated airtime.
    pub model_airtime: bool,
    pub rssi: i16,
    pub snr: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            min_latency: 5,
            max_latency: 20,
            seed: 0,
            model_airtime: true,
            rssi: -92,
            snr: 7.5,
        }
    }
}
