use crate::config::{ArqConfig, RadioConfig, SimConfig};
use crate::frame::FrameKind;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Node ids present on the channel.
    pub nodes: Vec<String>,
    #[serde(default)]
    pub config: SimConfigOverride,
    #[serde(default)]
    pub arq: ArqConfigOverride,
    /// Modulation used for airtime; defaults when absent.
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub actions: Vec<TestAction>,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimConfigOverride {
    pub loss_rate: Option<f64>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub seed: Option<u64>,
    pub model_airtime: Option<bool>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.model_airtime {
            config.model_airtime = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ArqConfigOverride {
    pub frag_chunk: Option<usize>,
    pub window_size: Option<usize>,
    pub ack_timeout_ms: Option<u64>,
    pub final_ack_timeout_ms: Option<u64>,
    pub per_fragment_margin_ms: Option<u64>,
    pub max_tries: Option<u32>,
}

impl ArqConfigOverride {
    pub fn apply_to(&self, config: &mut ArqConfig) {
        if let Some(v) = self.frag_chunk {
            config.frag_chunk = v;
        }
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.ack_timeout_ms {
            config.ack_timeout_ms = v;
        }
        if let Some(v) = self.final_ack_timeout_ms {
            config.final_ack_timeout_ms = v;
        }
        if let Some(v) = self.per_fragment_margin_ms {
            config.per_fragment_margin_ms = v;
        }
        if let Some(v) = self.max_tries {
            config.max_tries = v;
        }
    }
}

/// Deterministic loss: drop frames matching every given field.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DropRule {
    pub kind: FrameKind,
    /// Transmitting node; any when absent.
    pub from: Option<String>,
    pub seq: Option<u32>,
    pub index: Option<u32>,
    /// Number of matching frames to drop; all of them when absent.
    pub count: Option<u32>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Node `from` submits a message at `time`.
    /// Either `text` is sent verbatim or `length` bytes of generated text.
    Send {
        time: u64,
        from: String,
        to: Option<String>,
        text: Option<String>,
        length: Option<usize>,
    },
    DropFrames(DropRule),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// `to` received a message with exactly this text (or generated length).
    Delivered {
        to: String,
        text: Option<String>,
        length: Option<usize>,
    },
    /// Number of times `to` handed a message to its application.
    DeliveryCount { to: String, count: usize },
    SendSucceeded { from: String, seq: u32 },
    SendFailed { from: String, seq: u32 },
    /// Whole-message attempts used by `from` for `seq`.
    Attempts { from: String, seq: u32, count: u32 },
    /// Frames of `kind` put on the air, optionally only by `from`.
    FrameCount {
        kind: FrameKind,
        from: Option<String>,
        min: u32,
        max: Option<u32>,
    },
    /// Simulation finishes within `ms`.
    MaxDuration { ms: u64 },
}

/// Deterministic filler text used by `length`-based actions and assertions.
pub fn generated_text(length: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    (0..length)
        .map(|i| ALPHABET[i % ALPHABET.len()] as char)
        .collect()
}
