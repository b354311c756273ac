use bytes::Bytes;
use serde::Serialize;

use crate::event::EventRecord;
use crate::frame::NodeId;

/// A datagram pulled from the radio together with its signal metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub payload: Bytes,
    pub rssi: Option<i16>,
    pub snr: Option<f32>,
}

impl Received {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            rssi: None,
            snr: None,
        }
    }

    pub fn with_signal(mut self, rssi: i16, snr: f32) -> Self {
        self.rssi = Some(rssi);
        self.snr = Some(snr);
        self
    }
}

/// A complete message handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub from: NodeId,
    pub seq: u32,
    pub text: Bytes,
    /// 1 for a single-frame message.
    pub fragments: u32,
}

/// Outcome statistics of a message confirmed by a final ACK.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendReport {
    pub seq: u32,
    pub attempts: u32,
    pub fragments: u32,
    pub acked_by: NodeId,
    pub peer_rx_bytes: u64,
    pub peer_rx_packets: u64,
    /// Packet delivery ratio in percent.
    pub pdr: f64,
    pub goodput_bps: f64,
}

/// Operator-facing status updates (display / console).
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Attempt { seq: u32, attempt: u32, max: u32 },
    Delivered(SendReport),
    Failed { seq: u32, attempts: u32 },
}

/// Everything an ARQ node needs from its host: radio, clock, and outputs.
/// The simulator and the real node binary both implement it.
pub trait SystemContext {
    /// Transmit one datagram. Failures are indistinguishable from channel loss.
    fn send_frame(&mut self, frame: Bytes);

    /// Non-blocking poll of the radio.
    fn try_receive(&mut self) -> Option<Received>;

    /// Estimated on-air time of a payload of `payload_len` bytes.
    fn airtime_ms(&self, payload_len: usize) -> f64;

    /// Monotonic milliseconds since the node started.
    fn now(&self) -> u64;

    /// Block for `ms` milliseconds.
    fn sleep(&mut self, ms: u64);

    /// Hand a complete inbound message to the application layer.
    fn deliver(&mut self, delivery: Delivery);

    fn notify(&mut self, _notice: Notice) {
        // Headless hosts have no display.
    }

    /// Append one record to the event log.
    fn record_event(&mut self, _record: EventRecord) {}
}
