use serde::Serialize;
use std::fmt;

use crate::frame::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    #[serde(rename = "TX")]
    Tx,
    #[serde(rename = "RX")]
    Rx,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Tx => "TX",
            Role::Rx => "RX",
        }
    }
}

/// Protocol events recorded in the per-node event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    SessionStart,
    DataTx,
    DataRx,
    FragmentTx,
    FragmentRx,
    AckTx,
    AckRx,
    FragmentAckTx,
    FragmentAckRx,
    WaitFragmentAckStart,
    WaitFragmentAckOk,
    WaitFragmentAckTimeout,
    WaitAckStart,
    WaitAckOk,
    WaitAckTimeout,
    RetryMessage,
    RetryFragmentWindow,
    Abort,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStart => "SESSION_START",
            EventKind::DataTx => "DATA_TX",
            EventKind::DataRx => "DATA_RX",
            EventKind::FragmentTx => "FRAGMENT_TX",
            EventKind::FragmentRx => "FRAGMENT_RX",
            EventKind::AckTx => "ACK_TX",
            EventKind::AckRx => "ACK_RX",
            EventKind::FragmentAckTx => "FRAGMENT_ACK_TX",
            EventKind::FragmentAckRx => "FRAGMENT_ACK_RX",
            EventKind::WaitFragmentAckStart => "WAIT_FRAGMENT_ACK_START",
            EventKind::WaitFragmentAckOk => "WAIT_FRAGMENT_ACK_OK",
            EventKind::WaitFragmentAckTimeout => "WAIT_FRAGMENT_ACK_TIMEOUT",
            EventKind::WaitAckStart => "WAIT_ACK_START",
            EventKind::WaitAckOk => "WAIT_ACK_OK",
            EventKind::WaitAckTimeout => "WAIT_ACK_TIMEOUT",
            EventKind::RetryMessage => "RETRY_MESSAGE",
            EventKind::RetryFragmentWindow => "RETRY_FRAGMENT_WINDOW",
            EventKind::Abort => "ABORT",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the event log. Absent numeric fields render as `-1`,
/// absent signal metadata as `-`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub node: NodeId,
    pub role: Role,
    pub event: EventKind,
    pub seq: Option<u32>,
    pub index: Option<u32>,
    pub total: Option<u32>,
    pub bytes: usize,
    pub rssi: Option<i16>,
    pub snr: Option<f32>,
    pub airtime_ms: f64,
    pub t_ms: u64,
    pub dt_ms: u64,
}

pub const EVENT_CSV_HEADER: &str = "nodeId,role,event,seq,idx,tot,bytes,rssi,snr,toa_ms,t_ms,dt_ms";

impl EventRecord {
    /// Comma-separated fields in [`EVENT_CSV_HEADER`] order.
    pub fn to_csv(&self) -> String {
        fn num(v: Option<u32>) -> String {
            v.map_or_else(|| "-1".to_string(), |v| v.to_string())
        }
        let rssi = self.rssi.map_or_else(|| "-".to_string(), |v| v.to_string());
        let snr = self.snr.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"));
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            self.node,
            self.role.as_str(),
            self.event,
            num(self.seq),
            num(self.index),
            num(self.total),
            self.bytes,
            rssi,
            snr,
            self.airtime_ms.round() as i64,
            self.t_ms,
            self.dt_ms
        )
    }
}
