use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Destination meaning "any peer may accept".
pub const BROADCAST_ID: &str = "FF";

/// Hex identity of a node on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn broadcast() -> Self {
        Self(BROADCAST_ID.to_string())
    }

    /// 12 hex digits: upper 16 bits then lower 32 bits of a 48-bit hardware id (e.g. a MAC).
    pub fn from_hardware_id(id: u64) -> Self {
        Self(format!("{:04X}{:08X}", (id >> 32) as u16, id as u32))
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_ID
    }

    /// True when a frame addressed to `dst` is meant for this node.
    pub fn accepts(&self, dst: &NodeId) -> bool {
        dst.is_broadcast() || dst == self
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Data,
    Fragment,
    Ack,
    FragmentAck,
}

impl FrameKind {
    /// Wire prefix including the trailing delimiter.
    pub fn prefix(&self) -> &'static str {
        match self {
            FrameKind::Data => "MSG,",
            FrameKind::Fragment => "MSGF,",
            FrameKind::Ack => "ACK,",
            FrameKind::FragmentAck => "ACKF,",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().trim_end_matches(','))
    }
}

/// A whole message carried in one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub src: NodeId,
    pub dst: NodeId,
    pub seq: u32,
    pub text: Bytes,
}

/// One slice of a fragmented message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentFrame {
    pub src: NodeId,
    pub dst: NodeId,
    pub seq: u32,
    pub index: u32,
    pub total: u32,
    pub chunk: Bytes,
}

/// Per-fragment acknowledgment, cumulative on the sender side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentAckFrame {
    pub acker: NodeId,
    pub orig_src: NodeId,
    pub seq: u32,
    pub index: u32,
}

/// End-to-end acknowledgment carrying the receiver's running totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    pub acker: NodeId,
    pub orig_src: NodeId,
    pub seq: u32,
    pub rx_total_bytes: u64,
    pub rx_total_packets: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    Fragment(FragmentFrame),
    Ack(AckFrame),
    FragmentAck(FragmentAckFrame),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Data(_) => FrameKind::Data,
            Frame::Fragment(_) => FrameKind::Fragment,
            Frame::Ack(_) => FrameKind::Ack,
            Frame::FragmentAck(_) => FrameKind::FragmentAck,
        }
    }

    pub fn seq(&self) -> u32 {
        match self {
            Frame::Data(f) => f.seq,
            Frame::Fragment(f) => f.seq,
            Frame::Ack(f) => f.seq,
            Frame::FragmentAck(f) => f.seq,
        }
    }

    /// Fragment index for the two fragment-level kinds.
    pub fn index(&self) -> Option<u32> {
        match self {
            Frame::Fragment(f) => Some(f.index),
            Frame::FragmentAck(f) => Some(f.index),
            Frame::Data(_) | Frame::Ack(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_id_renders_twelve_hex_digits() {
        let id = NodeId::from_hardware_id(0x0000_A1B2_C3D4_E5F6);
        assert_eq!(id.as_str(), "A1B2C3D4E5F6");
        assert_eq!(NodeId::from_hardware_id(1).as_str(), "000000000001");
    }

    #[test]
    fn accepts_own_id_and_broadcast_only() {
        let me = NodeId::new("AAAA00000001");
        assert!(me.accepts(&NodeId::broadcast()));
        assert!(me.accepts(&NodeId::new("AAAA00000001")));
        assert!(!me.accepts(&NodeId::new("BBBB00000002")));
    }

    #[test]
    fn kind_display_drops_delimiter() {
        assert_eq!(FrameKind::FragmentAck.to_string(), "ACKF");
        assert_eq!(FrameKind::Data.prefix(), "MSG,");
    }
}
