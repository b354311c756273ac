use lora_arq_abstract::{ArqConfig, EventRecord, FrameKind, NodeId, SendReport, SimConfig};
use serde::Serialize;

use crate::engine::LinkEventSummary;

/// One transmission put on the medium.
#[derive(Debug, Clone, Serialize)]
pub struct FrameRecord {
    pub time: u64,
    pub from: NodeId,
    /// `None` for datagrams that do not decode.
    pub kind: Option<FrameKind>,
    pub seq: Option<u32>,
    pub index: Option<u32>,
    pub bytes: usize,
    pub airtime_ms: f64,
    /// Removed by a deterministic drop rule before reaching anyone.
    pub dropped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub time: u64,
    pub to: NodeId,
    pub from: NodeId,
    pub seq: u32,
    pub text: String,
    pub fragments: u32,
}

/// How one submitted message ended.
#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub from: NodeId,
    pub to: Option<NodeId>,
    /// `None` when the message was refused before a sequence was assigned.
    pub seq: Option<u32>,
    pub submitted_at: u64,
    pub started_at: u64,
    pub finished_at: u64,
    pub attempts: u32,
    pub report: Option<SendReport>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn succeeded(&self) -> bool {
        self.report.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub arq: ArqConfig,
    pub nodes: Vec<NodeId>,
    pub duration_ms: u64,
    pub frames: Vec<FrameRecord>,
    pub deliveries: Vec<DeliveryRecord>,
    pub outcomes: Vec<SendOutcome>,
    pub link_events: Vec<LinkEventSummary>,
    pub events: Vec<EventRecord>,
}

impl SimulationReport {
    /// Transmissions of `kind`, optionally only those by `from`.
    pub fn frame_count(&self, kind: FrameKind, from: Option<&NodeId>) -> u32 {
        self.frames
            .iter()
            .filter(|f| f.kind == Some(kind))
            .filter(|f| from.is_none_or(|from| &f.from == from))
            .count() as u32
    }

    pub fn outcome(&self, from: &NodeId, seq: u32) -> Option<&SendOutcome> {
        self.outcomes
            .iter()
            .find(|o| &o.from == from && o.seq == Some(seq))
    }

    /// The iterator owns its copy of `to`, so a temporary id is fine.
    pub fn deliveries_to<'a>(
        &'a self,
        to: &NodeId,
    ) -> impl Iterator<Item = &'a DeliveryRecord> + use<'a> {
        let to = to.clone();
        self.deliveries.iter().filter(move |d| d.to == to)
    }
}
