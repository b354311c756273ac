use std::io::{self, Write};

use lora_arq_abstract::{
    EVENT_CSV_HEADER, EventKind, EventRecord, NodeId, Received, Role, SystemContext,
};

/// Optional columns of one event record.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EventDetail {
    pub seq: Option<u32>,
    pub index: Option<u32>,
    pub total: Option<u32>,
    pub bytes: usize,
    pub rssi: Option<i16>,
    pub snr: Option<f32>,
    pub airtime_ms: f64,
}

impl EventDetail {
    pub fn seq(seq: u32) -> Self {
        Self {
            seq: Some(seq),
            ..Default::default()
        }
    }

    pub fn fragment(seq: u32, index: u32, total: Option<u32>) -> Self {
        Self {
            seq: Some(seq),
            index: Some(index),
            total,
            ..Default::default()
        }
    }

    pub fn bytes(mut self, bytes: usize) -> Self {
        self.bytes = bytes;
        self
    }

    pub fn airtime(mut self, airtime_ms: f64) -> Self {
        self.airtime_ms = airtime_ms;
        self
    }

    pub fn signal(mut self, received: &Received) -> Self {
        self.rssi = received.rssi;
        self.snr = received.snr;
        self
    }
}

/// Stamps records with the node id and the delta since this node's previous event.
#[derive(Debug)]
pub struct EventLog {
    node: NodeId,
    last_ms: Option<u64>,
}

impl EventLog {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            last_ms: None,
        }
    }

    pub fn record(
        &mut self,
        ctx: &mut dyn SystemContext,
        role: Role,
        event: EventKind,
        detail: EventDetail,
    ) {
        let now = ctx.now();
        let dt_ms = self.last_ms.map_or(0, |last| now.saturating_sub(last));
        self.last_ms = Some(now);
        ctx.record_event(EventRecord {
            node: self.node.clone(),
            role,
            event,
            seq: detail.seq,
            index: detail.index,
            total: detail.total,
            bytes: detail.bytes,
            rssi: detail.rssi,
            snr: detail.snr,
            airtime_ms: detail.airtime_ms,
            t_ms: now,
            dt_ms,
        });
    }
}

/// Writes event records as CSV lines, header first.
pub struct CsvEventWriter<W: Write> {
    out: W,
}

impl<W: Write> CsvEventWriter<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "{EVENT_CSV_HEADER}")?;
        Ok(Self { out })
    }

    pub fn write(&mut self, record: &EventRecord) -> io::Result<()> {
        writeln!(self.out, "{}", record.to_csv())?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
