//! In-memory host with a virtual clock for driving a node in unit tests.

use std::collections::VecDeque;

use bytes::Bytes;
use lora_arq_abstract::{Delivery, EventKind, EventRecord, Frame, Notice, Received, SystemContext};

use crate::codec;

type Responder = Box<dyn FnMut(&Frame, u64) -> Vec<(u64, Bytes)>>;

pub struct ScriptedContext {
    now: u64,
    inbox: VecDeque<(u64, Received)>,
    responder: Option<Responder>,
    pub sent: Vec<Bytes>,
    pub deliveries: Vec<Delivery>,
    pub notices: Vec<Notice>,
    pub events: Vec<EventRecord>,
}

impl ScriptedContext {
    pub fn new() -> Self {
        Self {
            now: 0,
            inbox: VecDeque::new(),
            responder: None,
            sent: Vec::new(),
            deliveries: Vec::new(),
            notices: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Every transmitted frame is shown to `responder`, which returns
    /// `(delay_ms, datagram)` replies to queue for the node.
    pub fn with_responder(
        mut self,
        responder: impl FnMut(&Frame, u64) -> Vec<(u64, Bytes)> + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    pub fn advance(&mut self, ms: u64) {
        self.now += ms;
    }

    pub fn push_inbound(&mut self, datagram: impl Into<Bytes>) {
        self.inbox.push_back((self.now, Received::new(datagram)));
    }

    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent
            .iter()
            .filter_map(|raw| codec::decode(raw).ok())
            .collect()
    }

    pub fn count_events(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.event == kind).count()
    }
}

impl SystemContext for ScriptedContext {
    fn send_frame(&mut self, frame: Bytes) {
        if let (Some(responder), Ok(decoded)) = (self.responder.as_mut(), codec::decode(&frame)) {
            for (delay, reply) in responder(&decoded, self.now) {
                let at = self.now + delay;
                let pos = self
                    .inbox
                    .iter()
                    .position(|(t, _)| *t > at)
                    .unwrap_or(self.inbox.len());
                self.inbox.insert(pos, (at, Received::new(reply).with_signal(-90, 8.0)));
            }
        }
        self.sent.push(frame);
    }

    fn try_receive(&mut self) -> Option<Received> {
        match self.inbox.front() {
            Some((at, _)) if *at <= self.now => self.inbox.pop_front().map(|(_, rx)| rx),
            _ => None,
        }
    }

    fn airtime_ms(&self, payload_len: usize) -> f64 {
        payload_len as f64
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn sleep(&mut self, ms: u64) {
        self.now += ms;
    }

    fn deliver(&mut self, delivery: Delivery) {
        self.deliveries.push(delivery);
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    fn record_event(&mut self, record: EventRecord) {
        self.events.push(record);
    }
}
