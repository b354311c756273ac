use crate::trace::{DeliveryRecord, FrameRecord, SendOutcome, SimulationReport};
use bytes::Bytes;
use lora_arq_abstract::{
    ArqConfig, ConfigError, Delivery, DropRule, EventRecord, FrameKind, NodeId, Notice,
    RadioConfig, Received, SimConfig, SystemContext,
};
use lora_arq_core::{ArqNode, SendError, codec, time_on_air_ms};
use rand::Rng;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Event {
    time: u64,
    to: NodeId,
    received: Received,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A compact textual summary of important link-layer events for visualization.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: u64,
    pub description: String,
}

#[derive(Debug)]
struct PendingSend {
    time: u64,
    from: NodeId,
    to: Option<NodeId>,
    text: Bytes,
}

/// Actions buffered while an idle node handles one frame.
#[derive(Default)]
struct ActionBuffer {
    outgoing_frames: Vec<Bytes>,
    deliveries: Vec<Delivery>,
    events: Vec<EventRecord>,
}

/// Context handed to an idle node. It cannot block, so `sleep` is a no-op.
struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: u64,
    radio: &'a RadioConfig,
}

impl SystemContext for ScopedContext<'_> {
    fn send_frame(&mut self, frame: Bytes) {
        self.buffer.outgoing_frames.push(frame);
    }

    fn try_receive(&mut self) -> Option<Received> {
        None
    }

    fn airtime_ms(&self, payload_len: usize) -> f64 {
        time_on_air_ms(self.radio, payload_len)
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn sleep(&mut self, _ms: u64) {}

    fn deliver(&mut self, delivery: Delivery) {
        self.buffer.deliveries.push(delivery);
    }

    fn record_event(&mut self, record: EventRecord) {
        self.buffer.events.push(record);
    }
}

/// The shared channel: clock, in-flight frames and everything recorded about them.
struct Medium {
    time: u64,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: SimConfig,
    radio: RadioConfig,
    rng: rand::rngs::StdRng,
    node_ids: Vec<NodeId>,
    drop_rules: Vec<DropRule>,
    /// When each node's radio finishes its last queued transmission.
    busy_until: BTreeMap<NodeId, u64>,
    /// Latest arrival scheduled on each `(from, to)` link.
    link_clock: BTreeMap<(NodeId, NodeId), u64>,

    frames: Vec<FrameRecord>,
    deliveries: Vec<DeliveryRecord>,
    link_events: Vec<LinkEventSummary>,
    events: Vec<EventRecord>,
}

impl Medium {
    fn link_event(&mut self, description: String) {
        self.link_events.push(LinkEventSummary {
            time: self.time,
            description,
        });
    }

    /// Pop the earliest arrival due at or before `until`, moving the clock to it.
    fn pop_due(&mut self, until: u64) -> Option<Event> {
        if self.event_queue.peek().is_some_and(|e| e.time <= until) {
            let event = self.event_queue.pop()?;
            self.time = self.time.max(event.time);
            return Some(event);
        }
        None
    }

    /// Consume the first drop rule matching this transmission.
    fn take_drop_rule(
        &mut self,
        kind: FrameKind,
        from: &NodeId,
        seq: Option<u32>,
        index: Option<u32>,
    ) -> bool {
        let Some(rule) = self.drop_rules.iter_mut().find(|r| {
            r.kind == kind
                && r.count != Some(0)
                && r.from.as_deref().is_none_or(|f| f == from.as_str())
                && r.seq.is_none_or(|s| Some(s) == seq)
                && r.index.is_none_or(|i| Some(i) == index)
        }) else {
            return false;
        };
        if let Some(count) = rule.count.as_mut() {
            *count -= 1;
        }
        true
    }

    fn transmit(&mut self, from: &NodeId, frame: Bytes) {
        let airtime_ms = time_on_air_ms(&self.radio, frame.len());
        let decoded = codec::decode(&frame).ok();
        let kind = decoded.as_ref().map(|f| f.kind());
        let seq = decoded.as_ref().map(|f| f.seq());
        let index = decoded.as_ref().and_then(|f| f.index());
        let label = match (kind, seq, index) {
            (Some(kind), Some(seq), Some(index)) => format!("{kind} #{seq}:{index}"),
            (Some(kind), Some(seq), None) => format!("{kind} #{seq}"),
            _ => format!("{} undecodable bytes", frame.len()),
        };

        // Half-duplex radio: a frame queued behind another starts when that one has left.
        let start = self
            .busy_until
            .get(from)
            .map_or(self.time, |&busy| busy.max(self.time));
        let on_air = if self.config.model_airtime {
            airtime_ms.ceil() as u64
        } else {
            0
        };
        self.busy_until.insert(from.clone(), start + on_air);

        let dropped = kind.is_some_and(|kind| self.take_drop_rule(kind, from, seq, index));
        self.frames.push(FrameRecord {
            time: start,
            from: from.clone(),
            kind,
            seq,
            index,
            bytes: frame.len(),
            airtime_ms,
            dropped,
        });
        if dropped {
            debug!("Deterministically dropping {label} from {from}");
            self.link_event(format!("[{from}] DROP (rule) {label}"));
            return;
        }

        let (min_latency, max_latency) = (
            self.config.min_latency.min(self.config.max_latency),
            self.config.max_latency.max(self.config.min_latency),
        );
        for i in 0..self.node_ids.len() {
            let to = self.node_ids[i].clone();
            if &to == from {
                continue;
            }
            if self.rng.random::<f64>() < self.config.loss_rate {
                debug!("Frame lost in channel");
                self.link_event(format!("[{from}->{to}] DROP (random loss) {label}"));
                continue;
            }
            let latency = self.rng.random_range(min_latency..=max_latency) + on_air;
            // Frames on one link never overtake each other.
            let link = self.link_clock.entry((from.clone(), to.clone())).or_default();
            let arrival = (start + latency).max(*link);
            *link = arrival;
            self.link_event(format!(
                "[{from}->{to}] SEND {label} (latency={}ms)",
                arrival - self.time
            ));
            let received =
                Received::new(frame.clone()).with_signal(self.config.rssi, self.config.snr);
            self.event_queue.push(Event {
                time: arrival,
                to,
                received,
                id: self.event_id_counter,
            });
            self.event_id_counter += 1;
        }
    }

    fn record_delivery(&mut self, to: &NodeId, delivery: Delivery) {
        info!(
            "[{to}] DELIVERED #{} from {}: {} bytes",
            delivery.seq,
            delivery.from,
            delivery.text.len()
        );
        self.link_event(format!(
            "[{to}] DELIVERED {} bytes from {} to application",
            delivery.text.len(),
            delivery.from
        ));
        self.deliveries.push(DeliveryRecord {
            time: self.time,
            to: to.clone(),
            from: delivery.from,
            seq: delivery.seq,
            text: String::from_utf8_lossy(&delivery.text).into_owned(),
            fragments: delivery.fragments,
        });
    }

    fn process_actions(&mut self, source: &NodeId, buffer: ActionBuffer) {
        self.events.extend(buffer.events);
        for delivery in buffer.deliveries {
            self.record_delivery(source, delivery);
        }
        for frame in buffer.outgoing_frames {
            self.transmit(source, frame);
        }
    }

    /// Let an idle node handle one arrival through a buffered context.
    fn dispatch_to(&mut self, id: &NodeId, node: &mut ArqNode, received: Received) {
        let mut buffer = ActionBuffer::default();
        {
            let mut ctx = ScopedContext {
                buffer: &mut buffer,
                now: self.time,
                radio: &self.radio,
            };
            node.handle_frame(&mut ctx, received);
        }
        self.process_actions(id, buffer);
    }
}

/// Context of the node currently blocked in `send_message`. Sleeping advances
/// the shared clock and lets every other node react in the meantime.
struct ActiveContext<'a> {
    medium: &'a mut Medium,
    idle_nodes: &'a mut BTreeMap<NodeId, ArqNode>,
    active: NodeId,
    inbox: VecDeque<Received>,
}

impl ActiveContext<'_> {
    fn run_until(&mut self, until: u64) {
        while let Some(event) = self.medium.pop_due(until) {
            if event.to == self.active {
                self.inbox.push_back(event.received);
            } else if let Some(node) = self.idle_nodes.get_mut(&event.to) {
                self.medium.dispatch_to(&event.to, node, event.received);
            }
        }
    }
}

impl SystemContext for ActiveContext<'_> {
    fn send_frame(&mut self, frame: Bytes) {
        self.medium.transmit(&self.active, frame);
        // The radio is busy until the frame has left the antenna.
        let busy = self.medium.busy_until.get(&self.active).copied();
        if let Some(until) = busy
            && until > self.medium.time
        {
            self.sleep(until - self.medium.time);
        }
    }

    fn try_receive(&mut self) -> Option<Received> {
        let now = self.medium.time;
        self.run_until(now);
        self.inbox.pop_front()
    }

    fn airtime_ms(&self, payload_len: usize) -> f64 {
        time_on_air_ms(&self.medium.radio, payload_len)
    }

    fn now(&self) -> u64 {
        self.medium.time
    }

    fn sleep(&mut self, ms: u64) {
        let until = self.medium.time + ms;
        self.run_until(until);
        self.medium.time = until;
    }

    fn deliver(&mut self, delivery: Delivery) {
        self.medium.record_delivery(&self.active, delivery);
    }

    fn notify(&mut self, notice: Notice) {
        if let Notice::Attempt { seq, attempt, max } = notice {
            let active = self.active.clone();
            self.medium
                .link_event(format!("[{active}] ATTEMPT {attempt}/{max} #{seq}"));
        }
    }

    fn record_event(&mut self, record: EventRecord) {
        self.medium.events.push(record);
    }
}

/// Discrete-event LoRa channel hosting several ARQ nodes.
///
/// Sends run one at a time: a send scheduled while another is in progress
/// starts when the earlier one returns.
pub struct Simulator {
    medium: Medium,
    nodes: BTreeMap<NodeId, ArqNode>,
    arq: ArqConfig,
    pending_sends: Vec<PendingSend>,
    outcomes: Vec<SendOutcome>,
    initialized: bool,
}

impl Simulator {
    pub fn new(
        config: SimConfig,
        arq: ArqConfig,
        radio: RadioConfig,
        ids: impl IntoIterator<Item = NodeId>,
    ) -> Result<Self, ConfigError> {
        use rand::SeedableRng;
        radio.validate()?;
        let rng = rand::rngs::StdRng::seed_from_u64(config.seed);

        let mut nodes = BTreeMap::new();
        for id in ids {
            let node = ArqNode::new(id.clone(), arq.clone())?;
            nodes.insert(id, node);
        }

        Ok(Self {
            medium: Medium {
                time: 0,
                event_queue: BinaryHeap::new(),
                event_id_counter: 0,
                config,
                radio,
                rng,
                node_ids: nodes.keys().cloned().collect(),
                drop_rules: Vec::new(),
                busy_until: BTreeMap::new(),
                link_clock: BTreeMap::new(),
                frames: Vec::new(),
                deliveries: Vec::new(),
                link_events: Vec::new(),
                events: Vec::new(),
            },
            nodes,
            arq,
            pending_sends: Vec::new(),
            outcomes: Vec::new(),
            initialized: false,
        })
    }

    /// Register a deterministic fault: drop transmissions matching `rule`.
    pub fn add_drop_rule(&mut self, rule: DropRule) {
        self.medium.drop_rules.push(rule);
    }

    /// Node `from` submits `text` at `time`; broadcast when `to` is `None`.
    pub fn schedule_send(
        &mut self,
        time: u64,
        from: NodeId,
        to: Option<NodeId>,
        text: impl Into<Bytes>,
    ) {
        let pos = self
            .pending_sends
            .iter()
            .position(|s| s.time > time)
            .unwrap_or(self.pending_sends.len());
        self.pending_sends.insert(
            pos,
            PendingSend {
                time,
                from,
                to,
                text: text.into(),
            },
        );
    }

    pub fn config(&self) -> &SimConfig {
        &self.medium.config
    }

    pub fn node(&self, id: &NodeId) -> Option<&ArqNode> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.medium.node_ids
    }

    pub fn current_time(&self) -> u64 {
        self.medium.time
    }

    pub fn remaining_events(&self) -> usize {
        self.medium.event_queue.len() + self.pending_sends.len()
    }

    pub fn outcomes(&self) -> &[SendOutcome] {
        &self.outcomes
    }

    pub fn deliveries(&self) -> &[DeliveryRecord] {
        &self.medium.deliveries
    }

    /// Start every node's session at time zero.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        for (id, node) in self.nodes.iter_mut() {
            let mut buffer = ActionBuffer::default();
            {
                let mut ctx = ScopedContext {
                    buffer: &mut buffer,
                    now: self.medium.time,
                    radio: &self.medium.radio,
                };
                node.start(&mut ctx);
            }
            self.medium.process_actions(id, buffer);
        }
    }

    /// Process the next arrival or start the next send. Returns false when nothing is left.
    pub fn step(&mut self) -> bool {
        self.init();
        let next_arrival = self.medium.event_queue.peek().map(|e| e.time);
        let next_send = self
            .pending_sends
            .first()
            .map(|s| s.time.max(self.medium.time));

        match (next_arrival, next_send) {
            (None, None) => false,
            (Some(arrival), Some(send)) if arrival <= send => {
                self.deliver_next_arrival();
                true
            }
            (Some(_), None) => {
                self.deliver_next_arrival();
                true
            }
            (_, Some(_)) => {
                let send = self.pending_sends.remove(0);
                self.run_send(send);
                true
            }
        }
    }

    pub fn run_until_complete(&mut self) {
        self.init();
        while self.step() {}
    }

    fn deliver_next_arrival(&mut self) {
        let Some(event) = self.medium.event_queue.pop() else {
            return;
        };
        self.medium.time = self.medium.time.max(event.time);
        debug!("Processing arrival at {} for {}", self.medium.time, event.to);
        if let Some(node) = self.nodes.get_mut(&event.to) {
            self.medium.dispatch_to(&event.to, node, event.received);
        }
    }

    fn run_send(&mut self, send: PendingSend) {
        self.medium.time = self.medium.time.max(send.time);
        let started_at = self.medium.time;
        let Some(mut node) = self.nodes.remove(&send.from) else {
            warn!("send scheduled for unknown node {}", send.from);
            self.outcomes.push(SendOutcome {
                from: send.from,
                to: send.to,
                seq: None,
                submitted_at: send.time,
                started_at,
                finished_at: started_at,
                attempts: 0,
                report: None,
                error: Some("unknown node".to_string()),
            });
            return;
        };

        let mut ctx = ActiveContext {
            medium: &mut self.medium,
            idle_nodes: &mut self.nodes,
            active: send.from.clone(),
            inbox: VecDeque::new(),
        };
        let result = node.send_message(&mut ctx, &send.text, send.to.clone());
        let leftovers = std::mem::take(&mut ctx.inbox);

        // Back in the idle loop: whatever arrived late is handled like any other frame.
        for received in leftovers {
            self.medium.dispatch_to(&send.from, &mut node, received);
        }
        self.nodes.insert(send.from.clone(), node);

        let finished_at = self.medium.time;
        let (seq, attempts, report, error) = match result {
            Ok(report) => (Some(report.seq), report.attempts, Some(report), None),
            Err(SendError::Exhausted { seq, attempts }) => (
                Some(seq),
                attempts,
                None,
                Some(SendError::Exhausted { seq, attempts }.to_string()),
            ),
            Err(e) => (None, 0, None, Some(e.to_string())),
        };
        self.outcomes.push(SendOutcome {
            from: send.from,
            to: send.to,
            seq,
            submitted_at: send.time,
            started_at,
            finished_at,
            attempts,
            report,
            error,
        });
    }

    /// Produce a serializable snapshot of the current simulation state.
    pub fn export_report(&self) -> SimulationReport {
        SimulationReport {
            config: self.medium.config.clone(),
            arq: self.arq.clone(),
            nodes: self.medium.node_ids.clone(),
            duration_ms: self.medium.time,
            frames: self.medium.frames.clone(),
            deliveries: self.medium.deliveries.clone(),
            outcomes: self.outcomes.clone(),
            link_events: self.medium.link_events.clone(),
            events: self.medium.events.clone(),
        }
    }
}
