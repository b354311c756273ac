//! Inbound frame handling shared by the idle loop and every blocking wait.

use bytes::Bytes;
use lora_arq_abstract::{
    AckFrame, DataFrame, Delivery, EventKind, FragmentAckFrame, FragmentFrame, Frame, NodeId,
    Received, Role, SystemContext,
};
use tracing::{debug, info, trace};

use crate::codec;
use crate::event_log::{EventDetail, EventLog};
use crate::reassembly::{FragmentOutcome, ReassemblyBuffer};
use crate::window::{AckOutcome, IgnoreReason, TransmitWindow};

/// What the caller is currently blocked on.
pub enum Awaiting<'a> {
    Nothing,
    FinalAck { seq: u32 },
    Window(&'a mut TransmitWindow),
}

/// Result of dispatching one datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The final ACK the caller was waiting for.
    FinalAck(AckFrame),
    /// A FRAGMENT-ACK was applied to the active window.
    Window(AckOutcome),
    /// Control frame nobody was waiting for.
    Stray,
    /// Inbound data was acknowledged and, if complete, delivered.
    Data { delivered: bool },
    /// Not addressed to us, or our own frame echoed back.
    Ignored,
    Malformed,
}

/// Receiver side: running totals and the reassembly slot.
#[derive(Debug)]
pub struct Dispatcher {
    local: NodeId,
    rx_total_bytes: u64,
    rx_total_packets: u64,
    reassembly: ReassemblyBuffer,
}

impl Dispatcher {
    pub fn new(local: NodeId, max_fragments: u32) -> Self {
        Self {
            local,
            rx_total_bytes: 0,
            rx_total_packets: 0,
            reassembly: ReassemblyBuffer::new(max_fragments),
        }
    }

    /// `(bytes, packets)` of fresh application data received so far.
    pub fn rx_totals(&self) -> (u64, u64) {
        (self.rx_total_bytes, self.rx_total_packets)
    }

    pub fn reassembly(&self) -> &ReassemblyBuffer {
        &self.reassembly
    }

    pub fn dispatch(
        &mut self,
        ctx: &mut dyn SystemContext,
        log: &mut EventLog,
        received: Received,
        awaiting: Awaiting<'_>,
    ) -> Dispatch {
        trace!("rx {:?}", String::from_utf8_lossy(&received.payload));
        let frame = match codec::decode(&received.payload) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping malformed frame: {e}");
                return Dispatch::Malformed;
            }
        };
        let len = received.payload.len();

        match frame {
            Frame::Ack(ack) => {
                let detail = EventDetail::seq(ack.seq)
                    .bytes(len)
                    .airtime(ctx.airtime_ms(len))
                    .signal(&received);
                log.record(ctx, Role::Rx, EventKind::AckRx, detail);
                match awaiting {
                    Awaiting::FinalAck { seq } if ack.seq == seq && ack.orig_src == self.local => {
                        Dispatch::FinalAck(ack)
                    }
                    _ => {
                        debug!(
                            "stray ACK #{} from {} for {}",
                            ack.seq, ack.acker, ack.orig_src
                        );
                        Dispatch::Stray
                    }
                }
            }
            Frame::FragmentAck(ack) => {
                let detail = EventDetail::fragment(ack.seq, ack.index, None)
                    .bytes(len)
                    .airtime(ctx.airtime_ms(len))
                    .signal(&received);
                log.record(ctx, Role::Rx, EventKind::FragmentAckRx, detail);
                self.on_fragment_ack(&ack, awaiting)
            }
            Frame::Data(data) => self.on_data(ctx, log, &received, data),
            Frame::Fragment(fragment) => self.on_fragment(ctx, log, &received, fragment),
        }
    }

    fn on_fragment_ack(&self, ack: &FragmentAckFrame, awaiting: Awaiting<'_>) -> Dispatch {
        let Awaiting::Window(window) = awaiting else {
            debug!("stray ACKF #{}:{} with no window open", ack.seq, ack.index);
            return Dispatch::Stray;
        };
        let outcome = window.apply_ack(ack, &self.local);
        match outcome {
            AckOutcome::Ignored(IgnoreReason::ForeignDestination) => {
                debug!("ACKF #{}:{} is for {}", ack.seq, ack.index, ack.orig_src);
            }
            AckOutcome::Ignored(reason) => {
                debug!("ACKF #{}:{} ignored: {reason:?}", ack.seq, ack.index);
            }
            AckOutcome::Advanced { base } => trace!("window #{} base -> {base}", ack.seq),
            AckOutcome::Retired => trace!("window #{} fully acknowledged", ack.seq),
        }
        Dispatch::Window(outcome)
    }

    fn addressed_to_us(&self, src: &NodeId, dst: &NodeId) -> bool {
        if src == &self.local {
            return false;
        }
        if !self.local.accepts(dst) {
            debug!("ignoring frame from {src} for {dst}");
            return false;
        }
        true
    }

    fn on_data(
        &mut self,
        ctx: &mut dyn SystemContext,
        log: &mut EventLog,
        received: &Received,
        data: DataFrame,
    ) -> Dispatch {
        if !self.addressed_to_us(&data.src, &data.dst) {
            return Dispatch::Ignored;
        }
        // Retransmissions of a single-frame message are counted again.
        self.rx_total_packets += 1;
        self.rx_total_bytes += data.text.len() as u64;

        let len = received.payload.len();
        let detail = EventDetail::seq(data.seq)
            .bytes(len)
            .airtime(ctx.airtime_ms(len))
            .signal(received);
        log.record(ctx, Role::Rx, EventKind::DataRx, detail);
        info!("#{} from {}: {} bytes", data.seq, data.src, data.text.len());

        ctx.deliver(Delivery {
            from: data.src.clone(),
            seq: data.seq,
            text: data.text,
            fragments: 1,
        });
        self.send_final_ack(ctx, log, data.src, data.seq);
        Dispatch::Data { delivered: true }
    }

    fn on_fragment(
        &mut self,
        ctx: &mut dyn SystemContext,
        log: &mut EventLog,
        received: &Received,
        fragment: FragmentFrame,
    ) -> Dispatch {
        if !self.addressed_to_us(&fragment.src, &fragment.dst) {
            return Dispatch::Ignored;
        }
        let FragmentFrame {
            src,
            seq,
            index,
            total,
            chunk,
            ..
        } = fragment;
        let chunk_len = chunk.len() as u64;
        let accepted = self.reassembly.accept(&src, seq, index, total, chunk);
        match accepted.outcome {
            FragmentOutcome::Rejected => {
                debug!("rejected fragment #{seq} {index}/{total} from {src}");
                return Dispatch::Malformed;
            }
            FragmentOutcome::Fresh => {
                self.rx_total_packets += 1;
                self.rx_total_bytes += chunk_len;
            }
            FragmentOutcome::Duplicate => trace!("duplicate fragment #{seq}:{index}"),
        }

        let len = received.payload.len();
        let detail = EventDetail::fragment(seq, index, Some(total))
            .bytes(len)
            .airtime(ctx.airtime_ms(len))
            .signal(received);
        log.record(ctx, Role::Rx, EventKind::FragmentRx, detail);

        // Acknowledge every copy so a lost ACKF is repaired by the retransmission.
        let ackf = codec::encode(&Frame::FragmentAck(FragmentAckFrame {
            acker: self.local.clone(),
            orig_src: src.clone(),
            seq,
            index,
        }));
        transmit(
            ctx,
            log,
            ackf,
            EventKind::FragmentAckTx,
            EventDetail::fragment(seq, index, None),
        );

        let Some(text) = accepted.completed else {
            return Dispatch::Data { delivered: false };
        };
        info!("#{seq} from {src}: reassembled {} bytes from {total} fragments", text.len());
        ctx.deliver(Delivery {
            from: src.clone(),
            seq,
            text,
            fragments: total,
        });
        self.send_final_ack(ctx, log, src, seq);
        Dispatch::Data { delivered: true }
    }

    fn send_final_ack(
        &mut self,
        ctx: &mut dyn SystemContext,
        log: &mut EventLog,
        orig_src: NodeId,
        seq: u32,
    ) {
        let ack = codec::encode(&Frame::Ack(AckFrame {
            acker: self.local.clone(),
            orig_src,
            seq,
            rx_total_bytes: self.rx_total_bytes,
            rx_total_packets: self.rx_total_packets,
        }));
        transmit(ctx, log, ack, EventKind::AckTx, EventDetail::seq(seq));
    }
}

/// Put `frame` on the air and record it with its length and airtime.
pub(crate) fn transmit(
    ctx: &mut dyn SystemContext,
    log: &mut EventLog,
    frame: Bytes,
    event: EventKind,
    detail: EventDetail,
) {
    let len = frame.len();
    let airtime = ctx.airtime_ms(len);
    trace!("tx {:?}", String::from_utf8_lossy(&frame));
    ctx.send_frame(frame);
    log.record(ctx, Role::Tx, event, detail.bytes(len).airtime(airtime));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedContext;
    use crate::window::OutboundFragment;

    fn setup() -> (ScriptedContext, EventLog, Dispatcher) {
        let local = NodeId::new("B");
        (
            ScriptedContext::new(),
            EventLog::new(local.clone()),
            Dispatcher::new(local, 16),
        )
    }

    fn feed(
        ctx: &mut ScriptedContext,
        log: &mut EventLog,
        dispatcher: &mut Dispatcher,
        raw: &'static str,
    ) -> Dispatch {
        dispatcher.dispatch(ctx, log, Received::new(raw), Awaiting::Nothing)
    }

    #[test]
    fn data_is_delivered_and_acked_with_running_totals() {
        let (mut ctx, mut log, mut d) = setup();
        assert_eq!(
            feed(&mut ctx, &mut log, &mut d, "MSG,A,FF,3,hello"),
            Dispatch::Data { delivered: true }
        );
        assert_eq!(ctx.deliveries[0].text, Bytes::from_static(b"hello"));
        assert_eq!(&ctx.sent[0][..], b"ACK,B,A,3,5,1");

        // No duplicate suppression for single frames.
        feed(&mut ctx, &mut log, &mut d, "MSG,A,FF,3,hello");
        assert_eq!(ctx.deliveries.len(), 2);
        assert_eq!(&ctx.sent[1][..], b"ACK,B,A,3,10,2");
    }

    #[test]
    fn duplicate_fragment_counted_once_acked_twice() {
        let (mut ctx, mut log, mut d) = setup();
        feed(&mut ctx, &mut log, &mut d, "MSGF,A,FF,1,0,2,abc");
        feed(&mut ctx, &mut log, &mut d, "MSGF,A,FF,1,0,2,abc");
        assert_eq!(d.rx_totals(), (3, 1));
        assert_eq!(&ctx.sent[0][..], b"ACKF,B,A,1,0");
        assert_eq!(&ctx.sent[1][..], b"ACKF,B,A,1,0");

        assert_eq!(
            feed(&mut ctx, &mut log, &mut d, "MSGF,A,FF,1,1,2,de"),
            Dispatch::Data { delivered: true }
        );
        assert_eq!(ctx.deliveries[0].text, Bytes::from_static(b"abcde"));
        assert_eq!(ctx.deliveries[0].fragments, 2);
        assert_eq!(&ctx.sent[2][..], b"ACKF,B,A,1,1");
        assert_eq!(&ctx.sent[3][..], b"ACK,B,A,1,5,2");
    }

    #[test]
    fn frames_for_other_nodes_are_ignored() {
        let (mut ctx, mut log, mut d) = setup();
        assert_eq!(feed(&mut ctx, &mut log, &mut d, "MSG,A,C,1,hi"), Dispatch::Ignored);
        assert_eq!(feed(&mut ctx, &mut log, &mut d, "MSG,B,FF,1,echo"), Dispatch::Ignored);
        assert!(ctx.sent.is_empty());
        assert_eq!(d.rx_totals(), (0, 0));
    }

    #[test]
    fn addressed_data_is_accepted() {
        let (mut ctx, mut log, mut d) = setup();
        assert_eq!(
            feed(&mut ctx, &mut log, &mut d, "MSG,A,B,1,hi"),
            Dispatch::Data { delivered: true }
        );
    }

    #[test]
    fn malformed_frames_have_no_effect() {
        let (mut ctx, mut log, mut d) = setup();
        for raw in ["garbage", "MSG,A,FF", "MSGF,A,FF,x,0,2,a", "MSGF,A,FF,1,5,2,a"] {
            assert_eq!(feed(&mut ctx, &mut log, &mut d, raw), Dispatch::Malformed, "{raw}");
        }
        assert!(ctx.sent.is_empty());
        assert!(ctx.events.is_empty());
    }

    #[test]
    fn control_frames_without_a_waiter_are_stray() {
        let (mut ctx, mut log, mut d) = setup();
        assert_eq!(feed(&mut ctx, &mut log, &mut d, "ACK,A,B,1,0,0"), Dispatch::Stray);
        assert_eq!(feed(&mut ctx, &mut log, &mut d, "ACKF,A,B,1,0"), Dispatch::Stray);
        assert!(ctx.sent.is_empty());
    }

    #[test]
    fn final_ack_must_match_sequence_and_origin() {
        let (mut ctx, mut log, mut d) = setup();
        let wrong_seq = d.dispatch(
            &mut ctx,
            &mut log,
            Received::new("ACK,A,B,2,0,0"),
            Awaiting::FinalAck { seq: 1 },
        );
        assert_eq!(wrong_seq, Dispatch::Stray);
        let wrong_origin = d.dispatch(
            &mut ctx,
            &mut log,
            Received::new("ACK,A,C,1,0,0"),
            Awaiting::FinalAck { seq: 1 },
        );
        assert_eq!(wrong_origin, Dispatch::Stray);
        let hit = d.dispatch(
            &mut ctx,
            &mut log,
            Received::new("ACK,A,B,1,40,2"),
            Awaiting::FinalAck { seq: 1 },
        );
        match hit {
            Dispatch::FinalAck(ack) => {
                assert_eq!((ack.rx_total_bytes, ack.rx_total_packets), (40, 2))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fragment_ack_is_applied_to_the_open_window() {
        let (mut ctx, mut log, mut d) = setup();
        let fragments = (0..3)
            .map(|_| OutboundFragment {
                frame: Bytes::from_static(b"x"),
                chunk_len: 1,
            })
            .collect();
        let mut window = TransmitWindow::new(9, fragments, 4);
        let foreign = d.dispatch(
            &mut ctx,
            &mut log,
            Received::new("ACKF,A,C,9,2"),
            Awaiting::Window(&mut window),
        );
        assert_eq!(
            foreign,
            Dispatch::Window(AckOutcome::Ignored(IgnoreReason::ForeignDestination))
        );
        assert_eq!(window.base(), 0);

        let hit = d.dispatch(
            &mut ctx,
            &mut log,
            Received::new("ACKF,A,B,9,2"),
            Awaiting::Window(&mut window),
        );
        assert_eq!(hit, Dispatch::Window(AckOutcome::Retired));
    }

    #[test]
    fn received_events_carry_signal_metadata() {
        let (mut ctx, mut log, mut d) = setup();
        d.dispatch(
            &mut ctx,
            &mut log,
            Received::new("MSG,A,FF,0,hi").with_signal(-100, 4.5),
            Awaiting::Nothing,
        );
        let rx = &ctx.events[0];
        assert_eq!(rx.event, EventKind::DataRx);
        assert_eq!((rx.rssi, rx.snr), (Some(-100), Some(4.5)));
        let tx = &ctx.events[1];
        assert_eq!(tx.event, EventKind::AckTx);
        assert_eq!(tx.rssi, None);
    }
}
