//! Sender side: whole-message attempts over a single frame or a Go-Back-N window.

use bytes::Bytes;
use lora_arq_abstract::{
    AckFrame, ArqConfig, DataFrame, EventKind, FragmentFrame, Frame, NodeId, Notice, Role,
    SendReport, SystemContext,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec;
use crate::dispatcher::{Awaiting, Dispatch, Dispatcher, transmit};
use crate::event_log::{EventDetail, EventLog};
use crate::window::{AckOutcome, OutboundFragment, TransmitWindow};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("message is empty")]
    Empty,
    #[error("message of {len} bytes needs more than {max} fragments")]
    TooLarge { len: usize, max: u32 },
    #[error("message #{seq} not acknowledged after {attempts} attempts")]
    Exhausted { seq: u32, attempts: u32 },
}

/// Borrowed receive half, so waits can service inbound traffic.
pub struct Inbound<'a> {
    pub dispatcher: &'a mut Dispatcher,
    pub log: &'a mut EventLog,
}

#[derive(Debug)]
pub struct Session {
    local: NodeId,
    config: ArqConfig,
    next_seq: u32,
    started_at: u64,
    tx_data_packets: u64,
    tx_data_bytes: u64,
}

impl Session {
    pub fn new(local: NodeId, config: ArqConfig) -> Self {
        Self {
            local,
            config,
            next_seq: 0,
            started_at: 0,
            tx_data_packets: 0,
            tx_data_bytes: 0,
        }
    }

    pub fn mark_start(&mut self, now: u64) {
        self.started_at = now;
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// `(packets, bytes)` of DATA and DATA-FRAGMENT transmissions, retransmissions included.
    pub fn tx_totals(&self) -> (u64, u64) {
        (self.tx_data_packets, self.tx_data_bytes)
    }

    /// Send `text` reliably. Blocks until the final ACK arrives or every attempt failed.
    pub fn send_message(
        &mut self,
        ctx: &mut dyn SystemContext,
        inbound: &mut Inbound<'_>,
        text: &[u8],
        dst: Option<NodeId>,
    ) -> Result<SendReport, SendError> {
        let text = codec::sanitize(text);
        if text.is_empty() {
            return Err(SendError::Empty);
        }
        let total = text.len().div_ceil(self.config.frag_chunk);
        if total > self.config.max_fragments as usize {
            return Err(SendError::TooLarge {
                len: text.len(),
                max: self.config.max_fragments,
            });
        }
        let total = total as u32;
        let dst = dst.unwrap_or_else(NodeId::broadcast);
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let single = total == 1;

        let max_tries = self.config.max_tries;
        for attempt in 1..=max_tries {
            info!("[attempt {attempt}/{max_tries}] #{seq} to {dst}, {} bytes", text.len());
            ctx.notify(Notice::Attempt {
                seq,
                attempt,
                max: max_tries,
            });

            let acked = if single {
                self.single_attempt(ctx, inbound, &dst, seq, &text)
            } else {
                self.fragmented_attempt(ctx, inbound, &dst, seq, &text, total)
            };
            if let Some(ack) = acked {
                let report = self.report(ctx.now(), ack, attempt, total);
                info!(
                    "#{seq} acknowledged by {}: pdr {:.1}%, {:.0} bit/s",
                    report.acked_by, report.pdr, report.goodput_bps
                );
                ctx.notify(Notice::Delivered(report.clone()));
                return Ok(report);
            }

            if attempt < max_tries {
                inbound
                    .log
                    .record(ctx, Role::Tx, EventKind::RetryMessage, EventDetail::seq(seq));
                let backoff = if single {
                    self.config.single_retry_backoff_ms
                } else {
                    self.config.fragmented_retry_backoff_ms
                };
                self.pause(ctx, inbound, None, backoff);
            }
        }

        warn!("#{seq} failed after {max_tries} attempts");
        inbound
            .log
            .record(ctx, Role::Tx, EventKind::Abort, EventDetail::seq(seq));
        ctx.notify(Notice::Failed {
            seq,
            attempts: max_tries,
        });
        Err(SendError::Exhausted {
            seq,
            attempts: max_tries,
        })
    }

    fn single_attempt(
        &mut self,
        ctx: &mut dyn SystemContext,
        inbound: &mut Inbound<'_>,
        dst: &NodeId,
        seq: u32,
        text: &Bytes,
    ) -> Option<AckFrame> {
        let frame = codec::encode(&Frame::Data(DataFrame {
            src: self.local.clone(),
            dst: dst.clone(),
            seq,
            text: text.clone(),
        }));
        self.tx_data_packets += 1;
        self.tx_data_bytes += text.len() as u64;
        transmit(ctx, inbound.log, frame, EventKind::DataTx, EventDetail::seq(seq));
        self.wait_final_ack(ctx, inbound, seq, self.config.final_ack_timeout_ms)
    }

    fn fragmented_attempt(
        &mut self,
        ctx: &mut dyn SystemContext,
        inbound: &mut Inbound<'_>,
        dst: &NodeId,
        seq: u32,
        text: &Bytes,
        total: u32,
    ) -> Option<AckFrame> {
        let chunk = self.config.frag_chunk;
        let fragments = (0..total)
            .map(|index| {
                let start = index as usize * chunk;
                let end = (start + chunk).min(text.len());
                let body = text.slice(start..end);
                OutboundFragment {
                    chunk_len: body.len(),
                    frame: codec::encode(&Frame::Fragment(FragmentFrame {
                        src: self.local.clone(),
                        dst: dst.clone(),
                        seq,
                        index,
                        total,
                        chunk: body,
                    })),
                }
            })
            .collect();
        let mut window = TransmitWindow::new(seq, fragments, self.config.window_size);

        if !self.drive_window(ctx, inbound, &mut window) {
            info!("#{seq} window gave up at base {}/{total}", window.base());
            return None;
        }
        let timeout = self.config.fragmented_final_ack_timeout_ms(total);
        self.wait_final_ack(ctx, inbound, seq, timeout)
    }

    /// Run the window until every fragment is acknowledged (`true`) or the
    /// attempt's elapsed time passes the ceiling at a timeout (`false`).
    fn drive_window(
        &mut self,
        ctx: &mut dyn SystemContext,
        inbound: &mut Inbound<'_>,
        window: &mut TransmitWindow,
    ) -> bool {
        let seq = window.seq();
        let total = window.total();
        let started = ctx.now();

        loop {
            while let Some(index) = window.next_unsent() {
                let Some(fragment) = window.fragment(index).cloned() else {
                    break;
                };
                self.tx_data_packets += 1;
                self.tx_data_bytes += fragment.chunk_len as u64;
                transmit(
                    ctx,
                    inbound.log,
                    fragment.frame,
                    EventKind::FragmentTx,
                    EventDetail::fragment(seq, index, Some(total)),
                );
                window.mark_sent(index, ctx.now());
                self.pause(ctx, inbound, Some(&mut *window), self.config.frag_spacing_ms);
                if window.is_retired() {
                    return true;
                }
            }

            inbound.log.record(
                ctx,
                Role::Tx,
                EventKind::WaitFragmentAckStart,
                EventDetail::fragment(seq, window.base(), Some(total)),
            );
            loop {
                let mut progressed = false;
                // Stop at retirement so a queued final ACK reaches wait_final_ack.
                while !window.is_retired()
                    && let Some(received) = ctx.try_receive()
                {
                    let outcome = inbound.dispatcher.dispatch(
                        ctx,
                        inbound.log,
                        received,
                        Awaiting::Window(&mut *window),
                    );
                    if let Dispatch::Window(AckOutcome::Advanced { .. } | AckOutcome::Retired) =
                        outcome
                    {
                        progressed = true;
                    }
                }
                if window.is_retired() {
                    inbound.log.record(
                        ctx,
                        Role::Tx,
                        EventKind::WaitFragmentAckOk,
                        EventDetail::fragment(seq, window.base(), Some(total)),
                    );
                    return true;
                }
                if progressed && !window.all_sent() {
                    // The slide admitted new fragments.
                    break;
                }

                let now = ctx.now();
                if window.timed_out(now, self.config.ack_timeout_ms) {
                    inbound.log.record(
                        ctx,
                        Role::Tx,
                        EventKind::WaitFragmentAckTimeout,
                        EventDetail::fragment(seq, window.base(), Some(total)),
                    );
                    if now.saturating_sub(started) > self.config.window_ceiling_ms() {
                        return false;
                    }
                    debug!("#{seq} go back to fragment {}", window.base());
                    inbound.log.record(
                        ctx,
                        Role::Tx,
                        EventKind::RetryFragmentWindow,
                        EventDetail::fragment(seq, window.base(), Some(total)),
                    );
                    window.go_back();
                    break;
                }
                ctx.sleep(self.tick());
            }
        }
    }

    fn wait_final_ack(
        &mut self,
        ctx: &mut dyn SystemContext,
        inbound: &mut Inbound<'_>,
        seq: u32,
        timeout_ms: u64,
    ) -> Option<AckFrame> {
        inbound
            .log
            .record(ctx, Role::Tx, EventKind::WaitAckStart, EventDetail::seq(seq));
        let deadline = ctx.now() + timeout_ms;
        loop {
            while let Some(received) = ctx.try_receive() {
                let outcome = inbound.dispatcher.dispatch(
                    ctx,
                    inbound.log,
                    received,
                    Awaiting::FinalAck { seq },
                );
                if let Dispatch::FinalAck(ack) = outcome {
                    inbound
                        .log
                        .record(ctx, Role::Tx, EventKind::WaitAckOk, EventDetail::seq(seq));
                    return Some(ack);
                }
            }
            if ctx.now() >= deadline {
                inbound
                    .log
                    .record(ctx, Role::Tx, EventKind::WaitAckTimeout, EventDetail::seq(seq));
                return None;
            }
            ctx.sleep(self.tick());
        }
    }

    /// Sleep for `ms` while still answering inbound frames.
    fn pause(
        &self,
        ctx: &mut dyn SystemContext,
        inbound: &mut Inbound<'_>,
        mut window: Option<&mut TransmitWindow>,
        ms: u64,
    ) {
        let deadline = ctx.now() + ms;
        loop {
            while let Some(received) = ctx.try_receive() {
                let awaiting = match window.as_deref_mut() {
                    Some(w) => Awaiting::Window(w),
                    None => Awaiting::Nothing,
                };
                inbound.dispatcher.dispatch(ctx, inbound.log, received, awaiting);
                if window.as_deref().is_some_and(TransmitWindow::is_retired) {
                    return;
                }
            }
            let now = ctx.now();
            if now >= deadline {
                return;
            }
            ctx.sleep(self.tick().min(deadline - now));
        }
    }

    fn tick(&self) -> u64 {
        self.config.poll_interval_ms.max(1)
    }

    fn report(&self, now: u64, ack: AckFrame, attempts: u32, fragments: u32) -> SendReport {
        let elapsed = now.saturating_sub(self.started_at);
        let pdr = if self.tx_data_packets > 0 {
            100.0 * ack.rx_total_packets as f64 / self.tx_data_packets as f64
        } else {
            0.0
        };
        let goodput_bps = if elapsed > 0 {
            ack.rx_total_bytes as f64 * 8.0 * 1000.0 / elapsed as f64
        } else {
            0.0
        };
        SendReport {
            seq: ack.seq,
            attempts,
            fragments,
            acked_by: ack.acker,
            peer_rx_bytes: ack.rx_total_bytes,
            peer_rx_packets: ack.rx_total_packets,
            pdr,
            goodput_bps,
        }
    }
}
