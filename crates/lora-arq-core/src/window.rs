//! Go-Back-N transmit window.
//!
//! The window owns every encoded fragment of one message and a run of up to
//! `capacity` slots covering fragments `base..base + slots.len()`. Each slot
//! carries its own send timestamp.
//!
//! ```text
//!        base                    base + capacity
//!  ───────┼────────────────────────────┼─────────▶ fragment index
//!  acked  │ sent / unsent (slots)      │ not yet admitted
//! ```
//!
//! Acknowledgments are cumulative: accepting an ACK for index `i` moves
//! `base` to `i + 1`. On timeout every slot is marked unsent again so the
//! whole window is retransmitted from `base`.

use std::collections::VecDeque;

use bytes::Bytes;
use lora_arq_abstract::{FragmentAckFrame, NodeId};

/// An encoded fragment ready for the radio.
#[derive(Debug, Clone)]
pub struct OutboundFragment {
    pub frame: Bytes,
    /// Application bytes carried, excluding framing.
    pub chunk_len: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    sent_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    ForeignDestination,
    OtherSequence,
    /// Index below `base` (stale) or beyond the last fragment.
    OutsideWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Advanced { base: u32 },
    Retired,
    Ignored(IgnoreReason),
}

#[derive(Debug)]
pub struct TransmitWindow {
    seq: u32,
    fragments: Vec<OutboundFragment>,
    base: usize,
    capacity: usize,
    slots: VecDeque<Slot>,
}

impl TransmitWindow {
    pub fn new(seq: u32, fragments: Vec<OutboundFragment>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut window = Self {
            seq,
            fragments,
            base: 0,
            capacity,
            slots: VecDeque::with_capacity(capacity),
        };
        window.refill();
        window
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn total(&self) -> u32 {
        self.fragments.len() as u32
    }

    pub fn base(&self) -> u32 {
        self.base as u32
    }

    pub fn is_retired(&self) -> bool {
        self.base >= self.fragments.len()
    }

    pub fn fragment(&self, index: u32) -> Option<&OutboundFragment> {
        self.fragments.get(index as usize)
    }

    /// Lowest fragment index inside the window that still has to go out.
    pub fn next_unsent(&self) -> Option<u32> {
        self.slots
            .iter()
            .position(|slot| slot.sent_at.is_none())
            .map(|offset| (self.base + offset) as u32)
    }

    pub fn all_sent(&self) -> bool {
        self.next_unsent().is_none()
    }

    pub fn mark_sent(&mut self, index: u32, now: u64) {
        if let Some(offset) = (index as usize).checked_sub(self.base)
            && let Some(slot) = self.slots.get_mut(offset)
        {
            slot.sent_at = Some(now);
        }
    }

    /// Apply a fragment acknowledgment addressed to `local`.
    pub fn apply_ack(&mut self, ack: &FragmentAckFrame, local: &NodeId) -> AckOutcome {
        if &ack.orig_src != local {
            return AckOutcome::Ignored(IgnoreReason::ForeignDestination);
        }
        if ack.seq != self.seq {
            return AckOutcome::Ignored(IgnoreReason::OtherSequence);
        }
        let index = ack.index as usize;
        if index < self.base || index >= self.fragments.len() {
            return AckOutcome::Ignored(IgnoreReason::OutsideWindow);
        }

        let newly_acked = index + 1 - self.base;
        for _ in 0..newly_acked {
            self.slots.pop_front();
        }
        self.base = index + 1;
        self.refill();

        if self.is_retired() {
            AckOutcome::Retired
        } else {
            AckOutcome::Advanced {
                base: self.base as u32,
            }
        }
    }

    /// True once any sent, unacknowledged slot has waited longer than `timeout_ms`.
    pub fn timed_out(&self, now: u64, timeout_ms: u64) -> bool {
        self.slots
            .iter()
            .filter_map(|slot| slot.sent_at)
            .any(|sent_at| now.saturating_sub(sent_at) > timeout_ms)
    }

    /// Earliest send time among outstanding slots.
    pub fn oldest_send(&self) -> Option<u64> {
        self.slots.iter().filter_map(|slot| slot.sent_at).min()
    }

    /// Forget every send in the window; payloads stay so they can go out again from `base`.
    pub fn go_back(&mut self) {
        for slot in &mut self.slots {
            slot.sent_at = None;
        }
    }

    fn refill(&mut self) {
        let wanted = self.capacity.min(self.fragments.len() - self.base);
        while self.slots.len() < wanted {
            self.slots.push_back(Slot::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragments(n: usize) -> Vec<OutboundFragment> {
        (0..n)
            .map(|i| OutboundFragment {
                frame: Bytes::from(format!("frag{i}")),
                chunk_len: 4,
            })
            .collect()
    }

    fn ack(seq: u32, index: u32) -> FragmentAckFrame {
        FragmentAckFrame {
            acker: NodeId::new("B"),
            orig_src: NodeId::new("A"),
            seq,
            index,
        }
    }

    fn send_all(window: &mut TransmitWindow, now: u64) -> Vec<u32> {
        let mut sent = Vec::new();
        while let Some(index) = window.next_unsent() {
            window.mark_sent(index, now);
            sent.push(index);
        }
        sent
    }

    #[test]
    fn fills_at_most_capacity() {
        let mut window = TransmitWindow::new(1, fragments(10), 4);
        assert_eq!(send_all(&mut window, 0), vec![0, 1, 2, 3]);
        assert!(window.all_sent());
    }

    #[test]
    fn small_message_fills_only_its_fragments() {
        let mut window = TransmitWindow::new(1, fragments(3), 4);
        assert_eq!(send_all(&mut window, 0), vec![0, 1, 2]);
    }

    #[test]
    fn out_of_order_cumulative_ack_retires_window() {
        // 450 bytes at 200 per chunk: three fragments, one batch.
        let mut window = TransmitWindow::new(7, fragments(3), 4);
        send_all(&mut window, 0);
        let local = NodeId::new("A");
        assert_eq!(window.apply_ack(&ack(7, 2), &local), AckOutcome::Retired);
        assert_eq!(window.base(), 3);
        assert!(window.is_retired());
        // Late ACKs for 0 and 1 change nothing.
        assert_eq!(
            window.apply_ack(&ack(7, 0), &local),
            AckOutcome::Ignored(IgnoreReason::OutsideWindow)
        );
    }

    #[test]
    fn slide_admits_new_fragments_and_keeps_sent_state() {
        let mut window = TransmitWindow::new(1, fragments(6), 4);
        send_all(&mut window, 0);
        let local = NodeId::new("A");
        assert_eq!(
            window.apply_ack(&ack(1, 1), &local),
            AckOutcome::Advanced { base: 2 }
        );
        // 2 and 3 are still in flight; 4 and 5 were just admitted.
        assert_eq!(send_all(&mut window, 10), vec![4, 5]);
    }

    #[test]
    fn base_is_monotonic_and_bounded() {
        let mut window = TransmitWindow::new(1, fragments(8), 3);
        let local = NodeId::new("A");
        let mut last = window.base();
        for index in [5, 0, 1, 9, 2, 2, 7, 4, 3, 6, 7, 100] {
            send_all(&mut window, 0);
            window.apply_ack(&ack(1, index), &local);
            assert!(window.base() >= last);
            assert!(window.base() <= window.total());
            last = window.base();
        }
    }

    #[test]
    fn ack_beyond_window_but_within_message_still_slides() {
        let mut window = TransmitWindow::new(1, fragments(8), 2);
        send_all(&mut window, 0);
        let local = NodeId::new("A");
        assert_eq!(
            window.apply_ack(&ack(1, 5), &local),
            AckOutcome::Advanced { base: 6 }
        );
        assert_eq!(send_all(&mut window, 0), vec![6, 7]);
    }

    #[test]
    fn foreign_or_stale_acks_are_ignored() {
        let mut window = TransmitWindow::new(4, fragments(3), 4);
        send_all(&mut window, 0);
        assert_eq!(
            window.apply_ack(&ack(4, 1), &NodeId::new("C")),
            AckOutcome::Ignored(IgnoreReason::ForeignDestination)
        );
        assert_eq!(
            window.apply_ack(&ack(5, 1), &NodeId::new("A")),
            AckOutcome::Ignored(IgnoreReason::OtherSequence)
        );
        assert_eq!(window.base(), 0);
    }

    #[test]
    fn timeout_is_per_slot() {
        let mut window = TransmitWindow::new(1, fragments(3), 4);
        window.mark_sent(0, 100);
        window.mark_sent(1, 1500);
        assert!(!window.timed_out(2100, 2000));
        assert!(window.timed_out(2101, 2000));
        assert_eq!(window.oldest_send(), Some(100));
    }

    #[test]
    fn go_back_resends_exactly_the_window_from_base() {
        let mut window = TransmitWindow::new(1, fragments(10), 4);
        let local = NodeId::new("A");
        send_all(&mut window, 0);
        window.apply_ack(&ack(1, 2), &local);
        // 3..=6 in the window; only 3, 4, 5 are sent before the timeout.
        window.mark_sent(3, 5);
        window.mark_sent(4, 5);
        window.mark_sent(5, 5);
        assert!(window.timed_out(5000, 2000));
        window.go_back();
        assert_eq!(send_all(&mut window, 5000), vec![3, 4, 5, 6]);
    }

    #[test]
    fn window_of_one_is_stop_and_wait() {
        let mut window = TransmitWindow::new(1, fragments(3), 1);
        let local = NodeId::new("A");
        assert_eq!(send_all(&mut window, 0), vec![0]);
        window.apply_ack(&ack(1, 0), &local);
        assert_eq!(send_all(&mut window, 0), vec![1]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut window = TransmitWindow::new(1, fragments(2), 0);
        assert_eq!(send_all(&mut window, 0), vec![0]);
    }
}
