use bytes::{Bytes, BytesMut};
use lora_arq_abstract::NodeId;
use tracing::debug;

/// What happened to one inbound fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// First copy of this index; counts toward receive statistics.
    Fresh,
    /// Already held; nothing changed.
    Duplicate,
    /// Index or total unusable; nothing changed.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub outcome: FragmentOutcome,
    /// The joined message when this fragment completed it.
    pub completed: Option<Bytes>,
}

/// Fragments of one `(source, sequence)` message.
#[derive(Debug)]
struct Context {
    source: NodeId,
    seq: u32,
    chunks: Vec<Option<Bytes>>,
    received: usize,
}

impl Context {
    fn new(source: NodeId, seq: u32, total: u32) -> Self {
        Self {
            source,
            seq,
            chunks: vec![None; total as usize],
            received: 0,
        }
    }

    fn matches(&self, source: &NodeId, seq: u32) -> bool {
        self.seq == seq && &self.source == source
    }

    fn is_complete(&self) -> bool {
        self.received == self.chunks.len()
    }

    fn join(self) -> Bytes {
        let len = self.chunks.iter().flatten().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(len);
        for chunk in self.chunks.into_iter().flatten() {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }
}

/// Single-slot reassembly shared by every peer. Observing a fragment of a
/// different `(source, sequence)` discards whatever was in progress.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    current: Option<Context>,
    max_fragments: u32,
}

impl ReassemblyBuffer {
    pub fn new(max_fragments: u32) -> Self {
        Self {
            current: None,
            max_fragments,
        }
    }

    /// `(source, sequence, received, total)` of the reassembly in progress.
    pub fn progress(&self) -> Option<(&NodeId, u32, usize, usize)> {
        self.current
            .as_ref()
            .map(|c| (&c.source, c.seq, c.received, c.chunks.len()))
    }

    pub fn accept(
        &mut self,
        source: &NodeId,
        seq: u32,
        index: u32,
        total: u32,
        chunk: Bytes,
    ) -> Accepted {
        let rejected = Accepted {
            outcome: FragmentOutcome::Rejected,
            completed: None,
        };
        if total == 0 || total > self.max_fragments {
            debug!("rejecting fragment of {source}#{seq} with total {total}");
            return rejected;
        }

        let context = match self.current.take() {
            Some(context) if context.matches(source, seq) => context,
            previous => {
                if let Some(previous) = previous {
                    debug!(
                        "discarding partial reassembly {}#{} ({}/{})",
                        previous.source,
                        previous.seq,
                        previous.received,
                        previous.chunks.len()
                    );
                }
                Context::new(source.clone(), seq, total)
            }
        };
        let context = self.current.insert(context);

        let Some(slot) = context.chunks.get_mut(index as usize) else {
            return rejected;
        };
        let outcome = if slot.is_some() {
            FragmentOutcome::Duplicate
        } else {
            *slot = Some(chunk);
            context.received += 1;
            FragmentOutcome::Fresh
        };

        let completed = if context.is_complete() {
            self.current.take().map(Context::join)
        } else {
            None
        };
        Accepted { outcome, completed }
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn joins_out_of_order_fragments_in_index_order() {
        let src = NodeId::new("A");
        let mut buf = ReassemblyBuffer::new(16);
        assert_eq!(buf.accept(&src, 1, 2, 3, chunk("ghi")).outcome, FragmentOutcome::Fresh);
        assert_eq!(buf.accept(&src, 1, 0, 3, chunk("abc")).completed, None);
        let done = buf.accept(&src, 1, 1, 3, chunk("def"));
        assert_eq!(done.outcome, FragmentOutcome::Fresh);
        assert_eq!(done.completed, Some(chunk("abcdefghi")));
        assert!(buf.progress().is_none());
    }

    #[test]
    fn split_and_reassemble_round_trip() {
        let text: Vec<u8> = (0..1003u32).map(|i| b'a' + (i % 26) as u8).collect();
        for size in [1usize, 7, 200, 1003, 2000] {
            let chunks: Vec<Bytes> = text.chunks(size).map(Bytes::copy_from_slice).collect();
            let total = chunks.len() as u32;
            assert_eq!(total as usize, text.len().div_ceil(size));

            let mut buf = ReassemblyBuffer::new(2000);
            let src = NodeId::new("A");
            let mut completed = None;
            for (i, c) in chunks.into_iter().enumerate().rev() {
                completed = buf.accept(&src, 9, i as u32, total, c).completed;
            }
            assert_eq!(completed.as_deref(), Some(&text[..]), "chunk size {size}");
        }
    }

    #[test]
    fn duplicate_fragment_is_not_fresh() {
        let src = NodeId::new("A");
        let mut buf = ReassemblyBuffer::new(16);
        assert_eq!(buf.accept(&src, 1, 0, 2, chunk("ab")).outcome, FragmentOutcome::Fresh);
        assert_eq!(buf.accept(&src, 1, 0, 2, chunk("ab")).outcome, FragmentOutcome::Duplicate);
        assert_eq!(buf.progress().map(|p| p.2), Some(1));
    }

    #[test]
    fn new_source_discards_partial_state() {
        let a = NodeId::new("A");
        let b = NodeId::new("B");
        let mut buf = ReassemblyBuffer::new(16);
        buf.accept(&a, 1, 0, 2, chunk("a0"));
        buf.accept(&b, 1, 0, 2, chunk("b0"));
        let progress = buf.progress().unwrap();
        assert_eq!((progress.0, progress.1, progress.2), (&b, 1, 1));

        // A's second half now starts a fresh context instead of completing.
        let late = buf.accept(&a, 1, 1, 2, chunk("a1"));
        assert_eq!(late.outcome, FragmentOutcome::Fresh);
        assert_eq!(late.completed, None);
        let done = buf.accept(&a, 1, 0, 2, chunk("a0"));
        assert_eq!(done.completed, Some(chunk("a0a1")));
    }

    #[test]
    fn new_sequence_from_same_source_resets() {
        let a = NodeId::new("A");
        let mut buf = ReassemblyBuffer::new(16);
        buf.accept(&a, 1, 0, 2, chunk("x"));
        buf.accept(&a, 2, 0, 2, chunk("y"));
        assert_eq!(buf.progress().map(|p| p.1), Some(2));
    }

    #[test]
    fn rejects_unusable_indices_and_totals() {
        let a = NodeId::new("A");
        let mut buf = ReassemblyBuffer::new(4);
        assert_eq!(buf.accept(&a, 1, 0, 0, chunk("x")).outcome, FragmentOutcome::Rejected);
        assert_eq!(buf.accept(&a, 1, 0, 5, chunk("x")).outcome, FragmentOutcome::Rejected);
        assert!(buf.progress().is_none());

        assert_eq!(buf.accept(&a, 1, 3, 2, chunk("x")).outcome, FragmentOutcome::Rejected);
        // The context was opened but holds nothing.
        assert_eq!(buf.progress().map(|p| p.2), Some(0));
    }

    #[test]
    fn single_fragment_message_completes_immediately() {
        let a = NodeId::new("A");
        let mut buf = ReassemblyBuffer::new(4);
        let done = buf.accept(&a, 3, 0, 1, chunk("only"));
        assert_eq!(done.completed, Some(chunk("only")));
    }
}
