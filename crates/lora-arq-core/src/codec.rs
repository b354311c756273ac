//! Text wire format of the four frame kinds.
//!
//! ```text
//! MSG,<src>,<dst>,<seq>,<text>
//! MSGF,<src>,<dst>,<seq>,<index>,<total>,<chunk>
//! ACKF,<acker>,<orig_src>,<seq>,<index>
//! ACK,<acker>,<orig_src>,<seq>,<rx_total_bytes>,<rx_total_packets>
//! ```
//!
//! There is no escaping: payload text must be passed through [`sanitize`]
//! before it is framed.

use bytes::{BufMut, Bytes, BytesMut};
use lora_arq_abstract::{
    AckFrame, DataFrame, FragmentAckFrame, FragmentFrame, Frame, FrameKind, NodeId,
};
use thiserror::Error;

const DELIMITER: u8 = b',';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown frame prefix")]
    UnknownKind,
    #[error("{kind} frame is missing field `{field}`")]
    MissingField {
        kind: FrameKind,
        field: &'static str,
    },
    #[error("{kind} frame has a non UTF-8 node id")]
    InvalidId { kind: FrameKind },
    #[error("{kind} frame has no digits in `{field}`")]
    InvalidNumber {
        kind: FrameKind,
        field: &'static str,
    },
}

/// Replace the delimiter and both newline characters with spaces.
pub fn sanitize(text: &[u8]) -> Bytes {
    text.iter()
        .map(|&b| match b {
            b',' | b'\r' | b'\n' => b' ',
            other => other,
        })
        .collect::<Vec<u8>>()
        .into()
}

pub fn encode(frame: &Frame) -> Bytes {
    let mut out = BytesMut::with_capacity(64);
    out.put_slice(frame.kind().prefix().as_bytes());
    match frame {
        Frame::Data(f) => {
            put_fields(&mut out, &[f.src.as_str(), f.dst.as_str(), &f.seq.to_string()]);
            out.put_slice(&f.text);
        }
        Frame::Fragment(f) => {
            put_fields(
                &mut out,
                &[
                    f.src.as_str(),
                    f.dst.as_str(),
                    &f.seq.to_string(),
                    &f.index.to_string(),
                    &f.total.to_string(),
                ],
            );
            out.put_slice(&f.chunk);
        }
        Frame::FragmentAck(f) => {
            put_fields(&mut out, &[f.acker.as_str(), f.orig_src.as_str(), &f.seq.to_string()]);
            out.put_slice(f.index.to_string().as_bytes());
        }
        Frame::Ack(f) => {
            put_fields(
                &mut out,
                &[
                    f.acker.as_str(),
                    f.orig_src.as_str(),
                    &f.seq.to_string(),
                    &f.rx_total_bytes.to_string(),
                ],
            );
            out.put_slice(f.rx_total_packets.to_string().as_bytes());
        }
    }
    out.freeze()
}

fn put_fields(out: &mut BytesMut, fields: &[&str]) {
    for field in fields {
        out.put_slice(field.as_bytes());
        out.put_u8(DELIMITER);
    }
}

/// Decode one datagram. The kind prefix must match exactly (case-sensitive).
pub fn decode(line: &[u8]) -> Result<Frame, DecodeError> {
    let kind = [
        FrameKind::Fragment,
        FrameKind::FragmentAck,
        FrameKind::Data,
        FrameKind::Ack,
    ]
    .into_iter()
    .find(|kind| line.starts_with(kind.prefix().as_bytes()))
    .ok_or(DecodeError::UnknownKind)?;

    let body = Bytes::copy_from_slice(&line[kind.prefix().len()..]);
    let mut fields = Fields::new(kind, body);

    let frame = match kind {
        FrameKind::Data => {
            let src = fields.id("src")?;
            let dst = fields.id("dst")?;
            let seq = fields.number("seq")?;
            let text = fields.rest();
            Frame::Data(DataFrame {
                src,
                dst,
                seq,
                text,
            })
        }
        FrameKind::Fragment => {
            let src = fields.id("src")?;
            let dst = fields.id("dst")?;
            let seq = fields.number("seq")?;
            let index = fields.number("index")?;
            let total = fields.number("total")?;
            let chunk = fields.rest();
            Frame::Fragment(FragmentFrame {
                src,
                dst,
                seq,
                index,
                total,
                chunk,
            })
        }
        FrameKind::FragmentAck => {
            let acker = fields.id("acker")?;
            let orig_src = fields.id("orig_src")?;
            let seq = fields.number("seq")?;
            let index = leading_digits(&fields.rest())
                .and_then(|v| u32::try_from(v).ok())
                .ok_or(DecodeError::InvalidNumber {
                    kind,
                    field: "index",
                })?;
            Frame::FragmentAck(FragmentAckFrame {
                acker,
                orig_src,
                seq,
                index,
            })
        }
        FrameKind::Ack => {
            let acker = fields.id("acker")?;
            let orig_src = fields.id("orig_src")?;
            let seq = fields.number("seq")?;
            // Statistics only; never fail a frame over them.
            let rx_total_bytes = fields.raw("rx_total_bytes")?;
            let rx_total_packets = fields.rest();
            Frame::Ack(AckFrame {
                acker,
                orig_src,
                seq,
                rx_total_bytes: leading_digits(&rx_total_bytes).unwrap_or(0),
                rx_total_packets: leading_digits(&rx_total_packets).unwrap_or(0),
            })
        }
    };
    Ok(frame)
}

/// Cursor over the delimiter-separated fields after the kind prefix.
struct Fields {
    kind: FrameKind,
    rest: Bytes,
}

impl Fields {
    fn new(kind: FrameKind, rest: Bytes) -> Self {
        Self { kind, rest }
    }

    fn raw(&mut self, field: &'static str) -> Result<Bytes, DecodeError> {
        let pos = self
            .rest
            .iter()
            .position(|&b| b == DELIMITER)
            .ok_or(DecodeError::MissingField {
                kind: self.kind,
                field,
            })?;
        let value = self.rest.split_to(pos);
        // Skip the delimiter itself.
        let _ = self.rest.split_to(1);
        Ok(value)
    }

    fn id(&mut self, field: &'static str) -> Result<NodeId, DecodeError> {
        let raw = self.raw(field)?;
        let id = std::str::from_utf8(&raw).map_err(|_| DecodeError::InvalidId { kind: self.kind })?;
        Ok(NodeId::new(id))
    }

    fn number<T: TryFrom<u64>>(&mut self, field: &'static str) -> Result<T, DecodeError> {
        let raw = self.raw(field)?;
        leading_digits(&raw)
            .and_then(|v| T::try_from(v).ok())
            .ok_or(DecodeError::InvalidNumber {
                kind: self.kind,
                field,
            })
    }

    /// Remainder of the line, delimiters included. Only valid as the final field.
    fn rest(&mut self) -> Bytes {
        std::mem::take(&mut self.rest)
    }
}

/// Legacy numeric parsing: skip to the first digit, read the digit run,
/// ignore whatever follows. `None` when there is no digit at all.
pub fn leading_digits(field: &[u8]) -> Option<u64> {
    let start = field.iter().position(u8::is_ascii_digit)?;
    let mut value: u64 = 0;
    for &b in field[start..].iter().take_while(|b| b.is_ascii_digit()) {
        value = value.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
    }
    Some(value)
}
