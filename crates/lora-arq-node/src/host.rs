//! Runs an [`ArqNode`](lora_arq_core::ArqNode) against a UDP socket standing in for the radio.

use bytes::Bytes;
use lora_arq_abstract::{Delivery, EventRecord, Notice, RadioConfig, Received, SystemContext};
use lora_arq_core::{CsvEventWriter, time_on_air_ms};
use std::fs::File;
use std::io::{self, BufWriter};
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

pub(crate) const MAX_DATAGRAM: usize = 2048;

/// Datagram radio: broadcast by unicasting to every peer, receive without blocking.
pub struct UdpRadio {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
    buf: Vec<u8>,
}

impl UdpRadio {
    pub fn bind(addr: SocketAddr, peers: Vec<SocketAddr>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            peers,
            buf: vec![0; MAX_DATAGRAM],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn send(&self, frame: &[u8]) {
        for peer in &self.peers {
            if let Err(e) = self.socket.send_to(frame, peer) {
                // Lost on the air as far as the protocol can tell.
                warn!("send to {peer} failed: {e}");
            }
        }
    }

    pub fn try_receive(&mut self) -> Option<Received> {
        match self.socket.recv_from(&mut self.buf) {
            Ok((len, from)) => {
                trace!("{len} bytes from {from}");
                Some(Received::new(Bytes::copy_from_slice(&self.buf[..len])))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!("receive failed: {e}");
                None
            }
        }
    }
}

/// Host side of a live node: wall clock, stdout console and optional CSV event file.
pub struct NodeHost {
    radio: UdpRadio,
    modulation: RadioConfig,
    started: Instant,
    events: Option<CsvEventWriter<BufWriter<File>>>,
}

impl NodeHost {
    pub fn new(radio: UdpRadio, modulation: RadioConfig) -> Self {
        Self {
            radio,
            modulation,
            started: Instant::now(),
            events: None,
        }
    }

    pub fn with_event_log(mut self, writer: CsvEventWriter<BufWriter<File>>) -> Self {
        self.events = Some(writer);
        self
    }
}

impl SystemContext for NodeHost {
    fn send_frame(&mut self, frame: Bytes) {
        self.radio.send(&frame);
    }

    fn try_receive(&mut self) -> Option<Received> {
        self.radio.try_receive()
    }

    fn airtime_ms(&self, payload_len: usize) -> f64 {
        time_on_air_ms(&self.modulation, payload_len)
    }

    fn now(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn sleep(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }

    fn deliver(&mut self, delivery: Delivery) {
        println!(
            "[{} #{}] {}",
            delivery.from,
            delivery.seq,
            String::from_utf8_lossy(&delivery.text)
        );
    }

    fn notify(&mut self, notice: Notice) {
        match notice {
            Notice::Attempt { seq, attempt, max } => println!("sending #{seq} ({attempt}/{max})"),
            Notice::Delivered(report) => println!(
                "#{} acked by {}: pdr {:.1}%, goodput {:.0} bit/s",
                report.seq, report.acked_by, report.pdr, report.goodput_bps
            ),
            Notice::Failed { seq, attempts } => {
                println!("#{seq} failed after {attempts} attempts")
            }
        }
    }

    fn record_event(&mut self, record: EventRecord) {
        let Some(writer) = &mut self.events else {
            return;
        };
        if let Err(e) = writer.write(&record) {
            warn!("event log write failed, disabling it: {e}");
            self.events = None;
        }
    }
}
