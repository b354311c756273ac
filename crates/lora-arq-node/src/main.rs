mod config;
mod host;

use anyhow::{Context, Result};
use clap::Parser;
use lora_arq_abstract::NodeId;
use lora_arq_core::{ArqNode, CsvEventWriter};
use std::fs::File;
use std::io::{self, BufRead, BufWriter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::host::{NodeHost, UdpRadio};

#[derive(Parser, Debug)]
#[command(author, version, about = "LoRa ARQ node over a UDP datagram radio")]
struct Args {
    /// Node configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    id: Option<String>,

    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Peer address; repeat for several.
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Append protocol events as CSV to this file.
    #[arg(long)]
    event_log: Option<PathBuf>,
}

impl Args {
    fn resolve(self) -> Result<NodeConfig> {
        let mut cfg = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(id) = self.id {
            cfg.id = Some(id);
        }
        if let Some(bind) = self.bind {
            cfg.bind = bind;
        }
        if !self.peers.is_empty() {
            cfg.peers = self.peers;
        }
        if let Some(path) = self.event_log {
            cfg.event_log = Some(path);
        }
        Ok(cfg)
    }
}

/// One line typed on the console.
#[derive(Debug, PartialEq)]
enum Command {
    Send { to: Option<NodeId>, text: String },
    Stats,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    match line {
        "" => None,
        "/quit" => Some(Command::Quit),
        "/stats" => Some(Command::Stats),
        _ => match line.strip_prefix('@') {
            Some(addressed) => {
                let (to, text) = addressed.split_once(char::is_whitespace)?;
                let text = text.trim_start();
                (!text.is_empty()).then(|| Command::Send {
                    to: Some(NodeId::new(to.to_uppercase())),
                    text: text.to_string(),
                })
            }
            None => Some(Command::Send {
                to: None,
                text: line.to_string(),
            }),
        },
    }
}

fn spawn_console() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();
    let cfg = Args::parse().resolve()?;
    let id = cfg.node_id()?;
    cfg.check_datagram_fit()?;
    cfg.radio.validate().context("Invalid radio configuration")?;

    let radio = UdpRadio::bind(cfg.bind, cfg.peers.clone())
        .with_context(|| format!("Failed to bind {}", cfg.bind))?;
    let mut host = NodeHost::new(radio, cfg.radio.clone());
    if let Some(path) = &cfg.event_log {
        let file = File::create(path)
            .with_context(|| format!("Failed to create event log {}", path.display()))?;
        let writer = CsvEventWriter::new(BufWriter::new(file))
            .context("Failed to write event log header")?;
        host = host.with_event_log(writer);
    }

    let mut node = ArqNode::new(id.clone(), cfg.arq.clone()).context("Invalid ARQ configuration")?;
    info!("node {id} listening on {}, peers {:?}", cfg.bind, cfg.peers);
    node.start(&mut host);

    let console = spawn_console();
    let idle = cfg.arq.poll_interval_ms.max(1);
    loop {
        node.poll(&mut host);
        match console.try_recv() {
            Ok(line) => match parse_command(&line) {
                Some(Command::Send { to, text }) => {
                    if let Err(e) = node.send_message(&mut host, text.as_bytes(), to) {
                        warn!("{e}");
                    }
                }
                Some(Command::Stats) => {
                    let (rx_bytes, rx_packets) = node.rx_totals();
                    let (tx_packets, tx_bytes) = node.tx_totals();
                    let next = node.next_seq();
                    println!("rx {rx_packets} packets / {rx_bytes} bytes");
                    println!("tx {tx_packets} packets / {tx_bytes} bytes, next seq {next}");
                }
                Some(Command::Quit) => break,
                None => {}
            },
            Err(TryRecvError::Empty) => thread::sleep(std::time::Duration::from_millis(idle)),
            Err(TryRecvError::Disconnected) => break,
        }
    }
    info!("node {id} stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_line_broadcasts() {
        assert_eq!(
            parse_command("hello all\n"),
            Some(Command::Send {
                to: None,
                text: "hello all".into()
            })
        );
    }

    #[test]
    fn at_prefix_addresses() {
        assert_eq!(
            parse_command("@a1b2 hi there"),
            Some(Command::Send {
                to: Some(NodeId::new("A1B2")),
                text: "hi there".into()
            })
        );
        assert_eq!(parse_command("@A1B2"), None);
    }

    #[test]
    fn control_commands() {
        assert_eq!(parse_command("/quit"), Some(Command::Quit));
        assert_eq!(parse_command("/stats"), Some(Command::Stats));
        assert_eq!(parse_command("   "), None);
    }
}
