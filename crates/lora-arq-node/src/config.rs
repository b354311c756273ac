use anyhow::{Context, Result, bail};
use lora_arq_abstract::{ArqConfig, NodeId, RadioConfig};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::host::MAX_DATAGRAM;

/// Upper bound on a `MSGF` header: tag, two ids, three counters and the commas.
const FRAGMENT_HEADER_MAX: usize = 64;

/// On-disk node configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Explicit hex id; wins over `hardware_id`.
    pub id: Option<String>,
    /// 48-bit hardware identifier the id is derived from.
    pub hardware_id: Option<u64>,
    pub bind: SocketAddr,
    /// Every transmission goes to all of these, like a shared channel.
    pub peers: Vec<SocketAddr>,
    pub event_log: Option<PathBuf>,
    pub arq: ArqConfig,
    pub radio: RadioConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            hardware_id: None,
            bind: SocketAddr::from(([127, 0, 0, 1], 7700)),
            peers: Vec::new(),
            event_log: None,
            arq: ArqConfig::default(),
            radio: RadioConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read node config {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse node config")
    }

    pub fn node_id(&self) -> Result<NodeId> {
        match (&self.id, self.hardware_id) {
            (Some(id), _) => {
                if id.is_empty() || id.contains(',') {
                    bail!("node id `{id}` must be non-empty and free of commas");
                }
                Ok(NodeId::new(id.to_uppercase()))
            }
            (None, Some(hw)) => Ok(NodeId::from_hardware_id(hw)),
            (None, None) => bail!("node config needs `id` or `hardware_id`"),
        }
    }

    /// A fragment has to fit the receive buffer or it arrives truncated.
    pub fn check_datagram_fit(&self) -> Result<()> {
        let largest = self.arq.frag_chunk + FRAGMENT_HEADER_MAX;
        if largest > MAX_DATAGRAM {
            bail!("frag_chunk {} overflows a {MAX_DATAGRAM} byte datagram", self.arq.frag_chunk);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let cfg: NodeConfig = toml::from_str(
            r#"
            hardware_id = 0xA1B2C3D4E5F6
            bind = "0.0.0.0:7001"
            peers = ["127.0.0.1:7002", "127.0.0.1:7003"]

            [arq]
            window_size = 2

            [radio]
            spreading_factor = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.peers.len(), 2);
        assert_eq!(cfg.arq.window_size, 2);
        assert_eq!(cfg.arq.max_tries, 3);
        assert_eq!(cfg.radio.spreading_factor, 10);
        assert_eq!(cfg.node_id().unwrap().as_str(), "A1B2C3D4E5F6");
    }

    #[test]
    fn explicit_id_wins() {
        let cfg = NodeConfig {
            id: Some("beef".into()),
            hardware_id: Some(1),
            ..Default::default()
        };
        assert_eq!(cfg.node_id().unwrap().as_str(), "BEEF");
    }

    #[test]
    fn id_required() {
        assert!(NodeConfig::default().node_id().is_err());
        let cfg = NodeConfig {
            id: Some("A,B".into()),
            ..Default::default()
        };
        assert!(cfg.node_id().is_err());
    }

    #[test]
    fn fragment_must_fit_a_datagram() {
        assert!(NodeConfig::default().check_datagram_fit().is_ok());
        let mut cfg = NodeConfig::default();
        cfg.arq.frag_chunk = MAX_DATAGRAM - FRAGMENT_HEADER_MAX;
        assert!(cfg.check_datagram_fit().is_ok());
        cfg.arq.frag_chunk = MAX_DATAGRAM;
        assert!(cfg.check_datagram_fit().is_err());
    }
}
