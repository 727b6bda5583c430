//! Network profiles: consensus parameters, genesis block and bootstrap peers
//! for every network the node can join.

use crate::chain::{BlockHeader, BlockId};
use crate::error::NodeError;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const MAINNET_BOOTSTRAP_PEERS: &[&str] = &[
    "108.227.62.195:9981",
    "139.162.81.190:9991",
    "144.217.7.188:9981",
    "147.182.196.252:9981",
    "158.101.11.63:9981",
    "159.69.105.159:9981",
    "162.211.121.214:9981",
    "212.51.144.44:9981",
    "23.155.88.34:9981",
    "45.148.30.56:9981",
    "5.161.63.100:9981",
    "5.9.19.225:9981",
];

pub const ZEN_BOOTSTRAP_PEERS: &[&str] = &[
    "147.135.16.182:9881",
    "147.135.39.109:9881",
    "51.81.208.10:9881",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Mainnet,
    Zen,
}

impl Network {
    pub const ALL: [Network; 2] = [Network::Mainnet, Network::Zen];

    pub fn name(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Zen => "zen",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "zen" => Ok(Network::Zen),
            other => Err(NodeError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Heights at which rule changes activate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardforkHeights {
    pub dev_addr: u64,
    pub tax: u64,
    pub storage_proof: u64,
    pub oak: u64,
    pub asic: u64,
    pub foundation: u64,
    pub v2_allow: u64,
    pub v2_require: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusRules {
    pub name: &'static str,
    /// Block reward at height 0, in whole coins.
    pub initial_coinbase: u64,
    pub minimum_coinbase: u64,
    pub block_interval: Duration,
    pub maturity_delay: u64,
    pub hardforks: HardforkHeights,
}

/// Everything the node needs to know about the network it joins.
/// Immutable once selected.
#[derive(Debug, Clone)]
pub struct NetworkProfile {
    pub network: Network,
    pub rules: ConsensusRules,
    pub genesis: BlockHeader,
    pub bootstrap_peers: Vec<String>,
}

impl NetworkProfile {
    pub fn genesis_id(&self) -> BlockId {
        self.genesis.id()
    }
}

static MAINNET: Lazy<NetworkProfile> = Lazy::new(|| NetworkProfile {
    network: Network::Mainnet,
    rules: ConsensusRules {
        name: "mainnet",
        initial_coinbase: 300_000,
        minimum_coinbase: 30_000,
        block_interval: Duration::from_secs(600),
        maturity_delay: 144,
        hardforks: HardforkHeights {
            dev_addr: 10_000,
            tax: 21_000,
            storage_proof: 100_000,
            oak: 135_000,
            asic: 179_000,
            foundation: 298_000,
            v2_allow: 526_000,
            v2_require: 530_000,
        },
    },
    genesis: genesis_header("mainnet", 1_433_600_000),
    bootstrap_peers: MAINNET_BOOTSTRAP_PEERS.iter().map(|p| p.to_string()).collect(),
});

static ZEN: Lazy<NetworkProfile> = Lazy::new(|| NetworkProfile {
    network: Network::Zen,
    rules: ConsensusRules {
        name: "zen",
        initial_coinbase: 300_000,
        minimum_coinbase: 300_000,
        block_interval: Duration::from_secs(600),
        maturity_delay: 144,
        hardforks: HardforkHeights {
            dev_addr: 1,
            tax: 2,
            storage_proof: 5,
            oak: 10,
            asic: 20,
            foundation: 30,
            v2_allow: 112_000,
            v2_require: 114_000,
        },
    },
    genesis: genesis_header("zen", 1_673_600_000),
    bootstrap_peers: ZEN_BOOTSTRAP_PEERS.iter().map(|p| p.to_string()).collect(),
});

fn genesis_header(network: &str, timestamp: u64) -> BlockHeader {
    BlockHeader {
        parent_id: BlockId::ZERO,
        nonce: 0,
        timestamp,
        commitment: Sha256::digest(network.as_bytes()).into(),
    }
}

pub fn profile(network: Network) -> NetworkProfile {
    match network {
        Network::Mainnet => MAINNET.clone(),
        Network::Zen => ZEN.clone(),
    }
}

/// Map a network name to its profile. Unknown names are a configuration
/// error; there is no fallback network.
pub fn select(name: &str) -> Result<NetworkProfile, NodeError> {
    Ok(profile(name.parse()?))
}
