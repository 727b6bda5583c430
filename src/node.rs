//! Node lifecycle: ordered startup, run until signalled, ordered teardown.
//!
//! Startup order is fixed: network profile, data directory, chain store,
//! chain manager, reorg subscription, peer store, per-family syncers, API
//! server. Teardown runs the other way round: API server, syncers (most
//! recent first), reorg subscription, chain store.

use crate::api::ApiServer;
use crate::bootstrap::{bootstrap_dual_stack, BootstrapContext, ListenerBinding};
use crate::chain::{ChainManager, ChainStore, CHAIN_DB_FILE};
use crate::config::{validate_port, NodeConfig};
use crate::error::NodeError;
use crate::ip::{AddressResolver, RouteResolver};
use crate::network::{self, NetworkProfile};
use crate::peer_store::PeerStore;
use crate::reorg::ReorgNotifier;
use crate::supervisor::SyncerSupervisor;
use std::fs;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle state. `Starting` covers the startup sequence inside
/// [`Node::start`] and is only reported in logs; a node handed back to the
/// caller is already `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

pub struct Node {
    config: NodeConfig,
    profile: NetworkProfile,
    chain: Arc<ChainManager>,
    peers: Arc<PeerStore>,
    supervisor: SyncerSupervisor,
    reorgs: ReorgNotifier,
    api: ApiServer,
    state: NodeState,
}

impl Node {
    /// Start with the OS routing table as the address resolver.
    pub async fn start(config: NodeConfig) -> Result<Self, NodeError> {
        Self::start_with_resolver(config, Arc::new(RouteResolver::default())).await
    }

    /// Bring the node up. Fatal errors are returned before anything later
    /// in the startup order is attempted; whatever was already started is
    /// released on the way out.
    pub async fn start_with_resolver(
        config: NodeConfig,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<Self, NodeError> {
        validate_port(u32::from(config.port))?;
        let profile = network::profile(config.network);
        debug!(state = ?NodeState::Starting, network = %profile.network, "node state");

        fs::create_dir_all(&config.data_dir).map_err(|source| NodeError::DataDir {
            path: config.data_dir.clone(),
            source,
        })?;

        let store = ChainStore::open(&config.data_dir.join(CHAIN_DB_FILE), &profile.genesis)?;
        let chain = Arc::new(ChainManager::new(store)?);
        info!(
            network = %profile.network,
            genesis = %profile.genesis_id(),
            tip = %chain.tip(),
            "using network"
        );

        let mut reorgs = ReorgNotifier::spawn(chain.subscribe_reorgs());
        let peers = Arc::new(PeerStore::seeded(profile.bootstrap_peers.iter().cloned()));

        let supervisor = SyncerSupervisor::new();
        let ctx = BootstrapContext {
            genesis_id: profile.genesis_id(),
            port: config.port,
            chain: Arc::clone(&chain),
            peers: Arc::clone(&peers),
            options: config.syncer.clone(),
            resolver,
        };
        let listeners = bootstrap_dual_stack(&ctx, &supervisor);

        let api = match ApiServer::bind(config.api_addr, chain.clone()).await {
            Ok(api) => api,
            Err(e) => {
                supervisor.shutdown().await;
                reorgs.stop().await;
                if let Err(close_err) = chain.close() {
                    warn!(error = %close_err, "failed to close chain store");
                }
                return Err(e);
            }
        };

        info!(
            state = ?NodeState::Running,
            listeners,
            peers = peers.len(),
            api = %api.local_addr(),
            "node started"
        );

        Ok(Self {
            config,
            profile,
            chain,
            peers,
            supervisor,
            reorgs,
            api,
            state: NodeState::Running,
        })
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn profile(&self) -> &NetworkProfile {
        &self.profile
    }

    pub fn chain(&self) -> &Arc<ChainManager> {
        &self.chain
    }

    pub fn peers(&self) -> &Arc<PeerStore> {
        &self.peers
    }

    pub fn bindings(&self) -> Vec<ListenerBinding> {
        self.supervisor.bindings()
    }

    pub fn api_addr(&self) -> SocketAddr {
        self.api.local_addr()
    }

    pub fn db_path(&self) -> PathBuf {
        self.config.data_dir.join(CHAIN_DB_FILE)
    }

    /// Serve until `signal` resolves, then shut down.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<(), NodeError>
    where
        F: Future<Output = ()>,
    {
        signal.await;
        self.shutdown().await
    }

    /// Release everything in reverse startup order. Only the first call
    /// does any work.
    pub async fn shutdown(&mut self) -> Result<(), NodeError> {
        if self.state != NodeState::Running {
            return Ok(());
        }
        self.state = NodeState::ShuttingDown;
        info!("shutting down");

        self.api.shutdown().await;
        let closed_families = self.supervisor.shutdown().await;
        debug!(?closed_families, "syncers closed");
        let logged = self.reorgs.stop().await;
        let closed = self.chain.close();

        self.state = NodeState::Stopped;
        info!(reorgs_logged = logged, "node stopped");
        closed
    }
}
