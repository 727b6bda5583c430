//! Dual-stack syncer bootstrap.
//!
//! IPv4 and IPv6 are brought up independently by the same
//! [`bootstrap_family`] routine. A family that cannot resolve an address or
//! bind its port is logged and skipped; the node may end up with zero, one
//! or two live syncers.

use crate::chain::{BlockId, ChainManager};
use crate::error::NodeError;
use crate::gateway::GatewayHeader;
use crate::ip::{AddressFamily, AddressResolver};
use crate::peer_store::PeerStore;
use crate::supervisor::SyncerSupervisor;
use crate::syncer::{Syncer, SyncerOptions};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

const LISTEN_BACKLOG: i32 = 1024;

/// One live listener and the syncer serving it.
#[derive(Clone)]
pub struct ListenerBinding {
    pub family: AddressFamily,
    /// Address advertised to peers.
    pub public_ip: IpAddr,
    pub port: u16,
    pub local_addr: SocketAddr,
    pub syncer: Arc<Syncer>,
}

impl ListenerBinding {
    pub fn net_address(&self) -> String {
        SocketAddr::new(self.public_ip, self.port).to_string()
    }
}

/// Shared inputs for bringing up a family.
pub struct BootstrapContext {
    pub genesis_id: BlockId,
    pub port: u16,
    pub chain: Arc<ChainManager>,
    pub peers: Arc<PeerStore>,
    pub options: SyncerOptions,
    pub resolver: Arc<dyn AddressResolver>,
}

/// Bind the wildcard address of `family` on `port`. IPv6 sockets are
/// v6-only so both families can hold the same port.
pub fn bind_listener(family: AddressFamily, port: u16) -> std::io::Result<TcpListener> {
    let addr = SocketAddr::new(family.unspecified(), port);
    let domain = match family {
        AddressFamily::V4 => Domain::IPV4,
        AddressFamily::V6 => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    if family == AddressFamily::V6 {
        socket.set_only_v6(true)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// Resolve, bind and build the syncer for one family. The syncer is not
/// started; hand the binding to a [`SyncerSupervisor`].
pub fn bootstrap_family(
    family: AddressFamily,
    ctx: &BootstrapContext,
) -> Result<ListenerBinding, NodeError> {
    let public_ip = ctx.resolver.resolve(family)?;
    if AddressFamily::of(&public_ip) != family {
        return Err(NodeError::AddressUnavailable {
            family,
            reason: format!("resolver returned {}", public_ip),
        });
    }
    info!(family = %family, ip = %public_ip, "determined public address");

    let listener = bind_listener(family, ctx.port).map_err(|source| NodeError::Bind {
        family,
        port: ctx.port,
        source,
    })?;
    let local_addr = listener.local_addr()?;
    let port = local_addr.port();

    let header = GatewayHeader::new(ctx.genesis_id, SocketAddr::new(public_ip, port).to_string());
    let syncer = Syncer::new(
        listener,
        Arc::clone(&ctx.chain),
        Arc::clone(&ctx.peers),
        header,
        ctx.options.clone(),
    )?;

    Ok(ListenerBinding {
        family,
        public_ip,
        port,
        local_addr,
        syncer: Arc::new(syncer),
    })
}

/// Bring up every family that can be brought up. Returns the number of
/// syncers started; failures are warnings only.
pub fn bootstrap_dual_stack(ctx: &BootstrapContext, supervisor: &SyncerSupervisor) -> usize {
    let mut started = 0;
    for family in AddressFamily::ALL {
        let result = bootstrap_family(family, ctx).and_then(|binding| {
            let net_address = binding.net_address();
            supervisor.start(binding).map(|()| net_address)
        });
        match result {
            Ok(address) => {
                info!(family = %family, address = %address, "listening for syncer connections");
                started += 1;
            }
            Err(e) => warn!(family = %family, error = %e, "syncer unavailable for address family"),
        }
    }
    if started == 0 {
        warn!("no syncer listeners started; node has no peer connectivity");
    }
    started
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{BlockHeader, ChainStore};
    use std::net::{Ipv4Addr, Ipv6Addr};

    struct Scripted {
        v4: Option<IpAddr>,
        v6: Option<IpAddr>,
    }

    impl AddressResolver for Scripted {
        fn resolve(&self, family: AddressFamily) -> crate::error::Result<IpAddr> {
            let ip = match family {
                AddressFamily::V4 => self.v4,
                AddressFamily::V6 => self.v6,
            };
            ip.ok_or(NodeError::AddressUnavailable {
                family,
                reason: "scripted failure".to_string(),
            })
        }
    }

    fn context(v4: Option<IpAddr>, v6: Option<IpAddr>) -> BootstrapContext {
        let genesis = BlockHeader::child_of(BlockId::ZERO, 0, 0);
        let chain = Arc::new(ChainManager::new(ChainStore::open_in_memory(&genesis).unwrap()).unwrap());
        BootstrapContext {
            genesis_id: genesis.id(),
            port: 0,
            chain,
            peers: Arc::new(PeerStore::new()),
            options: SyncerOptions {
                max_outbound_peers: 0,
                ..SyncerOptions::default()
            },
            resolver: Arc::new(Scripted { v4, v6 }),
        }
    }

    fn public_v4() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7))
    }

    fn ipv6_available() -> bool {
        std::net::TcpListener::bind("[::1]:0").is_ok()
    }

    #[tokio::test]
    async fn test_family_binding_advertises_public_address() {
        let ctx = context(Some(public_v4()), None);
        let binding = bootstrap_family(AddressFamily::V4, &ctx).unwrap();
        assert_eq!(binding.family, AddressFamily::V4);
        assert!(binding.local_addr.ip().is_unspecified());
        assert_ne!(binding.port, 0);
        assert_eq!(
            binding.syncer.header().net_address,
            format!("203.0.113.7:{}", binding.port)
        );
        assert_eq!(binding.syncer.header().genesis_id, ctx.genesis_id);
    }

    #[tokio::test]
    async fn test_resolver_family_mismatch_is_rejected() {
        let ctx = context(None, Some(public_v4()));
        assert!(matches!(
            bootstrap_family(AddressFamily::V6, &ctx),
            Err(NodeError::AddressUnavailable { family: AddressFamily::V6, .. })
        ));
    }

    #[tokio::test]
    async fn test_one_family_failing_does_not_block_the_other() {
        let ctx = context(Some(public_v4()), None);
        let supervisor = SyncerSupervisor::new();
        assert_eq!(bootstrap_dual_stack(&ctx, &supervisor), 1);
        assert!(supervisor.has_family(AddressFamily::V4));
        assert!(!supervisor.has_family(AddressFamily::V6));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_families_yields_zero_bindings() {
        let ctx = context(None, None);
        let supervisor = SyncerSupervisor::new();
        assert_eq!(bootstrap_dual_stack(&ctx, &supervisor), 0);
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn test_both_families_share_a_port() {
        if !ipv6_available() {
            return;
        }
        let port = {
            let probe = bind_listener(AddressFamily::V4, 0).unwrap();
            probe.local_addr().unwrap().port()
        };
        let mut ctx = context(
            Some(public_v4()),
            Some(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1))),
        );
        ctx.port = port;

        let supervisor = SyncerSupervisor::new();
        assert_eq!(bootstrap_dual_stack(&ctx, &supervisor), 2);
        let bindings = supervisor.bindings();
        assert!(bindings.iter().all(|b| b.port == port));
        assert_ne!(
            bindings[0].syncer.header().unique_id,
            bindings[1].syncer.header().unique_id
        );
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_port_in_use_is_a_bind_error() {
        let held = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let mut ctx = context(Some(public_v4()), None);
        ctx.port = held.local_addr().unwrap().port();
        assert!(matches!(
            bootstrap_family(AddressFamily::V4, &ctx),
            Err(NodeError::Bind { family: AddressFamily::V4, .. })
        ));
    }
}
