//! Peer syncer bound to one listener.
//!
//! A syncer accepts inbound peers, dials outbound peers of its own address
//! family from the shared [`PeerStore`], and keeps each session informed of
//! tip changes. Closing a syncer drops its listener at once and ends every
//! session it owns.

use crate::chain::{ChainIndex, ChainManager};
use crate::error::NodeError;
use crate::gateway::{exchange_headers, read_message, write_message, GatewayHeader, Message, UniqueId};
use crate::ip::AddressFamily;
use crate::peer_store::PeerStore;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncerOptions {
    pub max_inbound_peers: usize,
    pub max_outbound_peers: usize,
    pub max_inflight_rpcs: usize,
    pub connect_interval: Duration,
    pub handshake_timeout: Duration,
}

impl Default for SyncerOptions {
    fn default() -> Self {
        Self {
            max_inbound_peers: 1_000_000,
            max_outbound_peers: 8,
            max_inflight_rpcs: 1_000_000,
            connect_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectedPeer {
    pub header: GatewayHeader,
    pub remote_addr: SocketAddr,
    pub inbound: bool,
    pub tip: ChainIndex,
    pub connected_at: DateTime<Utc>,
}

pub struct Syncer {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    chain: Arc<ChainManager>,
    peers: Arc<PeerStore>,
    header: GatewayHeader,
    options: SyncerOptions,
    connected: RwLock<HashMap<UniqueId, ConnectedPeer>>,
    dialing: Mutex<HashSet<String>>,
    inflight: Semaphore,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Syncer {
    pub fn new(
        listener: TcpListener,
        chain: Arc<ChainManager>,
        peers: Arc<PeerStore>,
        header: GatewayHeader,
        options: SyncerOptions,
    ) -> Result<Self, NodeError> {
        for (key, value) in [
            ("syncer.connect_interval", options.connect_interval),
            ("syncer.handshake_timeout", options.handshake_timeout),
        ] {
            if value.is_zero() {
                return Err(NodeError::InvalidDuration {
                    key,
                    value: format!("{:?}", value),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = watch::channel(false);
        let permits = options.max_inflight_rpcs.clamp(1, Semaphore::MAX_PERMITS);
        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            chain,
            peers,
            header,
            options,
            connected: RwLock::new(HashMap::new()),
            dialing: Mutex::new(HashSet::new()),
            inflight: Semaphore::new(permits),
            shutdown_tx,
            closed: AtomicBool::new(false),
        })
    }

    pub fn header(&self) -> &GatewayHeader {
        &self.header
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.local_addr.ip())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn peer_count(&self) -> usize {
        self.connected.read().len()
    }

    pub fn connected_peers(&self) -> Vec<ConnectedPeer> {
        self.connected.read().values().cloned().collect()
    }

    /// Accept and dial peers until [`close`](Self::close) is called. Can
    /// only run once; the listener is consumed.
    pub async fn run(self: Arc<Self>) -> Result<(), NodeError> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or(NodeError::SyncerClosed)?;
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        let mut dial = tokio::time::interval(self.options.connect_interval);
        dial.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(address = %self.local_addr, peers = self.peers.len(), "syncer running");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.handle_inbound(stream, addr),
                    Err(e) => {
                        warn!(address = %self.local_addr, error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = dial.tick(), if self.options.max_outbound_peers > 0 => self.dial_outbound(),
            }
        }

        drop(listener);
        info!(address = %self.local_addr, "syncer stopped");
        Ok(())
    }

    /// Stop accepting, release the listener and end all sessions. Returns
    /// false if the syncer was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shutdown_tx.send_replace(true);
        drop(self.listener.lock().take());
        debug!(address = %self.local_addr, "syncer closing");
        true
    }

    /// Dial `addr` ("host:port") over this syncer's address family.
    pub async fn connect(self: &Arc<Self>, addr: &str) -> Result<ConnectedPeer, NodeError> {
        if self.is_closed() {
            return Err(NodeError::SyncerClosed);
        }
        let family = self.family();
        let remote = tokio::net::lookup_host(addr)
            .await?
            .find(|a| family.matches(a))
            .ok_or_else(|| NodeError::FamilyMismatch {
                addr: addr.to_string(),
                family,
            })?;

        let stream = timeout(self.options.handshake_timeout, TcpStream::connect(remote))
            .await
            .map_err(|_| NodeError::Handshake(format!("connect to {} timed out", remote)))??;
        self.establish(stream, remote, false).await
    }

    fn handle_inbound(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if self.is_closed() {
            return;
        }
        let inbound = self.connected.read().values().filter(|p| p.inbound).count();
        if inbound >= self.options.max_inbound_peers {
            warn!(remote = %addr, "max inbound peers reached, rejecting");
            return;
        }

        let syncer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = syncer.establish(stream, addr, true).await {
                debug!(remote = %addr, error = %e, "inbound handshake failed");
            }
        });
    }

    fn dial_outbound(self: &Arc<Self>) {
        let outbound = self.connected.read().values().filter(|p| !p.inbound).count();
        let dialing = self.dialing.lock().len();
        let wanted = self
            .options
            .max_outbound_peers
            .saturating_sub(outbound + dialing);
        if wanted == 0 {
            return;
        }

        let mut exclude: HashSet<String> = self
            .connected
            .read()
            .values()
            .map(|p| p.header.net_address.clone())
            .collect();
        exclude.insert(self.header.net_address.clone());
        exclude.extend(self.dialing.lock().iter().cloned());

        for addr in self.peers.candidates(wanted, &exclude, self.family()) {
            self.dialing.lock().insert(addr.clone());
            let syncer = self.clone();
            tokio::spawn(async move {
                match syncer.connect(&addr).await {
                    Ok(peer) => debug!(peer = %addr, tip = %peer.tip, "outbound peer connected"),
                    // Neither says anything about the peer itself.
                    Err(e @ (NodeError::FamilyMismatch { .. } | NodeError::SyncerClosed)) => {
                        debug!(peer = %addr, error = %e, "outbound connect skipped")
                    }
                    Err(e) => {
                        syncer.peers.record_failure(&addr);
                        debug!(peer = %addr, error = %e, "outbound connect failed");
                    }
                }
                syncer.dialing.lock().remove(&addr);
            });
        }
    }

    async fn establish(
        self: &Arc<Self>,
        mut stream: TcpStream,
        remote: SocketAddr,
        inbound: bool,
    ) -> Result<ConnectedPeer, NodeError> {
        // Subscribe before reporting our tip so no change is missed.
        let reorgs = self.chain.subscribe_reorgs();

        // A close during the handshake drops the stream straight away.
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow() {
            return Err(NodeError::SyncerClosed);
        }
        let (theirs, tip) = tokio::select! {
            _ = shutdown.changed() => return Err(NodeError::SyncerClosed),
            r = self.handshake(&mut stream) => r?,
        };

        let peer = ConnectedPeer {
            header: theirs.clone(),
            remote_addr: remote,
            inbound,
            tip,
            connected_at: Utc::now(),
        };
        {
            let mut connected = self.connected.write();
            if self.is_closed() {
                return Err(NodeError::SyncerClosed);
            }
            if connected.contains_key(&theirs.unique_id) {
                return Err(NodeError::Handshake(format!(
                    "already connected to {}",
                    theirs.unique_id
                )));
            }
            connected.insert(theirs.unique_id, peer.clone());
        }

        self.peers.add_peer(theirs.net_address.clone());
        self.peers.record_connect(&theirs.net_address);
        info!(
            remote = %remote,
            peer = %theirs.net_address,
            inbound,
            tip = %tip,
            "peer connected"
        );

        let syncer = self.clone();
        tokio::spawn(syncer.session(stream, theirs.unique_id, reorgs));
        Ok(peer)
    }

    async fn handshake(
        &self,
        stream: &mut TcpStream,
    ) -> Result<(GatewayHeader, ChainIndex), NodeError> {
        let handshake_timeout = self.options.handshake_timeout;
        let _permit = self
            .inflight
            .acquire()
            .await
            .map_err(|_| NodeError::SyncerClosed)?;

        let theirs = timeout(handshake_timeout, exchange_headers(stream, &self.header))
            .await
            .map_err(|_| NodeError::Handshake("header exchange timed out".to_string()))??;

        write_message(stream, &Message::Tip(self.chain.tip())).await?;
        match timeout(handshake_timeout, read_message(stream))
            .await
            .map_err(|_| NodeError::Handshake("tip exchange timed out".to_string()))??
        {
            Message::Tip(tip) => Ok((theirs, tip)),
            other => Err(NodeError::Handshake(format!(
                "expected tip, got {:?}",
                other
            ))),
        }
    }

    async fn session(
        self: Arc<Self>,
        stream: TcpStream,
        id: UniqueId,
        reorgs: broadcast::Receiver<ChainIndex>,
    ) {
        let (mut reader, mut writer) = stream.into_split();
        let mut shutdown = self.shutdown_tx.subscribe();

        let result = if *shutdown.borrow() {
            Ok(())
        } else {
            tokio::select! {
                _ = shutdown.changed() => Ok(()),
                r = self.read_loop(&mut reader, id) => r,
                r = self.write_loop(&mut writer, reorgs) => r,
            }
        };

        if let Some(peer) = self.connected.write().remove(&id) {
            match result {
                Ok(()) => debug!(peer = %peer.header.net_address, "session closed"),
                Err(e) => debug!(peer = %peer.header.net_address, error = %e, "session ended"),
            }
        }
    }

    async fn read_loop(&self, reader: &mut OwnedReadHalf, id: UniqueId) -> Result<(), NodeError> {
        loop {
            match read_message(reader).await? {
                Message::Tip(tip) => {
                    if let Some(peer) = self.connected.write().get_mut(&id) {
                        peer.tip = tip;
                    }
                    debug!(peer = %id, tip = %tip, "peer tip updated");
                }
                Message::Header(_) => {
                    return Err(NodeError::Handshake("unexpected header".to_string()))
                }
            }
        }
    }

    async fn write_loop(
        &self,
        writer: &mut OwnedWriteHalf,
        mut reorgs: broadcast::Receiver<ChainIndex>,
    ) -> Result<(), NodeError> {
        loop {
            let tip = match reorgs.recv().await {
                Ok(tip) => tip,
                Err(RecvError::Lagged(_)) => self.chain.tip(),
                Err(RecvError::Closed) => return Ok(()),
            };
            write_message(writer, &Message::Tip(tip)).await?;
        }
    }
}

impl Drop for Syncer {
    fn drop(&mut self) {
        self.close();
    }
}
