use super::store::ChainStore;
use super::types::{BlockHeader, ChainIndex};
use crate::error::NodeError;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered tip notifications per subscriber before it starts lagging.
const REORG_CHANNEL_CAPACITY: usize = 64;

/// Read access to the current chain tip.
pub trait TipProvider: Send + Sync {
    fn tip(&self) -> ChainIndex;
}

/// Owns the chain store and the authoritative in-memory tip. Every method
/// takes `&self`; share it behind an `Arc`.
pub struct ChainManager {
    store: Mutex<Option<ChainStore>>,
    tip: RwLock<ChainIndex>,
    reorg_tx: broadcast::Sender<ChainIndex>,
}

impl ChainManager {
    pub fn new(store: ChainStore) -> Result<Self, NodeError> {
        let tip = store.tip()?;
        let (reorg_tx, _) = broadcast::channel(REORG_CHANNEL_CAPACITY);
        Ok(Self {
            store: Mutex::new(Some(store)),
            tip: RwLock::new(tip),
            reorg_tx,
        })
    }

    pub fn tip(&self) -> ChainIndex {
        *self.tip.read()
    }

    /// Receive every subsequent tip change.
    pub fn subscribe_reorgs(&self) -> broadcast::Receiver<ChainIndex> {
        self.reorg_tx.subscribe()
    }

    /// Attach a contiguous run of headers. The first header's parent must
    /// already be in the best chain; the run replaces everything above that
    /// parent only if it ends higher than the current tip.
    pub fn add_blocks(&self, headers: &[BlockHeader]) -> Result<ChainIndex, NodeError> {
        let Some(first) = headers.first() else {
            return Ok(self.tip());
        };
        for pair in headers.windows(2) {
            if pair[1].parent_id != pair[0].id() {
                return Err(NodeError::ChainLink(format!(
                    "{} is not the parent of the next header",
                    pair[0].id()
                )));
            }
        }

        let mut guard = self.store.lock();
        let store = guard.as_mut().ok_or(NodeError::StoreClosed)?;

        let fork = store.index_of(&first.parent_id)?.ok_or_else(|| {
            NodeError::ChainLink(format!("unknown parent {}", first.parent_id))
        })?;

        let current = *self.tip.read();
        let new_height = fork.height + headers.len() as u64;
        if new_height <= current.height {
            debug!(
                fork = %fork,
                new_height,
                tip = %current,
                "ignoring branch that does not extend the best chain"
            );
            return Ok(current);
        }

        let tip = store.replace_from(fork.height, headers)?;
        *self.tip.write() = tip;
        drop(guard);

        // No subscribers is fine.
        let _ = self.reorg_tx.send(tip);
        Ok(tip)
    }

    pub fn is_closed(&self) -> bool {
        self.store.lock().is_none()
    }

    /// Release the database. Later calls are no-ops.
    pub fn close(&self) -> Result<(), NodeError> {
        match self.store.lock().take() {
            Some(store) => store.close(),
            None => Ok(()),
        }
    }
}

impl TipProvider for ChainManager {
    fn tip(&self) -> ChainIndex {
        ChainManager::tip(self)
    }
}
