//! SQLite-backed chain database.

use super::types::{BlockHeader, BlockId, ChainIndex};
use crate::error::NodeError;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// File name of the chain database inside the data directory.
pub const CHAIN_DB_FILE: &str = "consensus.db";

/// Persistent storage for the best chain. Not synchronised; the
/// [`ChainManager`](super::ChainManager) serialises access.
pub struct ChainStore {
    conn: Connection,
}

impl ChainStore {
    /// Open (or create) the database at `path` for the chain rooted at
    /// `genesis`. A database written for a different genesis is rejected.
    pub fn open(path: &Path, genesis: &BlockHeader) -> Result<Self, NodeError> {
        let conn = Connection::open(path)
            .map_err(|e| NodeError::Database(format!("Failed to open {:?}: {}", path, e)))?;
        Self::init(conn, genesis)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory(genesis: &BlockHeader) -> Result<Self, NodeError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| NodeError::Database(format!("Failed to open database: {}", e)))?;
        Self::init(conn, genesis)
    }

    fn init(conn: Connection, genesis: &BlockHeader) -> Result<Self, NodeError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                height INTEGER PRIMARY KEY,
                id BLOB NOT NULL UNIQUE,
                parent_id BLOB NOT NULL,
                nonce INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                commitment BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| NodeError::Database(format!("Failed to create blocks table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| NodeError::Database(format!("Failed to create metadata table: {}", e)))?;

        let store = ChainStore { conn };
        let genesis_id = genesis.id();
        let stored: Option<String> = store
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'genesis_id'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(found) if found != genesis_id.to_string() => {
                return Err(NodeError::GenesisMismatch {
                    expected: genesis_id.to_string(),
                    found,
                });
            }
            Some(_) => {}
            None => {
                let tx = store.conn.unchecked_transaction()?;
                insert_block(&tx, 0, genesis)?;
                tx.execute(
                    "INSERT INTO metadata (key, value) VALUES ('genesis_id', ?1)",
                    params![genesis_id.to_string()],
                )?;
                tx.commit()
                    .map_err(|e| NodeError::Database(format!("Failed to write genesis: {}", e)))?;
            }
        }

        Ok(store)
    }

    pub fn tip(&self) -> Result<ChainIndex, NodeError> {
        let (height, id): (i64, Vec<u8>) = self
            .conn
            .query_row(
                "SELECT height, id FROM blocks ORDER BY height DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| NodeError::Database(format!("Failed to read tip: {}", e)))?;
        Ok(ChainIndex {
            height: height as u64,
            id: decode_id(&id)?,
        })
    }

    /// Position of `id` in the best chain, if present.
    pub fn index_of(&self, id: &BlockId) -> Result<Option<ChainIndex>, NodeError> {
        let height: Option<i64> = self
            .conn
            .query_row(
                "SELECT height FROM blocks WHERE id = ?1",
                params![id.0.to_vec()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(height.map(|h| ChainIndex {
            height: h as u64,
            id: *id,
        }))
    }

    pub fn header_at(&self, height: u64) -> Result<Option<BlockHeader>, NodeError> {
        let row = self
            .conn
            .query_row(
                "SELECT parent_id, nonce, timestamp, commitment FROM blocks WHERE height = ?1",
                params![height as i64],
                |row| {
                    let parent: Vec<u8> = row.get(0)?;
                    let nonce: i64 = row.get(1)?;
                    let timestamp: i64 = row.get(2)?;
                    let commitment: Vec<u8> = row.get(3)?;
                    Ok((parent, nonce, timestamp, commitment))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((parent, nonce, timestamp, commitment)) => {
                let commitment: [u8; 32] = commitment
                    .as_slice()
                    .try_into()
                    .map_err(|_| NodeError::Database("corrupt commitment".to_string()))?;
                Ok(Some(BlockHeader {
                    parent_id: decode_id(&parent)?,
                    nonce: nonce as u64,
                    timestamp: timestamp as u64,
                    commitment,
                }))
            }
        }
    }

    /// Atomically drop every block above `fork_height` and append `headers`
    /// starting at `fork_height + 1`. Returns the new tip.
    pub fn replace_from(
        &mut self,
        fork_height: u64,
        headers: &[BlockHeader],
    ) -> Result<ChainIndex, NodeError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| NodeError::Database(format!("Failed to start transaction: {}", e)))?;

        tx.execute(
            "DELETE FROM blocks WHERE height > ?1",
            params![fork_height as i64],
        )
        .map_err(|e| NodeError::Database(format!("Failed to revert blocks: {}", e)))?;

        let mut height = fork_height;
        for header in headers {
            height += 1;
            insert_block(&tx, height, header)?;
        }

        tx.commit()
            .map_err(|e| NodeError::Database(format!("Failed to commit transaction: {}", e)))?;

        self.tip()
    }

    pub fn close(self) -> Result<(), NodeError> {
        self.conn
            .close()
            .map_err(|(_, e)| NodeError::Database(format!("Failed to close database: {}", e)))
    }
}

fn insert_block(conn: &Connection, height: u64, header: &BlockHeader) -> Result<(), NodeError> {
    conn.execute(
        "INSERT INTO blocks (height, id, parent_id, nonce, timestamp, commitment)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            height as i64,
            header.id().0.to_vec(),
            header.parent_id.0.to_vec(),
            header.nonce as i64,
            header.timestamp as i64,
            header.commitment.to_vec(),
        ],
    )
    .map_err(|e| NodeError::Database(format!("Failed to save block: {}", e)))?;
    Ok(())
}

fn decode_id(bytes: &[u8]) -> Result<BlockId, NodeError> {
    BlockId::from_slice(bytes).ok_or_else(|| NodeError::Database("corrupt block id".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn genesis(seed: u8) -> BlockHeader {
        BlockHeader {
            parent_id: BlockId::ZERO,
            nonce: 0,
            timestamp: 1_433_600_000,
            commitment: [seed; 32],
        }
    }

    #[test]
    fn test_fresh_store_starts_at_genesis() {
        let g = genesis(1);
        let store = ChainStore::open_in_memory(&g).unwrap();
        let tip = store.tip().unwrap();
        assert_eq!(tip.height, 0);
        assert_eq!(tip.id, g.id());
        assert_eq!(store.header_at(0).unwrap(), Some(g));
        assert!(store.header_at(1).unwrap().is_none());
    }

    #[test]
    fn test_replace_from_extends_and_reverts() {
        let g = genesis(1);
        let mut store = ChainStore::open_in_memory(&g).unwrap();

        let b1 = BlockHeader::child_of(g.id(), 1, 10);
        let b2 = BlockHeader::child_of(b1.id(), 2, 20);
        let tip = store.replace_from(0, &[b1.clone(), b2.clone()]).unwrap();
        assert_eq!(tip, ChainIndex { height: 2, id: b2.id() });
        assert_eq!(store.index_of(&b1.id()).unwrap().unwrap().height, 1);

        let alt = BlockHeader::child_of(g.id(), 9, 11);
        let tip = store.replace_from(0, &[alt.clone()]).unwrap();
        assert_eq!(tip, ChainIndex { height: 1, id: alt.id() });
        assert!(store.index_of(&b2.id()).unwrap().is_none());
    }

    #[test]
    fn test_reopen_keeps_chain_and_rejects_foreign_genesis() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CHAIN_DB_FILE);
        let g = genesis(1);

        let mut store = ChainStore::open(&path, &g).unwrap();
        let b1 = BlockHeader::child_of(g.id(), 1, 10);
        store.replace_from(0, &[b1.clone()]).unwrap();
        store.close().unwrap();

        let store = ChainStore::open(&path, &g).unwrap();
        assert_eq!(store.tip().unwrap().id, b1.id());
        store.close().unwrap();

        let err = ChainStore::open(&path, &genesis(2)).err().unwrap();
        assert!(matches!(err, NodeError::GenesisMismatch { .. }));
    }
}
