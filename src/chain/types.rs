use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    pub const ZERO: BlockId = BlockId([0u8; 32]);

    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(BlockId(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(BlockId(bytes))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BlockId({})", self)
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockId::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid block id {:?}", s)))
    }
}

/// Position of a block in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainIndex {
    pub height: u64,
    pub id: BlockId,
}

impl fmt::Display for ChainIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}::{}", self.height, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent_id: BlockId,
    pub nonce: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub commitment: [u8; 32],
}

impl BlockHeader {
    pub fn id(&self) -> BlockId {
        let mut hasher = Sha256::new();
        hasher.update(self.parent_id.0);
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.commitment);
        BlockId(hasher.finalize().into())
    }

    /// Convenience constructor for a child of `parent`.
    pub fn child_of(parent: BlockId, nonce: u64, timestamp: u64) -> Self {
        BlockHeader {
            parent_id: parent,
            nonce,
            timestamp,
            commitment: [0u8; 32],
        }
    }
}
