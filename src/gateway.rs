//! Gateway header and the length-prefixed frames syncers exchange.
//!
//! Every frame is a 4-byte big-endian length followed by a bincode body.
//! A session opens with both sides sending [`Message::Header`]; after that
//! either side may send [`Message::Tip`] whenever its best chain changes.

use crate::chain::{BlockId, ChainIndex};
use crate::error::NodeError;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Random per-listener identity, used to detect self-connections.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueId(pub [u8; 8]);

impl UniqueId {
    pub fn generate() -> Self {
        let mut id = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut id);
        UniqueId(id)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UniqueId({})", self)
    }
}

/// What a syncer presents to peers when a connection opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayHeader {
    pub genesis_id: BlockId,
    pub unique_id: UniqueId,
    /// Address other peers should dial to reach this listener.
    pub net_address: String,
}

impl GatewayHeader {
    /// Header with a freshly generated unique id.
    pub fn new(genesis_id: BlockId, net_address: impl Into<String>) -> Self {
        Self {
            genesis_id,
            unique_id: UniqueId::generate(),
            net_address: net_address.into(),
        }
    }

    /// Check a remote header against ours before accepting the session.
    pub fn validate_remote(&self, remote: &GatewayHeader) -> Result<(), NodeError> {
        if remote.genesis_id != self.genesis_id {
            return Err(NodeError::Handshake(format!(
                "peer has different genesis block {}",
                remote.genesis_id
            )));
        }
        if remote.unique_id == self.unique_id {
            return Err(NodeError::Handshake("connected to self".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Header(GatewayHeader),
    Tip(ChainIndex),
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), NodeError>
where
    W: AsyncWrite + Unpin,
{
    let body = bincode::serialize(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(NodeError::Codec(format!(
            "frame of {} bytes exceeds limit",
            body.len()
        )));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R>(reader: &mut R) -> Result<Message, NodeError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NodeError::Codec(format!(
            "frame of {} bytes exceeds limit",
            len
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(bincode::deserialize(&body)?)
}

/// Send our header and read the peer's. Both sides write first, so the
/// exchange cannot deadlock.
pub async fn exchange_headers<S>(
    stream: &mut S,
    ours: &GatewayHeader,
) -> Result<GatewayHeader, NodeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_message(stream, &Message::Header(ours.clone())).await?;
    match read_message(stream).await? {
        Message::Header(theirs) => {
            ours.validate_remote(&theirs)?;
            Ok(theirs)
        }
        other => Err(NodeError::Handshake(format!(
            "expected header, got {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_headers_never_collide() {
        let genesis = BlockId([1u8; 32]);
        let v4 = GatewayHeader::new(genesis, "203.0.113.7:9981");
        let v6 = GatewayHeader::new(genesis, "[2001:db8::1]:9981");
        assert_ne!(v4.unique_id, v6.unique_id);
        assert!(v4.validate_remote(&v6).is_ok());
    }

    #[test]
    fn test_validate_remote_rejects_foreign_and_self() {
        let ours = GatewayHeader::new(BlockId([1u8; 32]), "a:1");
        let foreign = GatewayHeader::new(BlockId([2u8; 32]), "b:2");
        assert!(matches!(
            ours.validate_remote(&foreign),
            Err(NodeError::Handshake(_))
        ));
        assert!(matches!(
            ours.validate_remote(&ours.clone()),
            Err(NodeError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn test_header_exchange_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let genesis = BlockId([3u8; 32]);
        let ha = GatewayHeader::new(genesis, "a:1");
        let hb = GatewayHeader::new(genesis, "b:2");

        let (ra, rb) = tokio::join!(exchange_headers(&mut a, &ha), exchange_headers(&mut b, &hb));
        assert_eq!(ra.unwrap(), hb);
        assert_eq!(rb.unwrap(), ha);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32((MAX_FRAME_SIZE + 1) as u32).await.unwrap();
        assert!(matches!(read_message(&mut b).await, Err(NodeError::Codec(_))));
    }
}
