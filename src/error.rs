//! Error types for noded

use crate::ip::AddressFamily;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Where an error sits in the startup taxonomy. Only `Partial` errors are
/// survivable during startup; everything else aborts the bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Detected while validating configuration, before any resource is opened.
    Config,
    /// A resource the node cannot run without (data dir, database, API port).
    Resource,
    /// One address family could not be brought up.
    Partial,
    /// Errors raised by running components after startup.
    Runtime,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
    #[error("invalid syncer port {0}: must be between 1 and 65535")]
    InvalidPort(u32),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("invalid API address {0:?}")]
    InvalidApiAddress(String),
    #[error("invalid duration {value:?} for {key}: {reason}")]
    InvalidDuration {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to load config file {path:?}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },

    #[error("failed to create data directory {path:?}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database error: {0}")]
    Database(String),
    #[error("database belongs to genesis {found}, expected {expected}")]
    GenesisMismatch { expected: String, found: String },
    #[error("failed to listen for API connections on {addr}: {source}")]
    ApiBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to determine {family} address: {reason}")]
    AddressUnavailable {
        family: AddressFamily,
        reason: String,
    },
    #[error("failed to listen on {family} port {port}: {source}")]
    Bind {
        family: AddressFamily,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("a syncer is already bound for {0}")]
    DuplicateBinding(AddressFamily),

    #[error("block does not connect to the chain: {0}")]
    ChainLink(String),
    #[error("chain store is closed")]
    StoreClosed,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("syncer is closed")]
    SyncerClosed,
    #[error("{addr} has no {family} address")]
    FamilyMismatch { addr: String, family: AddressFamily },
    #[error("failed to initialise logging: {0}")]
    Logging(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            NodeError::UnknownNetwork(_)
            | NodeError::InvalidPort(_)
            | NodeError::InvalidLogLevel(_)
            | NodeError::InvalidApiAddress(_)
            | NodeError::InvalidDuration { .. }
            | NodeError::ConfigFile { .. } => ErrorCategory::Config,
            NodeError::DataDir { .. }
            | NodeError::Database(_)
            | NodeError::GenesisMismatch { .. }
            | NodeError::ApiBind { .. }
            | NodeError::Logging(_) => ErrorCategory::Resource,
            NodeError::AddressUnavailable { .. }
            | NodeError::Bind { .. }
            | NodeError::DuplicateBinding(_) => ErrorCategory::Partial,
            NodeError::ChainLink(_)
            | NodeError::StoreClosed
            | NodeError::Handshake(_)
            | NodeError::Codec(_)
            | NodeError::SyncerClosed
            | NodeError::FamilyMismatch { .. }
            | NodeError::Io(_) => ErrorCategory::Runtime,
        }
    }

    /// True when startup must abort on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Config | ErrorCategory::Resource
        )
    }
}

impl From<rusqlite::Error> for NodeError {
    fn from(err: rusqlite::Error) -> Self {
        NodeError::Database(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for NodeError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        NodeError::Codec(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, NodeError>;
