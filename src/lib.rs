//! noded - full node orchestrator for the mainnet and zen networks
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Chain
//! - [`network`] - Network profiles (consensus rules, genesis, bootstrap peers)
//! - [`chain`] - Block types, SQLite chain store and the chain manager
//! - [`reorg`] - Tip-change logging
//!
//! ## Networking
//! - [`ip`] - Public address discovery per address family
//! - [`peer_store`] - Ephemeral peer address book
//! - [`gateway`] - Gateway header, wire frames and handshake
//! - [`syncer`] - Per-listener peer syncer
//! - [`bootstrap`] - Dual-stack listener bootstrap
//! - [`supervisor`] - Ownership and ordered teardown of syncers
//!
//! ## Node
//! - [`node`] - Startup and shutdown sequencing
//! - [`api`] - HTTP API server
//! - [`shutdown`] - Process signal handling
//!
//! ## Configuration & Utilities
//! - [`config`] - Command line and config file handling
//! - [`logging`] - Tracing subscriber setup
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Chain
// ============================================================================
pub mod chain;
pub mod network;
pub mod reorg;

// ============================================================================
// Networking
// ============================================================================
pub mod bootstrap;
pub mod gateway;
pub mod ip;
pub mod peer_store;
pub mod supervisor;
pub mod syncer;

// ============================================================================
// Node
// ============================================================================
pub mod api;
pub mod node;
pub mod shutdown;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod logging;

pub use error::{NodeError, Result};
pub use node::{Node, NodeState};
