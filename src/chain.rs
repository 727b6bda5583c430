// Thin re-export module: the chain boundary is split into the value types
// shared with peers and the API, the SQLite-backed store, and the manager
// that owns the authoritative tip.

pub mod manager;
pub mod store;
pub mod types;

pub use manager::*;
pub use store::*;
pub use types::*;
