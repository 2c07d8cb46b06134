//! # memgrid
//!
//! Coordinator-side cluster membership for a distributed in-memory storage
//! system:
//! - Authoritative server list with generation-versioned server ids
//! - Crash detection (verified by liveness pings) and forced removal
//! - Replication groups of backups for redundant writes
//! - Monotonically versioned dissemination of list updates to every member
//! - Coordinator crash recovery via an external replicated consensus log
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Coordinator                   │
//! │  ServerList (mutators under one lock)       │
//! │    │ journal          │ commit              │
//! │    ▼                  ▼                     │
//! │  Consensus log     Update log ── updater ───┼──► members
//! │  (external)        (versioned deltas)       │    (FULL_LIST, then
//! └─────────────────────────────────────────────┘     UPDATEs in order)
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! memgrid-coord serve --id coord-1 --bind 0.0.0.0:5000
//! ```
//!
//! ### Enlist a server
//! ```bash
//! curl -X POST localhost:5000/enlist \
//!   -H 'content-type: application/json' \
//!   -d '{"services": ["backup", "membership"], "read_speed": 300,
//!        "service_locator": "http://backup-1:6000"}'
//! ```

pub mod common;
pub mod coordinator;
pub mod membership;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use membership::{ServerId, ServerList, ServiceMask};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
