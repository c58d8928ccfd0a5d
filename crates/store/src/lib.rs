//! Transactional access to organizations, domains, aliases, DKIM keypairs,
//! message records, DNS snapshots, and the activity log (spec §3, §4.1).
//!
//! [`Store`] is the only entity-level interface the rest of the workspace
//! depends on. [`memory::MemoryStore`] is the single backend shipped with
//! this core — a process-wide `parking_lot::Mutex` around plain maps is
//! transaction enough for a single node, matching the note in `traits.rs`
//! that a networked backend would take an explicit transaction handle here
//! instead.

pub mod error;
pub mod memory;
pub mod model;
pub mod state_machine;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use traits::{AliasLookup, QuotaKind, Store};
