//! # latch
//!
//! Embedded last-value persistence engine.
//!
//! latch durably stores, per named item, only its most recently observed
//! value, and answers point queries for that value. It is built to sit
//! behind the generic persistence abstraction of an automation platform:
//! the platform decides *when* to persist (latch advertises "on change" and
//! "restore on startup" as its recommended triggers), latch decides *how*.
//!
//! ## Key Properties
//!
//! - Bounded, predictable storage — one pre-sized memory-mapped file, sized
//!   at open time from an expected entry count and average key size
//! - Non-blocking write path: `store` hands encode+write to a dedicated
//!   writer thread and returns immediately; same-key stores apply in
//!   submission order
//! - Self-describing record format: one JSON document per value, with a
//!   type-tagged state that round-trips every variant unambiguously
//! - Defensive reads — a corrupt record degrades to "absent", never to an
//!   error on the read path, and a corrupt table file is quarantined into
//!   `backup/` rather than deleted
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use latch::{FilterCriteria, PersistenceService, ServiceConfig, State};
//!
//! let mut service = PersistenceService::new(ServiceConfig::new("./data"));
//! service.activate();
//!
//! // Fire-and-forget store; never blocks on disk I/O.
//! service.store("temp.Kitchen", State::Number(21.5), None);
//!
//! // Point query for the latest value.
//! service.flush(); // optional barrier: make the store visible first
//! for item in service.query(&FilterCriteria::item("temp.Kitchen")) {
//!     println!("{} = {} at {}", item.name, item.state, item.timestamp);
//! }
//!
//! service.deactivate();
//! ```
//!
//! ## Architecture
//!
//! - [`PersistenceService`] — lifecycle, asynchronous stores, queries
//! - [`RecordTable`] — pre-sized mmap open-addressing key→record table
//! - [`StoredValue`] / [`State`] — the value model and its codec
//! - [`StorageLayout`] — directory tree and corrupt-file quarantine
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`service`] — service lifecycle, store, query, item info, strategies
//! - [`table`] — memory-mapped record table file format
//! - [`record`] — record codec (encode/decode)
//! - [`state`] — the tagged state variant
//! - [`layout`] — storage directory layout and quarantine
//! - [`error`] — error types

pub mod error;
pub mod layout;
pub mod record;
pub mod service;
pub mod state;
pub mod table;

// Re-export primary API types at crate root for convenience.
pub use error::{LatchError, LayoutError, Result, TableError};
pub use layout::StorageLayout;
pub use record::StoredValue;
pub use service::{
    FilterCriteria, HistoricItem, ItemInfo, PersistenceService, ServiceConfig, Strategy,
};
pub use state::State;
pub use table::RecordTable;
