//! Agor Store — repository interfaces and the in-memory reference
//! implementation.
//!
//! The daemon core reads and writes persistent state exclusively through
//! [`EntityStore`] and the [`Stores`] aggregate. The in-memory backend
//! here is the reference implementation used by the daemon in tests and
//! by any deployment that does not need durable storage; relational
//! backends implement the same traits.
//!
//! Guarantees provided at this layer:
//!
//! - `update` is an atomic read-merge-write with structural deep-merge
//!   and immutable-field protection
//! - lookup accepts full ids or short prefixes, with an explicit
//!   ambiguity error that enumerates matches
//! - message indices are gap-free and strictly increasing per session
//! - the UID ledger is append-only: a uid, once allocated, is never
//!   reused even after its user is deleted

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod entity;
pub mod error;
pub mod memory;
pub mod store;
pub mod stores;

pub use entity::Entity;
pub use error::{StoreError, StoreResult};
pub use memory::MemStore;
pub use store::EntityStore;
pub use stores::Stores;
