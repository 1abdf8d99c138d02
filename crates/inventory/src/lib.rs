//! Inventory domain module.
//!
//! This crate contains the business rules of the expiration-unit ledger,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no
//! storage). Storage backends in `pantry-infra` call into these rules so every
//! backend enforces the same arithmetic and retirement order.

pub mod item;
pub mod lookup;
pub mod unit;
pub mod view;

pub use item::{CounterDelta, DisposeSnapshot, Item, ItemSnapshot, LedgerOp, NewItem};
pub use lookup::{ItemType, Substitution};
pub use unit::{ExpirationUnit, NewUnit};
pub use view::{ItemView, ListQuery};
