//! Stagecraft Registry - Idempotency ledger and stage lineage
//!
//! The [`ResourceRegistry`] maps deterministic [`ResourceKey`]s to remote
//! identifiers. It is the create-or-get gate: a key that is already
//! `Created` is returned without a remote call, and concurrent callers for
//! the same key are serialized so only one of them ever creates it.
//!
//! The [`LineageStore`] records which artifact versions reached which stage.
//!
//! Both sit behind injectable store traits with in-memory and JSON-file
//! implementations.
//!
//! [`ResourceKey`]: stagecraft_types::ResourceKey

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod lineage;
pub mod registry;
pub mod store;

pub use error::{RegistryError, Result};
pub use lineage::{FileLineageStore, InMemoryLineageStore, LineageStore};
pub use registry::{Lookup, Reservation, ResourceRegistry};
pub use store::{FileResourceStore, InMemoryResourceStore, ResourceStore};
