// src/transport/mod.rs

//! Transport implementations.
//!
//! This module provides concrete implementations of the collaborator
//! traits defined in `src/domain/`. Core code must not depend on
//! transport-specific types; everything is reached through the trait
//! pointers.
//!
//! Only the in-memory reference transport is bundled. Broker-backed
//! implementations plug in through [`crate::Context::with_factory`].

mod memory;

pub use memory::{create_memory_factory, MemoryBroker};
