//! # ring-core — Trait definitions for the ring I/O core
//!
//! This crate defines the trait boundaries for every axis of variability
//! in the ring core: the abstract file object, the completion sink, the
//! async notifier, and the offload worker pool. Every other crate in the
//! workspace depends on these traits, never on one concrete type.
//!
//! ## Design principle
//!
//! > Program to the interface. Start safe. Optimize with a new impl, not
//! > by modifying the existing one.

pub mod completion;
pub mod entry;
pub mod error;
pub mod file;
pub mod notifier;
pub mod request;
pub mod worker;
