//! # keyward-domain
//!
//! Pure domain model for the keyward automation engine.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps, durations
//! - Define **Automations** (trigger → delayed, prioritized steps)
//! - Define **Events** (raw domain events and their normalized automation form)
//! - Define **Users** (the resources automations act on)
//! - Define **Sync providers** (external directories imported periodically)
//! - Define **Leases** and **scheduled work** shared across the cluster
//! - Contain all invariant enforcement and domain logic
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod automation;
pub mod cluster;
pub mod event;
pub mod lease;
pub mod outcome;
pub mod schedule;
pub mod sync;
pub mod user;
