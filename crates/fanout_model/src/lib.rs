//! # fanout_model
//!
//! The data that flows through the fan-out engine.
//!
//! This crate provides:
//!
//! - [`Item`] — a typed, visibility-scoped record published by a producer.
//! - [`Subscription`] — a principal's standing registration for items of one
//!   type that satisfy a filter.
//! - [`PrincipalId`] — identifier of a principal named in visibility sets.
//! - [`Filter`] — a declarative predicate over an item's serialised form,
//!   evaluated by a small interpreter with no I/O.

pub mod document;
pub mod filter;
pub mod item;
pub mod subscription;

pub use filter::{Condition, FieldPath, Filter, FilterError};
pub use item::{Item, PrincipalId};
pub use subscription::Subscription;
