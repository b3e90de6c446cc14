//! # fanout_net
//!
//! Delivery substrate layer for the fan-out engine.
//!
//! This crate provides:
//!
//! - [`routing`] — exchange name, deterministic queue names and routing keys.
//! - [`codec`] — MessagePack serialisation/deserialisation helpers.
//! - [`substrate`] — the broker primitives the engine relies on
//!   ([`DeliverySubstrate`], [`Consumer`], [`Delivery`]).
//! - [`jetstream`] — a NATS JetStream-backed substrate.
//! - [`memory`] — an in-process substrate with the same routing and
//!   acknowledgement semantics.
//! - [`error`] — substrate-layer error types.

pub mod codec;
pub mod error;
pub mod jetstream;
pub mod memory;
pub mod routing;
pub mod substrate;

pub use codec::{decode, encode};
pub use error::NetError;
pub use jetstream::JetStreamSubstrate;
pub use memory::MemorySubstrate;
pub use substrate::{Consumer, Delivery, DeliverySubstrate, QueueOptions};
