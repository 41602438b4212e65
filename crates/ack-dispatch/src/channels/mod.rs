//! Broker channel implementations.
//!
//! Production code plugs its broker client in through the `BrokerChannel`
//! trait; this module carries the in-memory channel used by tests and the
//! simulation CLI.

pub mod memory;

pub use memory::{unknown_delivery_tag_reason, ChannelOperation, InMemoryChannel};
