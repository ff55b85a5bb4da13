//! Cross-instance distribution.
//!
//! The adapter is the only component that reads the store's pub/sub; it
//! re-emits messages to local rooms and never publishes anything back,
//! which is what prevents feedback loops between instances.

pub mod adapter;
pub mod recent;
pub mod stats;
