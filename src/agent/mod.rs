//! Motion agent orchestration
//!
//! Wires the transport, the motion source, the publisher and the heartbeat
//! together for either agent variant.

pub mod lifecycle;

pub use lifecycle::*;
