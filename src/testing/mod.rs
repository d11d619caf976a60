//! Testing utilities and mock implementations
//!
//! In-process doubles for the broker connection and the PIR sensor.

pub mod mocks;

pub use mocks::*;
