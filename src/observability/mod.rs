//! Structured logging for the motion sensor agents

pub mod logging;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{lifecycle_span, publish_span, sensor_span};
