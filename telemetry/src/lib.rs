//! Telemetry setup shared by websync binaries.

pub mod tracing;
