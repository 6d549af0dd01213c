//! Tradewind Testing Framework
//!
//! Test doubles and assertions for code instrumented with
//! `tradewind-telemetry`, so tests can check what was traced without a
//! console or a real backend.

pub mod assertions;
pub mod exporters;

pub use assertions::assert_well_formed_trace;
pub use exporters::{FailingExporter, PanickingExporter, RecordingExporter};
