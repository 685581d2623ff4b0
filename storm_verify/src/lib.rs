// THEORY:
// This file is the entry point for the `storm_verify` library crate. It exposes
// the object-based verification engine: storm objects are extracted from truth
// and forecast fields, truth objects are aged through time, forecast objects are
// matched against them for every member and lead time, and every object ends up
// in exactly one outcome collection of a persisted per-cycle record.
//
// Consumers normally need only the `pipeline` (one cycle) and
// `parallel_pipeline` (many cycles) modules plus the configuration; the
// `core_modules` stay public for callers that want to drive single layers.

pub mod core_modules;
pub mod parallel_pipeline;
pub mod pipeline;
pub mod utils;

pub use core_modules::config::{IntensityThresholds, VerificationConfig};
pub use core_modules::error::{VerifyError, VerifyResult};
pub use core_modules::logging::setup_logging;
pub use parallel_pipeline::{CycleOutcome, WorkerPool};
pub use pipeline::{CycleReport, CycleSpec, VerificationPipeline};
