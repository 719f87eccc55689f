// src/lib.rs

pub mod config;
pub mod core;
pub mod logging;

pub use crate::core::engine::{ScanEngine, normalize_domain};
pub use crate::core::error::{Result, ScanError};
pub use crate::core::interpretation::interpret;
pub use crate::core::models::{
    DomainScanAggregate, ExecutedScannerResult, ScannerInterpretation, Severity,
};
