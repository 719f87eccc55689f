// src/core/mod.rs

// The scanning framework: data model, engine, the seams modules talk through,
// and the modules themselves.

/// Result, aggregate and per-module data structures.
pub mod models;

pub mod cache;
pub mod clock;
pub mod dns;
pub mod engine;
pub mod error;
pub mod http;
pub mod rate_limiter;
pub mod registry;

/// Maps finished module results to a severity and a recommendation.
pub mod interpretation;

/// The built-in analysis modules and the engine wiring.
pub mod scanner;

/// Deterministic fakes for the HTTP and DNS seams.
#[cfg(any(test, feature = "testing"))]
pub mod testing;
