//! Survey analysis.
//!
//! The engine resolves waves and emits typed results; the aggregator holds
//! the arithmetic it relies on.

pub mod aggregator;
pub mod engine;
pub mod results;

pub use engine::AnalysisEngine;
pub use results::*;
