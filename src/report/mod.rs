//! Run output assembly and rendering.

pub mod builder;
pub mod generator;
pub mod narrative;

pub use builder::{build_outputs, flow_error_output};
pub use generator::{generate_json_report, generate_markdown_report};
