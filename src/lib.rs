//! html-surgeon library crate
//!
//! Exposes the pipeline stages so the CLI, benchmarks and tests drive the same
//! code paths.

pub mod apply;
pub mod config;
pub mod document;
pub mod error;
pub mod feature;
pub mod llm;
pub mod map;
pub mod pipeline;
pub mod section_map;
pub mod select;
pub mod skeleton;
pub mod util;
pub mod validate;

pub use error::{ParseError, PipelineError};
