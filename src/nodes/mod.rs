//! Capture loading and protocol decoders

pub mod decoders;
pub mod dsl_file;

pub use dsl_file::{DslCapture, DslHeader};
