//! Batch input and output formats used by the CLI.

pub mod csv;
pub mod json;
