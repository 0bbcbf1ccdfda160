//! CLI command implementations.

pub mod control;
pub mod offsets;
pub mod serve;
pub mod simulate;
