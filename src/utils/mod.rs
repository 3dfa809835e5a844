//! Shared helpers for the pipecast binaries.

pub mod bootstrap;
