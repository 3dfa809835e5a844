//! pipecast - dynamic 1-to-N broadcast over named pipes.
//!
//! Every byte written to `input/<resource>` is copied to every pipe under
//! `output/<resource>/`. Producers and consumers come and go at any time;
//! the [`coordinator::Coordinator`] notices and starts or stops the matching
//! workers.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod pipe;
pub mod registry;
pub mod scanner;
pub mod tail;
pub mod utils;
pub mod workers;

pub use config::Config;
pub use coordinator::Coordinator;
pub use error::{BroadcastError, Result};
