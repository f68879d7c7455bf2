//! rampart-server — the message processor that drives the v8 handshake,
//! and the per-connection transport loop around it.

pub mod connection;
pub mod processor;

pub use processor::{Output, Processor, ProcessorError};
