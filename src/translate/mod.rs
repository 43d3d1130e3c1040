//! The canonical wire schema and the engine that turns native provider streams
//! into it.
//!
//! Schema modules are plain data; all I/O lives in the engine and the adapters.

pub mod canonical;
pub mod engine;
pub mod media;
