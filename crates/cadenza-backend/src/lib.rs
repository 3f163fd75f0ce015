//! Responder-process internals, exposed as a library so integration
//! tests can run the full stack in-process.

pub mod engine;
pub mod handlers;

pub use engine::{Engine, EngineError};
