//! Deterministic, pure logic shared by the diagnosis pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod blackboard;
pub mod budget;
pub mod cancel;
pub mod decision;
pub mod events;
pub mod gate;
pub mod history;
pub mod protocol;
pub mod quality;
pub mod text;
pub mod types;
