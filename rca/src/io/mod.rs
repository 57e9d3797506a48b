//! I/O adapters for diagnosis sessions.

pub mod config;
pub mod model;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod session_log;
pub mod toolset;
