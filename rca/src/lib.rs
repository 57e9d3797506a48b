//! Code-generation validation pipeline for telemetry root-cause analysis.
//!
//! A diagnosis session coordinates a planner, a router, one explorer and one
//! code generator per telemetry modality, and a code-execution gate. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (protocol decoding, blackboard,
//!   event extraction, quality gate, decision parsing). No I/O.
//! - **[`io`]**: Side-effecting operations (processes, sandbox, model adapter,
//!   config, prompt rendering, persisted artifacts). Isolated behind traits so
//!   tests can substitute scripted fakes.
//! - **[`agents`]**: The single-threaded actor runtime and the roles it hosts.
//!
//! Orchestration modules ([`controller`], [`session`]) drive the roles to
//! implement the `diagnose` CLI command.

pub mod agents;
pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
