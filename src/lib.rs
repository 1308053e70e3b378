//! Core library for simscript.
//!
//! Runs short user scripts attached to simulation models on one of several
//! interchangeable interpreters, with bound host objects, a per-run time
//! budget and captured output. See [`scripting`] for the entry points.

pub mod config;
pub mod error;
pub mod messages;
pub mod scripting;
