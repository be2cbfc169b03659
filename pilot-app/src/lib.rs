//! `pilotd`: supervises interactive coding CLIs over pseudo-terminals and
//! speaks newline-delimited JSON on stdin/stdout.

pub mod config;
pub mod daemon;
pub mod protocol;
pub mod telemetry;
