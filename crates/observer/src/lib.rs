//! Terminal state classifier.
//!
//! Turns a rolling, ANSI-laden terminal buffer into an [`Observation`]:
//! a cheap heuristic pass handles unambiguous prompts, everything else goes
//! through a semantic classification call whose failures degrade to a safe
//! `working`/`wait` reading instead of an error.
//!
//! [`Observation`]: pilot_core::Observation

pub mod ansi;
pub mod heuristics;
pub mod metrics;
pub mod observer;
pub mod parse;
pub mod prompt;

pub use ansi::{strip_ansi, tail_chars};
pub use observer::{LlmStateObserver, ObserverConfig, StateObserver};
pub use parse::{parse_observation, ObservationParseError};
