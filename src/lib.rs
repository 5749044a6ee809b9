//! Parallel keyboard to serial adapter.
//!
//! Characters latched from an 8-bit parallel bus on a strobe edge are queued
//! from interrupt context, validated and shaped by a cooperative drain task,
//! and forwarded to a byte-oriented transport. Legacy terminal handshaking
//! (answer-back on ENQ, bell on BEL, ready/acknowledge) and a small set of
//! discretely wired keys are handled alongside.

pub mod adapter;
pub mod config;

pub use adapter::{Adapter, AdapterContext, DrainStats, InterruptContext, TaskContext};
pub use config::{Config, ConfigError, KeyAction};
