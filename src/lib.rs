//! steamspeed — measure Steam download throughput.
//!
//! Removes and re-downloads a Steam app with `steamcmd` while following
//! Steam's content log. Log lines are classified into session events, folded
//! into a session state machine, and the start and finish timestamps give the
//! effective download rate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Log line classification into session events.
pub mod classifier;
/// Configuration loading and validation.
pub mod config;
/// Tracing subscriber setup.
pub mod logging;
/// Session driver over a tailed log.
pub mod monitor;
/// Download session state machine.
pub mod session;
/// steamcmd invocation and output parsing.
pub mod steamcmd;
/// Throughput summary.
pub mod summary;
/// Following a growing log file.
pub mod tailer;
