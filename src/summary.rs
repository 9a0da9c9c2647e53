//! Throughput summary for a finished download session.

use std::fmt;

use chrono::{NaiveTime, Timelike};
use serde::Serialize;

use crate::session::{Phase, SessionState};

/// Bytes per binary megabyte.
pub const BYTES_PER_MIB: u64 = 1_048_576;

const SECONDS_PER_DAY: u32 = 86_400;

/// Summaries can only be built from a finished session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SummaryError {
    /// The session is not in a state a summary can be derived from.
    #[error("cannot summarize session: {0}")]
    InvalidState(String),
}

/// Timing and throughput of one completed download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    /// Bytes downloaded.
    pub total_bytes: u64,
    /// Whole seconds between start and finish.
    pub elapsed_seconds: u64,
    /// Average rate in bits per second.
    pub bits_per_second: f64,
    /// Average rate in binary megabytes per second.
    pub megabytes_per_second: f64,
    /// Time of day the download started.
    pub start_time: NaiveTime,
    /// Time of day the download finished.
    pub end_time: NaiveTime,
}

impl Summary {
    /// Size in whole binary megabytes.
    pub fn total_megabytes(&self) -> u64 {
        self.total_bytes / BYTES_PER_MIB
    }

    /// Rate in whole binary megabits per second.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn megabits_per_second(&self) -> u64 {
        (self.bits_per_second / BYTES_PER_MIB as f64) as u64
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Completed download of {} MB in {} seconds at {} Mbps ({:.1} MB/s), from {} to {}",
            self.total_megabytes(),
            self.elapsed_seconds,
            self.megabits_per_second(),
            self.megabytes_per_second,
            self.start_time.format("%H:%M:%S"),
            self.end_time.format("%H:%M:%S"),
        )
    }
}

/// Build the summary for a finished session.
///
/// # Errors
///
/// Returns [`SummaryError::InvalidState`] when the session is not
/// [`Phase::Finished`] or no time elapsed between start and finish.
pub fn summarize(state: &SessionState) -> Result<Summary, SummaryError> {
    if state.phase() != Phase::Finished {
        return Err(SummaryError::InvalidState(format!(
            "phase is '{}', expected 'finished'",
            state.phase()
        )));
    }

    let (Some(start_time), Some(end_time), Some(total_bytes)) =
        (state.start_time(), state.end_time(), state.size_bytes())
    else {
        return Err(SummaryError::InvalidState(
            "finished session is missing its start or end".to_owned(),
        ));
    };

    let elapsed_seconds = elapsed_seconds(start_time, end_time);
    if elapsed_seconds == 0 {
        return Err(SummaryError::InvalidState(
            "zero seconds elapsed between start and finish".to_owned(),
        ));
    }

    #[allow(clippy::cast_precision_loss)]
    let bits_per_second = total_bytes as f64 * 8.0 / elapsed_seconds as f64;
    #[allow(clippy::cast_precision_loss)]
    let megabytes_per_second = bits_per_second / 8.0 / BYTES_PER_MIB as f64;

    Ok(Summary {
        total_bytes,
        elapsed_seconds,
        bits_per_second,
        megabytes_per_second,
        start_time,
        end_time,
    })
}

/// Seconds from `start` to `end` on a 24-hour clock.
///
/// An `end` earlier than `start` is taken to be on the following day. Longer
/// sessions cannot be told apart since the log carries only the time of day.
pub fn elapsed_seconds(start: NaiveTime, end: NaiveTime) -> u64 {
    let start = start.num_seconds_from_midnight();
    let end = end.num_seconds_from_midnight();

    let seconds = end
        .checked_sub(start)
        .unwrap_or_else(|| SECONDS_PER_DAY.saturating_sub(start).saturating_add(end));

    u64::from(seconds)
}
