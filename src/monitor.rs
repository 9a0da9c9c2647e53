//! Drives a download session from the content log.
//!
//! Lines from the [`LogTailer`] are classified and folded into a
//! [`SessionState`] until the session finishes, fails, or the log stays
//! quiet past the idle timeout.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::classifier::{classify, Event};
use crate::session::SessionState;
use crate::summary::BYTES_PER_MIB;
use crate::tailer::{LogTailer, TailEvent, DEFAULT_POLL_INTERVAL};

/// Tuning for the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Wait between polls of an idle log.
    pub poll_interval: Duration,
    /// Give up after this long without a new line. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Log every raw line at debug level.
    pub echo_lines: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_timeout: None,
            echo_lines: false,
        }
    }
}

/// Ways a monitored session can end without finishing.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Steam reported a failure in the content log.
    #[error("Failed to download, check log ({}): {line}", log_path.display())]
    SessionFailed {
        /// Log being followed.
        log_path: PathBuf,
        /// The line that reported the failure.
        line: String,
    },

    /// The log stayed quiet for longer than the idle timeout.
    #[error("no activity in {} for {}s", log_path.display(), after.as_secs())]
    TailerTimeout {
        /// Log being followed.
        log_path: PathBuf,
        /// The idle timeout that elapsed.
        after: Duration,
    },

    /// The log could not be read.
    #[error(transparent)]
    Tail(#[from] anyhow::Error),
}

/// Follows one session in a content log.
pub struct Monitor {
    tailer: LogTailer,
    settings: MonitorSettings,
    state: SessionState,
}

impl Monitor {
    /// Create a monitor over an open tailer.
    pub fn new(tailer: LogTailer, settings: MonitorSettings) -> Self {
        Self {
            tailer,
            settings,
            state: SessionState::new(),
        }
    }

    /// Follow the log until the session reaches a terminal phase.
    ///
    /// The tailer, and with it the log handle, is dropped when this returns
    /// or when the future is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::SessionFailed`] when Steam reports a failure,
    /// [`MonitorError::TailerTimeout`] when the idle timeout elapses, and
    /// [`MonitorError::Tail`] when the log cannot be read.
    pub async fn run(self) -> Result<SessionState, MonitorError> {
        let Self {
            mut tailer,
            settings,
            mut state,
        } = self;

        info!(log = %tailer.path().display(), "watching content log");

        while !state.is_terminal() {
            let line = match tailer
                .next_line(settings.poll_interval, settings.idle_timeout)
                .await?
            {
                TailEvent::Line(line) => line,
                TailEvent::Timeout => {
                    let after = settings.idle_timeout.unwrap_or_default();
                    state.fail(format!("no log activity for {}s", after.as_secs()));
                    warn!(log = %tailer.path().display(), "timed out waiting for log activity");
                    return Err(MonitorError::TailerTimeout {
                        log_path: tailer.path().to_path_buf(),
                        after,
                    });
                }
            };

            if settings.echo_lines {
                debug!(">>> {line}");
            }

            let Some(event) = classify(&line) else {
                continue;
            };

            if state.record(event.clone()).is_some() {
                report_progress(&event, &state);
            }
        }

        match state.failure() {
            Some(line) => Err(MonitorError::SessionFailed {
                log_path: tailer.path().to_path_buf(),
                line: line.to_owned(),
            }),
            None => Ok(state),
        }
    }
}

/// Log an accepted event as user-facing progress.
fn report_progress(event: &Event, state: &SessionState) {
    match event {
        Event::RemovalCompleted => info!("removed existing copy"),
        Event::DownloadStarted {
            timestamp,
            size_bytes,
        } => info!(
            start = %timestamp,
            size_mb = size_bytes / BYTES_PER_MIB,
            "downloading"
        ),
        Event::SourcesDiscovered {
            source_count,
            proxy_count,
        } => info!(
            sources = source_count,
            proxies = proxy_count,
            "download sources discovered"
        ),
        Event::SourceAdded { host } => info!(
            host = %host,
            total = state.added_sources().len(),
            "adding download source"
        ),
        Event::DownloadFinished { timestamp } => info!(end = %timestamp, "download finished"),
        Event::DownloadFailed { message } => warn!(line = %message, "download failed"),
    }
}
