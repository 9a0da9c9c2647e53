//! Download session state machine.
//!
//! A [`SessionState`] starts in [`Phase::AwaitingStart`] and is advanced one
//! [`Event`] at a time. Events that arrive in a phase that does not expect
//! them are ignored with a warning: the content log is best-effort and
//! Steam's retries can repeat lines. Once the phase is terminal the state is
//! frozen.

use std::fmt;
use std::ops::ControlFlow;

use chrono::NaiveTime;
use serde::Serialize;
use tracing::warn;

use crate::classifier::Event;

/// Current step of a download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for the download to start.
    AwaitingStart,
    /// The previous installation has been removed.
    Removing,
    /// Content is being downloaded.
    Downloading,
    /// Download completed.
    Finished,
    /// Steam reported a failure, or the log went quiet for too long.
    Failed,
}

impl Phase {
    /// Whether no further events will be processed.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::AwaitingStart => "awaiting start",
            Self::Removing => "removing",
            Self::Downloading => "downloading",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Source counts announced when the download begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    /// Number of content servers.
    pub sources: u32,
    /// Number of caching proxies.
    pub proxies: u32,
}

/// Start of the download. Time and size are always recorded together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Started {
    at: NaiveTime,
    size_bytes: u64,
}

/// Outcome of applying an accepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The phase changed.
    Moved {
        /// Phase before the event.
        from: Phase,
        /// Phase after the event.
        to: Phase,
    },
    /// The phase stayed the same but the state gained information.
    Enriched,
}

/// An event arrived in a phase that does not accept it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ignored {event} event in phase '{phase}'")]
pub struct OutOfOrderEvent {
    /// Phase the session was in.
    pub phase: Phase,
    /// Kind of event that was rejected.
    pub event: &'static str,
}

/// Accumulated state of one download session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    phase: Phase,
    started: Option<Started>,
    end_time: Option<NaiveTime>,
    discovered_sources: Option<SourceCounts>,
    added_sources: Vec<String>,
    failure: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// A fresh session waiting for the download to start.
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingStart,
            started: None,
            end_time: None,
            discovered_sources: None,
            added_sources: Vec::new(),
            failure: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the session has finished or failed.
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Time of day the download started.
    pub fn start_time(&self) -> Option<NaiveTime> {
        self.started.map(|s| s.at)
    }

    /// Total bytes to download.
    pub fn size_bytes(&self) -> Option<u64> {
        self.started.map(|s| s.size_bytes)
    }

    /// Time of day the download finished. Only set once finished.
    pub fn end_time(&self) -> Option<NaiveTime> {
        self.end_time
    }

    /// Source and proxy counts, if announced.
    pub fn discovered_sources(&self) -> Option<SourceCounts> {
        self.discovered_sources
    }

    /// Hosts of the content servers used, in the order they were added.
    pub fn added_sources(&self) -> &[String] {
        &self.added_sources
    }

    /// Failure message (the triggering log line, or a timeout notice).
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfOrderEvent`] when the current phase does not accept the
    /// event. The state is left unchanged in that case.
    pub fn apply(&mut self, event: Event) -> Result<Transition, OutOfOrderEvent> {
        let from = self.phase;
        let kind = event.kind();

        if from.is_terminal() {
            return Err(OutOfOrderEvent {
                phase: from,
                event: kind,
            });
        }

        match (from, event) {
            (_, Event::DownloadFailed { message }) => {
                self.failure = Some(message);
                Ok(self.move_to(Phase::Failed))
            }
            (Phase::AwaitingStart, Event::RemovalCompleted) => Ok(self.move_to(Phase::Removing)),
            (
                Phase::AwaitingStart | Phase::Removing,
                Event::DownloadStarted {
                    timestamp,
                    size_bytes,
                },
            ) => {
                self.started = Some(Started {
                    at: timestamp,
                    size_bytes,
                });
                Ok(self.move_to(Phase::Downloading))
            }
            (
                Phase::Downloading,
                Event::SourcesDiscovered {
                    source_count,
                    proxy_count,
                },
            ) => {
                self.discovered_sources = Some(SourceCounts {
                    sources: source_count,
                    proxies: proxy_count,
                });
                Ok(Transition::Enriched)
            }
            (Phase::Downloading, Event::SourceAdded { host }) => {
                self.added_sources.push(host);
                Ok(Transition::Enriched)
            }
            (Phase::Downloading, Event::DownloadFinished { timestamp }) => {
                self.end_time = Some(timestamp);
                Ok(self.move_to(Phase::Finished))
            }
            _ => Err(OutOfOrderEvent {
                phase: from,
                event: kind,
            }),
        }
    }

    /// Apply one event, logging and discarding it if it is out of order.
    pub fn record(&mut self, event: Event) -> Option<Transition> {
        match self.apply(event) {
            Ok(transition) => Some(transition),
            Err(e) => {
                warn!(phase = %e.phase, event = e.event, "out-of-order event ignored");
                None
            }
        }
    }

    /// Consume one event and return the resulting state.
    pub fn step(mut self, event: Event) -> Self {
        self.record(event);
        self
    }

    /// Force the session into [`Phase::Failed`]. No-op once terminal.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.failure = Some(message.into());
        self.phase = Phase::Failed;
    }

    fn move_to(&mut self, to: Phase) -> Transition {
        let from = self.phase;
        self.phase = to;
        Transition::Moved { from, to }
    }
}

/// Fold an event sequence into `state`, stopping at the first terminal phase.
///
/// Events after the terminal one are never consumed. This is the offline
/// form of [`Monitor::run`](crate::monitor::Monitor::run), which applies the
/// same [`SessionState::record`] step to each line as it arrives so it can
/// report progress and time out between events.
pub fn fold_events<I>(state: SessionState, events: I) -> SessionState
where
    I: IntoIterator<Item = Event>,
{
    let folded = events.into_iter().try_fold(state, |state, event| {
        let state = state.step(event);
        if state.is_terminal() {
            ControlFlow::Break(state)
        } else {
            ControlFlow::Continue(state)
        }
    });

    match folded {
        ControlFlow::Break(state) | ControlFlow::Continue(state) => state,
    }
}
