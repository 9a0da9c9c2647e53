//! Content log line classification.
//!
//! Steam's `content_log.txt` is free-form text. A download session is
//! recognised from a handful of known line shapes; everything else is noise.
//! Classification is a pure, stateless function of one line, driven by an
//! ordered rule table where the first matching predicate wins.

use std::sync::LazyLock;

use chrono::NaiveTime;
use regex::Regex;
use tracing::{debug, warn};

/// Status phrases that mark the previous installation as fully removed.
///
/// A line matches when it contains any one of these.
pub const REMOVAL_PHRASES: [&str; 4] = [
    "Update Required",
    "Fully Installed",
    "Files Missing",
    "Uninstalling",
];

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| compile(r"(\d{1,2}:\d{2}:\d{2})"));
static TRAILING_BYTES: LazyLock<Regex> = LazyLock::new(|| compile(r"(?:^|[^\d:])(\d+)\s*$"));
static SOURCE_COUNTS: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(\d+) download sources and (\d+) caching proxies"));
static SOURCE_HOST: LazyLock<Regex> = LazyLock::new(|| compile(r"host ([^(]+)"));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("classifier patterns are valid")
}

/// A typed event recognised in the content log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The previous installation was removed.
    RemovalCompleted,
    /// The download began.
    DownloadStarted {
        /// Time of day the download started.
        timestamp: NaiveTime,
        /// Total bytes to download.
        size_bytes: u64,
    },
    /// Steam announced how many content servers it will use.
    SourcesDiscovered {
        /// Number of download sources.
        source_count: u32,
        /// Number of caching proxies.
        proxy_count: u32,
    },
    /// A download interface was created for a content server.
    SourceAdded {
        /// Host name of the content server.
        host: String,
    },
    /// The download finished and Steam began committing files.
    DownloadFinished {
        /// Time of day the download finished.
        timestamp: NaiveTime,
    },
    /// Steam reported a failure.
    DownloadFailed {
        /// The full log line that reported the failure.
        message: String,
    },
}

impl Event {
    /// Short name of the event variant, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RemovalCompleted => "removal_completed",
            Self::DownloadStarted { .. } => "download_started",
            Self::SourcesDiscovered { .. } => "sources_discovered",
            Self::SourceAdded { .. } => "source_added",
            Self::DownloadFinished { .. } => "download_finished",
            Self::DownloadFailed { .. } => "download_failed",
        }
    }
}

/// A rule recognised a line but could not extract the values it needs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line matched rule '{rule}' but {missing} could not be extracted: {line}")]
pub struct ClassificationGap {
    /// Name of the rule whose predicate matched.
    pub rule: &'static str,
    /// Which capture was missing.
    pub missing: &'static str,
    /// The raw line.
    pub line: String,
}

type Extraction = Result<Event, &'static str>;

/// One entry of the classification table.
struct Rule {
    name: &'static str,
    matches: fn(&str) -> bool,
    extract: fn(&str) -> Extraction,
}

/// Recognition rules in priority order.
static RULES: [Rule; 6] = [
    Rule {
        name: "removal",
        matches: is_removal,
        extract: |_| Ok(Event::RemovalCompleted),
    },
    Rule {
        name: "update_started",
        matches: |line| line.contains("update started"),
        extract: extract_started,
    },
    Rule {
        name: "download_sources",
        matches: |line| line.contains("download sources"),
        extract: extract_sources,
    },
    Rule {
        name: "download_interface",
        matches: |line| line.contains("Created download interface"),
        extract: extract_host,
    },
    Rule {
        name: "update_committing",
        matches: |line| {
            line.contains("update changed") && line.contains("Running") && line.contains("Committing")
        },
        extract: extract_finished,
    },
    Rule {
        name: "failed",
        matches: |line| line.contains("Failed"),
        extract: |line| {
            Ok(Event::DownloadFailed {
                message: line.to_owned(),
            })
        },
    },
];

/// Classify a line, reporting extraction failures to the caller.
///
/// Returns `Ok(None)` when no rule matches. Only the first rule whose
/// predicate matches is consulted; a failed extraction does not fall through
/// to later rules.
///
/// # Errors
///
/// Returns [`ClassificationGap`] when a rule matched but its captures were
/// missing or malformed.
pub fn try_classify(line: &str) -> Result<Option<Event>, ClassificationGap> {
    let Some(rule) = RULES.iter().find(|rule| (rule.matches)(line)) else {
        return Ok(None);
    };

    (rule.extract)(line)
        .map(Some)
        .map_err(|missing| ClassificationGap {
            rule: rule.name,
            missing,
            line: line.to_owned(),
        })
}

/// Classify a line into an event. Total: never fails.
///
/// Gaps are logged at `warn` and treated as no event. Unrecognised lines are
/// surfaced verbatim at `debug`.
pub fn classify(line: &str) -> Option<Event> {
    match try_classify(line) {
        Ok(Some(event)) => Some(event),
        Ok(None) => {
            debug!(line, "unclassified log line");
            None
        }
        Err(gap) => {
            warn!(rule = gap.rule, missing = gap.missing, line = %gap.line, "classification gap");
            None
        }
    }
}

fn is_removal(line: &str) -> bool {
    REMOVAL_PHRASES.iter().any(|phrase| line.contains(phrase))
}

fn extract_started(line: &str) -> Extraction {
    let timestamp = timestamp_in(line)?;
    let size_bytes = TRAILING_BYTES
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .ok_or("byte count")?;

    Ok(Event::DownloadStarted {
        timestamp,
        size_bytes,
    })
}

fn extract_sources(line: &str) -> Extraction {
    let caps = SOURCE_COUNTS
        .captures(line)
        .ok_or("source and proxy counts")?;
    let source_count = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or("source count")?;
    let proxy_count = caps
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or("proxy count")?;

    Ok(Event::SourcesDiscovered {
        source_count,
        proxy_count,
    })
}

fn extract_host(line: &str) -> Extraction {
    let host = SOURCE_HOST
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|host| !host.is_empty())
        .ok_or("host")?;

    Ok(Event::SourceAdded {
        host: host.to_owned(),
    })
}

fn extract_finished(line: &str) -> Extraction {
    Ok(Event::DownloadFinished {
        timestamp: timestamp_in(line)?,
    })
}

/// First `H:MM:SS` time of day in the line.
fn timestamp_in(line: &str) -> Result<NaiveTime, &'static str> {
    TIMESTAMP
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| NaiveTime::parse_from_str(m.as_str(), "%H:%M:%S").ok())
        .ok_or("timestamp")
}
