//! Tailing a growing log file.
//!
//! The tailer opens the file positioned at its current end and yields only
//! complete lines appended after that point. Reads are synchronous `std::fs`
//! calls since they are quick local operations; the wait between polls is an
//! async sleep so the surrounding task stays cancellable.

use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default wait between polls when no new line is available.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const MAX_LINE_LEN: usize = 1_048_576; // 1 MB safety limit.

/// Result of waiting for the next line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    /// A complete line, without its terminator.
    Line(String),
    /// No complete line arrived within the timeout.
    Timeout,
}

/// Follows a file for newly appended lines.
///
/// Owns the read handle; dropping the tailer closes it.
pub struct LogTailer {
    path: PathBuf,
    reader: BufReader<File>,
    identity: Option<(u64, u64)>,
    position: u64,
    /// Offset where the line currently being read begins.
    anchor: u64,
    /// Whether the byte before `anchor` was something other than a newline.
    anchor_mid_line: bool,
    pending: Vec<u8>,
    discard_partial: bool,
}

impl LogTailer {
    /// Open `path` positioned at its current end. Existing content is never
    /// returned.
    ///
    /// If the file currently ends mid-line, the rest of that line is skipped
    /// once it completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut file = File::open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;

        let position = file
            .seek(SeekFrom::End(0))
            .with_context(|| format!("failed to seek in log file {}", path.display()))?;

        let discard_partial = ends_mid_line(&mut file, position)
            .with_context(|| format!("failed to inspect log file {}", path.display()))?;
        let identity = file
            .metadata()
            .map(|metadata| file_identity(&metadata))
            .with_context(|| format!("failed to stat log file {}", path.display()))?;

        debug!(path = %path.display(), offset = position, "tailing log file");

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            identity,
            position,
            anchor: position,
            anchor_mid_line: discard_partial,
            pending: Vec::new(),
            discard_partial,
        })
    }

    /// Path of the file being followed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset up to which the file has been consumed.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Wait for the next complete line.
    ///
    /// Polls every `poll_interval` while nothing new is available. With a
    /// `timeout`, returns [`TailEvent::Timeout`] once that much time passes
    /// without a complete line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or reopened.
    pub async fn next_line(
        &mut self,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> anyhow::Result<TailEvent> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        loop {
            if let Some(line) = self.read_line()? {
                return Ok(TailEvent::Line(line));
            }

            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(TailEvent::Timeout);
                    }
                    remaining.min(poll_interval)
                }
                None => poll_interval,
            };

            tokio::time::sleep(wait).await;
        }
    }

    /// Read one complete line if one is available, without blocking.
    ///
    /// A line longer than 1 MB is skipped without being buffered in full.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or reopened.
    pub fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        self.follow_rewrite()?;

        loop {
            let budget = as_u64(MAX_LINE_LEN.saturating_sub(self.pending.len())).saturating_add(1);
            let bytes_read = (&mut self.reader)
                .take(budget)
                .read_until(b'\n', &mut self.pending)
                .with_context(|| format!("failed to read line from {}", self.path.display()))?;
            if bytes_read == 0 {
                return Ok(None);
            }
            self.position = self.position.saturating_add(as_u64(bytes_read));

            if !self.pending.ends_with(b"\n") {
                // Still being written; keep the fragment for the next read.
                if self.pending.len() <= MAX_LINE_LEN {
                    return Ok(None);
                }
                if !self.discard_partial {
                    warn!(path = %self.path.display(), offset = self.anchor, "skipping oversized log line");
                }
                self.pending.clear();
                self.discard_partial = true;
                continue;
            }

            let raw = std::mem::take(&mut self.pending);
            self.anchor = self.position;
            self.anchor_mid_line = false;

            if std::mem::take(&mut self.discard_partial) {
                continue;
            }

            let line = String::from_utf8_lossy(&raw);
            return Ok(Some(line.trim_end_matches(['\n', '\r']).to_owned()));
        }
    }

    /// Restart from the beginning if the file at `path` is no longer the
    /// content we were reading.
    ///
    /// That is the case when another file took its place, when it shrank
    /// below our offset, or when the byte before the current line start
    /// changed because the file was rewritten and grew past our offset.
    fn follow_rewrite(&mut self) -> anyhow::Result<()> {
        let mut current = match File::open(&self.path) {
            Ok(file) => file,
            // Mid-rotation; keep reading the handle we have.
            Err(_) => return Ok(()),
        };
        let metadata = current
            .metadata()
            .with_context(|| format!("failed to stat log file {}", self.path.display()))?;
        let identity = file_identity(&metadata);

        let reason = if identity != self.identity {
            "replaced"
        } else if metadata.len() < self.position {
            "truncated"
        } else if ends_mid_line(&mut current, self.anchor)
            .with_context(|| format!("failed to inspect log file {}", self.path.display()))?
            != self.anchor_mid_line
        {
            "rewritten"
        } else {
            return Ok(());
        };

        warn!(
            path = %self.path.display(),
            offset = self.position,
            len = metadata.len(),
            reason,
            "log file changed underneath us, following new content"
        );

        current
            .seek(SeekFrom::Start(0))
            .with_context(|| format!("failed to seek in log file {}", self.path.display()))?;
        self.reader = BufReader::new(current);
        self.identity = identity;
        self.position = 0;
        self.anchor = 0;
        self.anchor_mid_line = false;
        self.pending.clear();
        self.discard_partial = false;
        Ok(())
    }
}

/// Device and inode of a file, where the platform has them.
#[cfg(unix)]
fn file_identity(metadata: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn file_identity(_metadata: &Metadata) -> Option<(u64, u64)> {
    None
}

/// Whether the last byte before `len` is something other than a newline.
fn ends_mid_line(file: &mut File, len: u64) -> std::io::Result<bool> {
    let Some(last) = len.checked_sub(1) else {
        return Ok(false);
    };

    file.seek(SeekFrom::Start(last))?;
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte)?;
    Ok(byte[0] != b'\n')
}

fn as_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn unterminated_line_buffer_stays_bounded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("content_log.txt");
        std::fs::write(&path, "").expect("create");

        let mut tailer = LogTailer::open(&path).expect("open");
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open append");
        for _ in 0..3 {
            f.write_all(&vec![b'x'; MAX_LINE_LEN]).expect("append");
            assert_eq!(tailer.read_line().expect("read"), None);
            assert!(tailer.pending.len() <= MAX_LINE_LEN);
        }

        f.write_all(b"tail of the long line\nnext\n").expect("append");
        assert_eq!(tailer.read_line().expect("read").as_deref(), Some("next"));
        assert!(tailer.pending.is_empty());
    }
}
