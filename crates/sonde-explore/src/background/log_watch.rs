//! Agent log watcher.
//!
//! Tails the agent's log file on a fixed interval. A fatal marker is
//! forwarded to the exploration loop as soon as it is read; the final
//! statistics block is logged once.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, select, unbounded, Receiver, Sender};
use regex::Regex;

use super::{await_done, LogMonitor};

pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
const FINAL_READ_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fatal error while running the agent:\n{body}\nSee {} for details.", .log_file.display())]
pub struct FatalLog {
    pub body: String,
    pub log_file: PathBuf,
}

/// Markers found in a chunk of log text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogScan {
    pub fatal: Option<String>,
    pub statistics: Option<String>,
}

fn fatal_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[Fastbot\].+Internal\serror\n([\s\S]*)").expect("valid regex"))
}

fn statistics_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r".+Monkey\sis\sover!\n([\s\S]+)").expect("valid regex"))
}

/// Markers with an empty body are ignored.
pub fn scan_log(content: &str) -> LogScan {
    let body = |re: &Regex| {
        re.captures(content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|b| !b.is_empty())
    };
    LogScan {
        fatal: body(fatal_pattern()),
        statistics: body(statistics_pattern()),
    }
}

// ── Watcher ──────────────────────────────────────────────────────────

pub struct LogWatcher {
    log_file: PathBuf,
    poll_interval: Duration,
    fatal_rx: Receiver<FatalLog>,
    stop_tx: Option<Sender<()>>,
    /// Carries whether the statistics block was seen.
    done_rx: Receiver<bool>,
    handle: Option<JoinHandle<()>>,
    fatal_reported: bool,
    closed: bool,
}

impl LogWatcher {
    pub fn spawn(log_file: impl Into<PathBuf>) -> Self {
        Self::with_poll_interval(log_file, POLL_INTERVAL)
    }

    pub fn with_poll_interval(log_file: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        let log_file = log_file.into();
        tracing::info!(log = %log_file.display(), "watching agent log");
        let (fatal_tx, fatal_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded(1);

        let mut tail = Tail {
            log_file: log_file.clone(),
            file: None,
            statistics_seen: false,
        };
        let handle = std::thread::Builder::new()
            .name("log-watch".into())
            .spawn(move || {
                tail.run(poll_interval, &stop_rx, &fatal_tx);
                let _ = done_tx.send(tail.statistics_seen);
            });
        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::error!(error = %e, "could not start log watcher, scanning only on close");
                None
            }
        };

        Self {
            log_file,
            poll_interval,
            fatal_rx,
            stop_tx: Some(stop_tx),
            done_rx,
            handle,
            fatal_reported: false,
            closed: false,
        }
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    fn parse_whole_log(&self) -> Result<(), FatalLog> {
        tracing::warn!("log watcher closed without reading the statistics, parsing the whole log");
        let content = match std::fs::read(&self.log_file) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::error!(error = %e, log = %self.log_file.display(), "could not read agent log");
                return Ok(());
            }
        };
        let scan = scan_log(&content);
        if let Some(body) = scan.fatal {
            return Err(FatalLog {
                body,
                log_file: self.log_file.clone(),
            });
        }
        if let Some(stats) = scan.statistics {
            tracing::info!("agent exit:\n{stats}");
        }
        Ok(())
    }
}

impl LogMonitor for LogWatcher {
    fn poll_fatal(&mut self) -> Option<FatalLog> {
        let fatal = self.fatal_rx.try_recv().ok();
        self.fatal_reported |= fatal.is_some();
        fatal
    }

    fn close(&mut self) -> Result<(), FatalLog> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        tracing::info!("closing log watcher");

        drop(self.stop_tx.take());
        let mut statistics_seen = false;
        if let Some(handle) = self.handle.take() {
            let wait = self.poll_interval + FINAL_READ_DELAY + Duration::from_secs(5);
            if let Some(seen) = await_done(&self.done_rx, wait, "log-watch") {
                statistics_seen = seen;
                let _ = handle.join();
            }
        }
        if let Ok(fatal) = self.fatal_rx.try_recv() {
            return Err(fatal);
        }
        // A fatal marker already handed out is not reported twice.
        if statistics_seen || self.fatal_reported {
            Ok(())
        } else {
            self.parse_whole_log()
        }
    }
}

impl Drop for LogWatcher {
    fn drop(&mut self) {
        drop(self.stop_tx.take());
    }
}

/// Worker state: an open handle positioned after the last read byte.
struct Tail {
    log_file: PathBuf,
    file: Option<File>,
    statistics_seen: bool,
}

impl Tail {
    fn run(&mut self, interval: Duration, stop_rx: &Receiver<()>, fatal_tx: &Sender<FatalLog>) {
        loop {
            if self.read_new(fatal_tx) {
                return;
            }
            select! {
                recv(stop_rx) -> _ => break,
                default(interval) => {}
            }
        }
        std::thread::sleep(FINAL_READ_DELAY);
        self.read_new(fatal_tx);
    }

    /// Scan bytes appended since the previous read. Returns `true` once a
    /// fatal marker was reported.
    fn read_new(&mut self, fatal_tx: &Sender<FatalLog>) -> bool {
        if self.file.is_none() {
            match File::open(&self.log_file) {
                Ok(f) => self.file = Some(f),
                Err(e) => {
                    tracing::debug!(error = %e, "agent log not readable yet");
                    return false;
                }
            }
        }
        let Some(file) = self.file.as_mut() else {
            return false;
        };
        let mut buf = Vec::new();
        if let Err(e) = file.read_to_end(&mut buf) {
            tracing::warn!(error = %e, "reading agent log failed");
            return false;
        }
        if buf.is_empty() {
            return false;
        }

        let scan = scan_log(&String::from_utf8_lossy(&buf));
        if let Some(body) = scan.fatal {
            tracing::error!("fatal error reported by the agent");
            let _ = fatal_tx.send(FatalLog {
                body,
                log_file: self.log_file.clone(),
            });
            return true;
        }
        if let Some(stats) = scan.statistics {
            if !self.statistics_seen {
                self.statistics_seen = true;
                tracing::info!("agent exit:\n{stats}");
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_marker_needs_a_body() {
        let scan = scan_log("I/[Fastbot] 123 Internal error\n   \n");
        assert_eq!(scan.fatal, None);

        let scan = scan_log("x\nE/[Fastbot] native Internal error\njava.lang.NullPointerException\n\tat Foo\n");
        assert_eq!(scan.fatal.as_deref(), Some("java.lang.NullPointerException\n\tat Foo"));
    }

    #[test]
    fn test_statistics_marker() {
        let scan = scan_log("I/Fastbot: // Monkey is over!\nTotal steps: 20\nActivities: 3\n");
        assert_eq!(scan.statistics.as_deref(), Some("Total steps: 20\nActivities: 3"));
        assert_eq!(scan.fatal, None);
    }

    #[test]
    fn test_plain_log_has_no_markers() {
        assert_eq!(scan_log("step 1\nstep 2\n"), LogScan::default());
    }
}
