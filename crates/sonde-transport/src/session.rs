//! Background shell sessions.
//!
//! A [`ShellSession`] owns a worker thread that decodes a shell stream
//! and copies output into caller-supplied sinks. The worker never
//! propagates errors: a broken stream ends the session with
//! [`FAILURE_EXIT_CODE`].

use std::io::{BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::frame::{Frame, FrameError, FrameReader};
use crate::line::{LineEvent, LineReader};

/// Exit code while the worker is still running.
pub const PENDING_EXIT_CODE: i32 = 255;
/// Exit code recorded when the stream fails mid-session.
pub const FAILURE_EXIT_CODE: i32 = -1;

pub type Sink = Box<dyn Write + Send>;

/// Wire variant used by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellProtocol {
    Line,
    Framed,
}

#[derive(Debug, thiserror::Error)]
enum StreamError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct SessionState {
    exit_code: AtomicI32,
    finished: AtomicBool,
}

impl SessionState {
    fn finish(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
        self.finished.store(true, Ordering::SeqCst);
    }
}

pub struct ShellSession {
    protocol: ShellProtocol,
    state: Arc<SessionState>,
    worker: Option<JoinHandle<()>>,
}

impl ShellSession {
    /// Start the worker over an already-negotiated stream.
    pub fn spawn<S>(stream: S, protocol: ShellProtocol, stdout: Sink, stderr: Sink) -> Self
    where
        S: Read + Send + 'static,
    {
        let state = Arc::new(SessionState {
            exit_code: AtomicI32::new(PENDING_EXIT_CODE),
            finished: AtomicBool::new(false),
        });
        let worker_state = Arc::clone(&state);
        let spawned = std::thread::Builder::new()
            .name("shell-session".into())
            .spawn(move || {
                let outcome = match protocol {
                    ShellProtocol::Framed => pump_framed(stream, stdout, stderr),
                    ShellProtocol::Line => pump_lines(stream, stdout),
                };
                let code = outcome.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "shell stream failed");
                    FAILURE_EXIT_CODE
                });
                worker_state.finish(code);
            });
        let worker = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "could not start shell worker");
                state.finish(FAILURE_EXIT_CODE);
                None
            }
        };

        Self {
            protocol,
            state,
            worker,
        }
    }

    pub fn protocol(&self) -> ShellProtocol {
        self.protocol
    }

    pub fn is_running(&self) -> bool {
        !self.state.finished.load(Ordering::SeqCst)
    }

    /// Exit code if the worker has finished, without blocking.
    pub fn poll(&self) -> Option<i32> {
        if self.is_running() {
            None
        } else {
            Some(self.state.exit_code.load(Ordering::SeqCst))
        }
    }

    /// Block until the worker finishes and return its exit code.
    pub fn wait(&mut self) -> i32 {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("shell worker panicked");
                self.state.finish(FAILURE_EXIT_CODE);
            }
        }
        self.state.exit_code.load(Ordering::SeqCst)
    }
}

fn pump_framed<S: Read>(stream: S, mut stdout: Sink, mut stderr: Sink) -> Result<i32, StreamError> {
    let mut reader = FrameReader::new(stream);
    while let Some(frame) = reader.next_frame()? {
        match frame {
            Frame::Stdout(data) => {
                stdout.write_all(&data)?;
                stdout.flush()?;
            }
            Frame::Stderr(data) => {
                stderr.write_all(&data)?;
                stderr.flush()?;
            }
            Frame::Exit(code) => return Ok(i32::from(code)),
        }
    }
    Err(FrameError::MissingExit.into())
}

fn pump_lines<S: Read>(stream: S, mut stdout: Sink) -> Result<i32, StreamError> {
    let mut reader = LineReader::new(BufReader::new(stream));
    while let Some(event) = reader.next_event()? {
        match event {
            LineEvent::Output(bytes) => {
                stdout.write_all(&bytes)?;
                stdout.flush()?;
            }
            LineEvent::Exit(code) => return Ok(code),
        }
    }
    Ok(crate::line::FALLBACK_EXIT_CODE)
}
