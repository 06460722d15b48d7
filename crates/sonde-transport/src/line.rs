//! Line-oriented shell protocol for devices without framed shell support.
//!
//! The remote command is suffixed with an `echo` of a sentinel and `$?`.
//! Output is read line by line until the sentinel shows up; stderr is
//! merged into stdout by the remote shell. Output lines are passed on as
//! raw bytes; only the sentinel suffix is decoded.

use std::io::{self, BufRead};

pub const EXIT_SENTINEL: &str = "X4EXIT:";

/// Exit code reported when the sentinel suffix cannot be parsed.
pub const FALLBACK_EXIT_CODE: i32 = 0;

/// Append the exit-status echo to `command`.
pub fn wrap_command(command: &str) -> String {
    format!("{command}; echo {EXIT_SENTINEL}$?")
}

/// Best-effort parse of the text after the sentinel.
pub fn parse_exit_code(suffix: &str) -> i32 {
    suffix.trim().parse().unwrap_or(FALLBACK_EXIT_CODE)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Output(Vec<u8>),
    Exit(i32),
}

/// Splits a line-variant stream into output lines and the final status.
pub struct LineReader<R> {
    inner: R,
    finished: bool,
    pending_exit: Option<i32>,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            finished: false,
            pending_exit: None,
        }
    }

    /// Next event, `Ok(None)` after the exit event.
    ///
    /// Text on the sentinel line ahead of the sentinel is emitted as
    /// output first, since `echo` may land on the same line as a
    /// command's unterminated last line.
    pub fn next_event(&mut self) -> io::Result<Option<LineEvent>> {
        if let Some(code) = self.pending_exit.take() {
            self.finished = true;
            return Ok(Some(LineEvent::Exit(code)));
        }
        if self.finished {
            return Ok(None);
        }

        let mut line = Vec::new();
        if self.inner.read_until(b'\n', &mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "shell stream closed before the exit sentinel",
            ));
        }

        match rfind_sentinel(&line) {
            None => Ok(Some(LineEvent::Output(line))),
            Some(at) => {
                let suffix = String::from_utf8_lossy(&line[at + EXIT_SENTINEL.len()..]);
                let code = parse_exit_code(&suffix);
                if at > 0 {
                    self.pending_exit = Some(code);
                    line.truncate(at);
                    Ok(Some(LineEvent::Output(line)))
                } else {
                    self.finished = true;
                    Ok(Some(LineEvent::Exit(code)))
                }
            }
        }
    }
}

fn rfind_sentinel(line: &[u8]) -> Option<usize> {
    let needle = EXIT_SENTINEL.as_bytes();
    line.windows(needle.len()).rposition(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn drain(input: &str) -> Vec<LineEvent> {
        let mut reader = LineReader::new(Cursor::new(input.as_bytes().to_vec()));
        let mut out = Vec::new();
        while let Some(ev) = reader.next_event().unwrap() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn test_wrap_command() {
        assert_eq!(wrap_command("ls /sdcard"), "ls /sdcard; echo X4EXIT:$?");
    }

    #[test]
    fn test_output_then_exit() {
        let events = drain("hello\nworld\nX4EXIT:3\n");
        assert_eq!(
            events,
            vec![
                LineEvent::Output("hello\n".into()),
                LineEvent::Output("world\n".into()),
                LineEvent::Exit(3),
            ]
        );
    }

    #[test]
    fn test_sentinel_sharing_a_line() {
        let events = drain("partialX4EXIT:0\ntrailing\n");
        assert_eq!(
            events,
            vec![LineEvent::Output("partial".into()), LineEvent::Exit(0)]
        );
    }

    #[test]
    fn test_unparseable_code_falls_back() {
        assert_eq!(drain("X4EXIT:??\n"), vec![LineEvent::Exit(FALLBACK_EXIT_CODE)]);
    }

    #[test]
    fn test_non_utf8_output_is_forwarded_raw() {
        let mut reader = LineReader::new(Cursor::new(b"\xff\xfe\nX4EXIT:0\n".to_vec()));
        assert_eq!(
            reader.next_event().unwrap(),
            Some(LineEvent::Output(vec![0xff, 0xfe, b'\n']))
        );
        assert_eq!(reader.next_event().unwrap(), Some(LineEvent::Exit(0)));
        assert_eq!(reader.next_event().unwrap(), None);
    }

    #[test]
    fn test_eof_before_sentinel_is_error() {
        let mut reader = LineReader::new(Cursor::new(b"only output\n".to_vec()));
        assert!(reader.next_event().unwrap().is_some());
        assert!(reader.next_event().is_err());
    }
}
