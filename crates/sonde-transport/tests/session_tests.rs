use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};

use sonde_transport::frame::{encode_frame, Frame, KIND_STDOUT};
use sonde_transport::session::{ShellProtocol, ShellSession, FAILURE_EXIT_CODE};

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A stream that fails after yielding its prefix.
struct Broken(Cursor<Vec<u8>>);

impl Read for Broken {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.read(buf)? {
            0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            n => Ok(n),
        }
    }
}

#[test]
fn test_framed_session_routes_streams() {
    let mut bytes = Frame::Stdout(b"out-1 ".to_vec()).encode();
    bytes.extend(Frame::Stderr(b"err".to_vec()).encode());
    bytes.extend(Frame::Stdout(b"out-2".to_vec()).encode());
    bytes.extend(Frame::Exit(4).encode());

    let (out, err) = (SharedBuf::default(), SharedBuf::default());
    let mut session = ShellSession::spawn(
        Cursor::new(bytes),
        ShellProtocol::Framed,
        Box::new(out.clone()),
        Box::new(err.clone()),
    );

    assert_eq!(session.wait(), 4);
    assert!(!session.is_running());
    assert_eq!(session.poll(), Some(4));
    assert_eq!(out.text(), "out-1 out-2");
    assert_eq!(err.text(), "err");
}

#[test]
fn test_line_session_reports_parsed_code() {
    let input = "line one\nline two\nX4EXIT:0\n";
    let out = SharedBuf::default();
    let mut session = ShellSession::spawn(
        Cursor::new(input.as_bytes().to_vec()),
        ShellProtocol::Line,
        Box::new(out.clone()),
        Box::new(io::sink()),
    );
    assert_eq!(session.wait(), 0);
    assert_eq!(out.text(), "line one\nline two\n");
}

#[test]
fn test_stream_failure_sets_failure_code() {
    let bytes = encode_frame(KIND_STDOUT, b"partial");
    let out = SharedBuf::default();
    let mut session = ShellSession::spawn(
        Broken(Cursor::new(bytes)),
        ShellProtocol::Framed,
        Box::new(out.clone()),
        Box::new(io::sink()),
    );
    assert_eq!(session.wait(), FAILURE_EXIT_CODE);
    assert_eq!(out.text(), "partial");
}

#[test]
fn test_premature_eof_is_failure_for_both_variants() {
    for protocol in [ShellProtocol::Framed, ShellProtocol::Line] {
        let mut session = ShellSession::spawn(
            Cursor::new(Vec::new()),
            protocol,
            Box::new(io::sink()),
            Box::new(io::sink()),
        );
        assert_eq!(session.wait(), FAILURE_EXIT_CODE, "{protocol:?}");
    }
}

#[test]
fn test_line_session_forwards_non_utf8_output() {
    let out = SharedBuf::default();
    let mut session = ShellSession::spawn(
        Cursor::new(b"\xff\xfe\nX4EXIT:0\n".to_vec()),
        ShellProtocol::Line,
        Box::new(out.clone()),
        Box::new(io::sink()),
    );
    assert_eq!(session.wait(), 0);
    assert_eq!(*out.0.lock().unwrap(), vec![0xff, 0xfe, b'\n']);
}

/// Records the name of the thread that writes into it.
#[derive(Clone, Default)]
struct ThreadNames(Arc<Mutex<Vec<String>>>);

impl Write for ThreadNames {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let name = std::thread::current().name().unwrap_or_default().to_string();
        self.0.lock().unwrap().push(name);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_worker_thread_is_named() {
    let names = ThreadNames::default();
    let mut bytes = Frame::Stdout(b"x".to_vec()).encode();
    bytes.extend(Frame::Exit(0).encode());
    let mut session = ShellSession::spawn(
        Cursor::new(bytes),
        ShellProtocol::Framed,
        Box::new(names.clone()),
        Box::new(io::sink()),
    );
    assert_eq!(session.wait(), 0);
    assert_eq!(*names.0.lock().unwrap(), vec!["shell-session".to_string()]);
}
