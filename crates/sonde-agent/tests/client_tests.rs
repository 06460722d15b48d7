use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::JoinHandle;
use std::time::Duration;

use sonde_agent::api::{AgentError, BlockList, StepRequest};
use sonde_agent::client::AgentClient;
use sonde_agent::retry::RetryPolicy;

/// Serve canned HTTP replies, one per connection, returning each
/// request line and body.
fn serve(replies: Vec<(u16, &'static str)>) -> (AgentClient, JoinHandle<Vec<(String, String)>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = std::thread::spawn(move || {
        let mut seen = Vec::new();
        for (status, body) in replies {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut content_length = 0usize;
            loop {
                let mut header = String::new();
                reader.read_line(&mut header).unwrap();
                let header = header.trim_end();
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = header.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();
            seen.push((
                request_line.trim_end().to_string(),
                String::from_utf8(request_body).unwrap(),
            ));

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
        }
        seen
    });
    (AgentClient::new(port, Duration::from_secs(5)), handle)
}

#[test]
fn test_step_request_round_trip() {
    let (client, server) = serve(vec![(200, r#"{"result":"<hierarchy rotation=\"0\"/>"}"#)]);
    let request = StepRequest {
        block: BlockList::default(),
        steps_count: 4,
    };
    let xml = client.post_for_result("/stepMonkey", &request).unwrap();
    assert_eq!(xml, r#"<hierarchy rotation="0"/>"#);

    let seen = server.join().unwrap();
    assert_eq!(seen[0].0, "POST /stepMonkey HTTP/1.1");
    let body: serde_json::Value = serde_json::from_str(&seen[0].1).unwrap();
    assert_eq!(body["steps_count"], 4);
}

#[test]
fn test_http_error_is_not_a_disconnect() {
    let (client, server) = serve(vec![(500, "boom")]);
    let err = client.get("/stopMonkey").unwrap_err();
    match &err {
        AgentError::Status { status, body, .. } => {
            assert_eq!(*status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!err.is_disconnect());
    server.join().unwrap();
}

#[test]
fn test_refused_connection_is_a_disconnect() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = AgentClient::new(port, Duration::from_secs(1));
    let err = client.get("/ping").unwrap_err();
    assert!(err.is_disconnect(), "{err:?}");
}

#[test]
fn test_retry_recovers_from_one_failure() {
    let (client, server) = serve(vec![(503, "busy"), (200, "pong")]);
    let policy = RetryPolicy::new(2, 0);
    let body = policy.run("ping", || client.get("/ping")).unwrap();
    assert_eq!(body, "pong");
    assert_eq!(server.join().unwrap().len(), 2);
}
