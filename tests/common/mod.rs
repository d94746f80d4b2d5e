//! Test helpers shared by the integration suites.

#![allow(dead_code)]

use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use workflow_client::{Client, Config};

/// Spawn a one-shot HTTP server that answers with a chunked `text/event-stream`
/// body. Each step waits its delay and then writes its bytes as one HTTP chunk,
/// exactly as given, so frames can be split anywhere (including inside a
/// multi-byte character).
pub async fn start_chunked_sse_server<B>(
    steps: Vec<(Duration, B)>,
    finish_after: Option<Duration>,
) -> String
where
    B: Into<Vec<u8>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        let (mut socket, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => return,
        };

        if !drain_request(&mut socket).await {
            return;
        }

        let headers = concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: text/event-stream\r\n",
            "Transfer-Encoding: chunked\r\n",
            "\r\n"
        );
        if socket.write_all(headers.as_bytes()).await.is_err() {
            return;
        }

        for (delay, payload) in steps {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let payload: Vec<u8> = payload.into();
            let mut chunk = format!("{:X}\r\n", payload.len()).into_bytes();
            chunk.extend_from_slice(&payload);
            chunk.extend_from_slice(b"\r\n");
            if socket.write_all(&chunk).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
        }

        if let Some(delay) = finish_after {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let _ = socket.write_all(b"0\r\n\r\n").await;
    });

    format!("http://{}", addr)
}

/// Read one request: headers up to the blank line, then the declared body.
/// Returns `false` when the peer went away first.
async fn drain_request(socket: &mut TcpStream) -> bool {
    let mut buf = [0u8; 4096];
    let mut received = Vec::new();
    let header_end = loop {
        let n = match socket.read(&mut buf).await {
            Ok(n) => n,
            Err(_) => return false,
        };
        if n == 0 {
            return false;
        }
        received.extend_from_slice(&buf[..n]);
        if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let content_length = String::from_utf8_lossy(&received[..header_end])
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while received.len() - header_end < content_length {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
    true
}

/// Spawn a one-shot HTTP server that answers `status` with a JSON body whose
/// `Content-Length` promises more bytes than it sends, then closes the socket.
pub async fn start_truncated_response_server(
    status: &'static str,
    partial_body: &'static str,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        let (mut socket, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => return,
        };
        if !drain_request(&mut socket).await {
            return;
        }
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{partial_body}",
            partial_body.len() + 64
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.flush().await;
        let _ = socket.shutdown().await;
    });

    format!("http://{}", addr)
}

/// Client pointed at `base_url` with test credentials.
pub fn client_for(base_url: String) -> Client {
    Client::new(Config {
        base_url: Some(base_url),
        access_token: Some("pat_test".into()),
        workflow_id: Some("wf_123".into()),
        app_id: Some("app_9".into()),
        ..Default::default()
    })
    .expect("client creation should succeed")
}
