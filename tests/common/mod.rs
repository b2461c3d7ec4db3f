//! Shared helpers for driving a real listener.

use bonfire::Bonfire;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

pub struct Running<B> {
    pub app: Arc<Bonfire<B>>,
    pub addr: SocketAddr,
    pub server: JoinHandle<bonfire::Result<()>>,
}

/// Fires `app` on a free loopback port and waits until it accepts connections.
pub async fn start<B: Send + Sync + 'static>(app: Bonfire<B>) -> Running<B> {
    let app = Arc::new(app);
    let server = tokio::spawn({
        let app = Arc::clone(&app);
        async move { app.fire("127.0.0.1:0").await }
    });
    let addr = tokio::time::timeout(Duration::from_secs(5), app.listening())
        .await
        .expect("server did not start in time")
        .expect("server failed to start");
    Running { app, addr, server }
}

#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Sends one `Connection: close` request and reads the whole reply.
pub async fn send(addr: SocketAddr, method: &str, path: &str) -> Reply {
    send_raw(
        addr,
        &format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"),
    )
    .await
}

pub async fn send_raw(addr: SocketAddr, raw: &str) -> Reply {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    parse_reply(&String::from_utf8_lossy(&buf))
}

pub fn parse_reply(raw: &str) -> Reply {
    let (head, body) = raw.split_once("\r\n\r\n").expect("incomplete response");
    let mut lines = head.lines();
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .expect("missing status line");
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
        .collect();
    Reply {
        status,
        headers,
        body: body.to_string(),
    }
}

/// Polls `check` until it holds or `within` runs out.
#[allow(dead_code)]
pub async fn eventually<F: Fn() -> bool>(within: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
