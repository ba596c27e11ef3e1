//! Minimal HTTP/1.1 file server for driving transfers in tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub body: Vec<u8>,
    pub accept_ranges: bool,
    pub content_length: bool,
    /// Answer every ranged request with a 500.
    pub fail_ranges: bool,
    /// Answer ranged requests with a 200 and the full body.
    pub ignore_ranges: bool,
}

impl ServerOptions {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            accept_ranges: true,
            content_length: true,
            fail_ranges: false,
            ignore_ranges: false,
        }
    }
}

struct Shared {
    options: ServerOptions,
    /// Responses whose first byte is at or past this offset send half their
    /// payload and then hang.
    stall_from: AtomicU64,
    requests: AtomicUsize,
    ranged_requests: AtomicUsize,
}

pub struct TestServer {
    pub addr: SocketAddr,
    shared: Arc<Shared>,
}

impl TestServer {
    pub async fn start(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared {
            options,
            stall_from: AtomicU64::new(u64::MAX),
            requests: AtomicUsize::new(0),
            ranged_requests: AtomicUsize::new(0),
        });

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                let Ok((sock, _)) = listener.accept().await else {
                    break;
                };
                let shared = accept_shared.clone();
                tokio::spawn(async move {
                    let _ = handle(sock, shared).await;
                });
            }
        });

        Self { addr, shared }
    }

    pub fn url(&self, name: &str) -> String {
        format!("http://{}/files/{}", self.addr, name)
    }

    pub fn stall_from(&self, offset: u64) {
        self.shared.stall_from.store(offset, Ordering::SeqCst);
    }

    pub fn stop_stalling(&self) {
        self.stall_from(u64::MAX);
    }

    pub fn requests(&self) -> usize {
        self.shared.requests.load(Ordering::SeqCst)
    }

    pub fn ranged_requests(&self) -> usize {
        self.shared.ranged_requests.load(Ordering::SeqCst)
    }
}

/// Deterministic, non-repeating-looking test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

async fn handle(mut sock: TcpStream, shared: Arc<Shared>) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = sock.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        head.extend_from_slice(&buf[..n]);
    }
    shared.requests.fetch_add(1, Ordering::SeqCst);

    let head = String::from_utf8_lossy(&head).into_owned();
    let range = head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("range")
            .then(|| value.trim().to_string())
    });

    let options = &shared.options;
    if range.is_some() {
        shared.ranged_requests.fetch_add(1, Ordering::SeqCst);
        if options.fail_ranges {
            sock.write_all(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await?;
            return Ok(());
        }
    }

    let len = options.body.len() as u64;
    let honoured = range.as_deref().filter(|_| !options.ignore_ranges);
    let (status, start, end) = match honoured.and_then(parse_range) {
        Some((start, end)) => {
            let end = end.unwrap_or(len.saturating_sub(1)).min(len.saturating_sub(1));
            ("206 Partial Content", start, end)
        }
        None => ("200 OK", 0, len.saturating_sub(1)),
    };
    let slice: &[u8] = if len == 0 || start > end {
        &[]
    } else {
        &options.body[start as usize..=end as usize]
    };

    let mut headers = format!("HTTP/1.1 {status}\r\nConnection: close\r\n");
    if options.content_length {
        headers.push_str(&format!("Content-Length: {}\r\n", slice.len()));
    }
    if options.accept_ranges {
        headers.push_str("Accept-Ranges: bytes\r\n");
    }
    if status.starts_with("206") {
        headers.push_str(&format!("Content-Range: bytes {start}-{end}/{len}\r\n"));
    }
    headers.push_str("\r\n");
    sock.write_all(headers.as_bytes()).await?;

    if start >= shared.stall_from.load(Ordering::SeqCst) {
        let cut = slice.len() / 2;
        sock.write_all(&slice[..cut]).await?;
        sock.flush().await?;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        return Ok(());
    }

    sock.write_all(slice).await?;
    sock.shutdown().await
}

fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let ranges = value.strip_prefix("bytes=")?;
    let (from, to) = ranges.split_once('-')?;
    let from = from.trim().parse().ok()?;
    let to = match to.trim() {
        "" => None,
        to => Some(to.parse().ok()?),
    };
    Some((from, to))
}
