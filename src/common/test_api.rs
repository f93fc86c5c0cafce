//! Local HTTP server standing in for the Bot API or the Sheets API. It
//! answers every request with the same canned response and remembers what
//! was asked.

use std::sync::{Arc, Mutex};

use reqwest::Url;
use teloxide::Bot;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};

/// How Telegram refuses an unknown file.
const NOT_FOUND: &str =
    r#"{"ok":false,"error_code":404,"description":"Not Found"}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    /// Last path segment, lowercased.
    pub method: String,
    pub authorization: Option<String>,
}

pub struct FakeApi {
    url: Url,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl FakeApi {
    /// Answers 404 with a JSON error object.
    pub async fn refusing() -> Self {
        Self::answering("404 Not Found", NOT_FOUND).await
    }

    /// Answers `status` with a JSON `body`.
    pub async fn answering(status: &'static str, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(answer(socket, status, body, Arc::clone(&log)));
            }
        });
        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        Self { url, seen }
    }

    pub const fn url(&self) -> &Url {
        &self.url
    }

    pub fn bot(&self) -> Bot {
        Bot::new("123:secret").set_api_url(self.url.clone())
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.seen().into_iter().map(|s| s.method).collect()
    }
}

async fn answer(
    mut socket: TcpStream,
    status: &str,
    body: &str,
    seen: Arc<Mutex<Vec<Seen>>>,
) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    let head_len = loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
        if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&request[..head_len]).into_owned();
    let header = |name: &str| {
        head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
    };
    let path = head.split_whitespace().nth(1).unwrap_or_default();
    let path = path.split('?').next().unwrap_or_default();
    seen.lock().unwrap().push(Seen {
        method: path.rsplit('/').next().unwrap_or_default().to_lowercase(),
        authorization: header("authorization"),
    });

    // Drain the body so that closing the socket does not reset it.
    let body_len: Option<usize> = header("content-length").and_then(|len| len.parse().ok());
    let chunked = header("transfer-encoding")
        .is_some_and(|te| te.eq_ignore_ascii_case("chunked"));
    loop {
        let done = match body_len {
            Some(len) => request.len() >= head_len + len,
            None => !chunked || request.ends_with(b"0\r\n\r\n"),
        };
        if done {
            break;
        }
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
    }

    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}
