// src/tasks/icap/client.rs

//! Minimal ICAP/1.0 client (RFC 3507): OPTIONS plus REQMOD/RESPMOD with a
//! chunked, optionally previewed body.

use std::fmt::Write as _;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

pub const DEFAULT_PORT: u16 = 1344;

#[derive(Error, Debug)]
pub enum IcapError {
    #[error("invalid ICAP URL {0:?}")]
    BadUrl(String),

    #[error("ICAP protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn protocol(msg: impl Into<String>) -> IcapError {
    IcapError::Protocol(msg.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Reqmod,
    Respmod,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Reqmod => "REQMOD",
            Method::Respmod => "RESPMOD",
        }
    }
}

/// `icap://host[:port]/service`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcapUrl {
    pub host: String,
    pub port: u16,
    pub service: String,
}

impl IcapUrl {
    pub fn parse(url: &str) -> Result<Self, IcapError> {
        let rest = url
            .strip_prefix("icap://")
            .ok_or_else(|| IcapError::BadUrl(url.to_string()))?;
        let (authority, service) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if !p.contains(']') => {
                let port = p.parse().map_err(|_| IcapError::BadUrl(url.to_string()))?;
                (h, port)
            }
            _ => (authority, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(IcapError::BadUrl(url.to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            service: service.to_string(),
        })
    }

    fn host_header(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for IcapUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "icap://{}:{}{}", self.host, self.port, self.service)
    }
}

#[derive(Debug, Clone, Default)]
pub struct IcapResponse {
    pub status: u16,
    pub reason: String,
    headers: Vec<(String, String)>,
    /// De-chunked encapsulated body, if the server sent one.
    pub body: Option<Vec<u8>>,
}

impl IcapResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Modification request: the file and how it is encapsulated.
#[derive(Debug)]
pub struct ModRequest<'a> {
    pub method: Method,
    pub content: &'a [u8],
    /// Host used in the encapsulated HTTP request (REQMOD only).
    pub origin: &'a str,
    /// Bytes to send before waiting for `100 Continue`.
    pub preview: Option<usize>,
}

fn head(method: Method, url: &IcapUrl) -> String {
    let mut out = String::new();
    let _ = write!(out, "{} {} ICAP/1.0\r\n", method.as_str(), url);
    let _ = write!(out, "Host: {}\r\n", url.host_header());
    out.push_str("User-Agent: taskgate\r\n");
    out
}

fn encapsulated_http(req: &ModRequest<'_>) -> (String, String) {
    let len = req.content.len();
    match req.method {
        Method::Reqmod => {
            let http = format!(
                "POST http://{}/ HTTP/1.1\r\nHost: {}\r\nContent-Length: {}\r\n\r\n",
                req.origin, req.origin, len
            );
            let enc = format!("req-hdr=0, req-body={}", http.len());
            (http, enc)
        }
        _ => {
            let http = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
                len
            );
            let enc = format!("res-hdr=0, res-body={}", http.len());
            (http, enc)
        }
    }
}

async fn write_chunk<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> Result<(), IcapError> {
    if data.is_empty() {
        return Ok(());
    }
    w.write_all(format!("{:x}\r\n", data.len()).as_bytes()).await?;
    w.write_all(data).await?;
    w.write_all(b"\r\n").await?;
    Ok(())
}

async fn read_line<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<String, IcapError> {
    let mut line = String::new();
    if r.read_line(&mut line).await? == 0 {
        return Err(protocol("connection closed by server"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn read_head<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<IcapResponse, IcapError> {
    let status_line = read_line(r).await?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("ICAP/") {
        return Err(protocol(format!("unexpected status line {:?}", status_line)));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| protocol(format!("unexpected status line {:?}", status_line)))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        let line = read_line(r).await?;
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.push((k.trim().to_string(), v.trim().to_string()));
        }
    }
    Ok(IcapResponse {
        status,
        reason,
        headers,
        body: None,
    })
}

async fn read_chunked<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<Vec<u8>, IcapError> {
    let mut body = Vec::new();
    loop {
        let line = read_line(r).await?;
        let size_str = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| protocol(format!("bad chunk size {:?}", line)))?;
        if size == 0 {
            // Trailer section ends with an empty line.
            while !read_line(r).await?.is_empty() {}
            return Ok(body);
        }
        let start = body.len();
        body.resize(start + size, 0);
        r.read_exact(&mut body[start..]).await?;
        read_line(r).await?;
    }
}

/// Offset of the body part in an `Encapsulated` header, if any.
fn body_offset(encapsulated: &str) -> Option<usize> {
    encapsulated.split(',').find_map(|part| {
        let (name, offset) = part.trim().split_once('=')?;
        if name.ends_with("-body") && name != "null-body" {
            offset.trim().parse().ok()
        } else {
            None
        }
    })
}

async fn read_response<R: AsyncBufRead + Unpin>(r: &mut R) -> Result<IcapResponse, IcapError> {
    let mut resp = read_head(r).await?;
    if resp.status == 100 || resp.status == 204 {
        return Ok(resp);
    }
    if let Some(offset) = resp.header("Encapsulated").and_then(body_offset) {
        let mut http_head = vec![0u8; offset];
        r.read_exact(&mut http_head).await?;
        resp.body = Some(read_chunked(r).await?);
    }
    Ok(resp)
}

pub struct IcapClient {
    url: IcapUrl,
}

impl IcapClient {
    pub fn new(url: IcapUrl) -> Self {
        Self { url }
    }

    async fn connect(&self) -> Result<TcpStream, IcapError> {
        let stream = TcpStream::connect((self.url.host.as_str(), self.url.port)).await?;
        debug!(url = %self.url, "ICAP connection established");
        Ok(stream)
    }

    pub async fn options(&self) -> Result<IcapResponse, IcapError> {
        let stream = self.connect().await?;
        let (reader, mut writer) = stream.into_split();
        let mut request = head(Method::Options, &self.url);
        request.push_str("Encapsulated: null-body=0\r\n\r\n");
        writer.write_all(request.as_bytes()).await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        read_head(&mut reader).await
    }

    pub async fn modify(&self, req: ModRequest<'_>) -> Result<IcapResponse, IcapError> {
        let stream = self.connect().await?;
        let (reader, writer) = stream.into_split();
        exchange(BufReader::new(reader), writer, &self.url, req).await
    }
}

async fn exchange<R, W>(
    mut reader: R,
    mut writer: W,
    url: &IcapUrl,
    req: ModRequest<'_>,
) -> Result<IcapResponse, IcapError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (http, encapsulated) = encapsulated_http(&req);
    let content = req.content;
    let preview = req.preview.filter(|n| *n < content.len());

    let mut request = head(req.method, url);
    if let Some(n) = preview {
        let _ = write!(request, "Preview: {}\r\n", n);
    }
    request.push_str("Allow: 204\r\n");
    let _ = write!(request, "Encapsulated: {}\r\n\r\n", encapsulated);
    request.push_str(&http);
    writer.write_all(request.as_bytes()).await?;

    let rest = match preview {
        Some(n) => {
            write_chunk(&mut writer, &content[..n]).await?;
            writer.write_all(b"0\r\n\r\n").await?;
            writer.flush().await?;
            let interim = read_response(&mut reader).await?;
            if interim.status != 100 {
                debug!(status = interim.status, "ICAP server answered the preview");
                return Ok(interim);
            }
            &content[n..]
        }
        None => content,
    };

    for chunk in rest.chunks(32 * 1024) {
        write_chunk(&mut writer, chunk).await?;
    }
    writer.write_all(b"0\r\n\r\n").await?;
    writer.flush().await?;

    read_response(&mut reader).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn parses_urls() {
        let url = IcapUrl::parse("icap://scanner:1345/avscan").unwrap();
        assert_eq!(url.host, "scanner");
        assert_eq!(url.port, 1345);
        assert_eq!(url.service, "/avscan");

        let url = IcapUrl::parse("icap://scanner").unwrap();
        assert_eq!(url.port, DEFAULT_PORT);
        assert_eq!(url.service, "/");

        assert!(IcapUrl::parse("http://scanner").is_err());
        assert!(IcapUrl::parse("icap://:99/x").is_err());
    }

    #[test]
    fn finds_body_offsets() {
        assert_eq!(body_offset("res-hdr=0, res-body=137"), Some(137));
        assert_eq!(body_offset("req-hdr=0, req-body=55"), Some(55));
        assert_eq!(body_offset("null-body=0"), None);
    }

    #[tokio::test]
    async fn reads_a_modified_body() {
        let http = "HTTP/1.1 200 OK\r\n\r\n";
        let raw = format!(
            "ICAP/1.0 200 OK\r\nEncapsulated: res-hdr=0, res-body={}\r\n\r\n{}5\r\nclean\r\n0\r\n\r\n",
            http.len(),
            http
        );
        let mut reader = BufReader::new(raw.as_bytes());
        let resp = read_response(&mut reader).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body.as_deref(), Some(&b"clean"[..]));
    }

    #[tokio::test]
    async fn preview_stops_on_early_answer() {
        let (client, mut server) = duplex(64 * 1024);
        let (r, w) = tokio::io::split(client);
        let url = IcapUrl::parse("icap://scanner/avscan").unwrap();

        server
            .write_all(b"ICAP/1.0 204 No Content\r\n\r\n")
            .await
            .unwrap();
        let resp = exchange(
            BufReader::new(r),
            w,
            &url,
            ModRequest {
                method: Method::Respmod,
                content: b"0123456789",
                origin: "",
                preview: Some(4),
            },
        )
        .await
        .unwrap();
        assert_eq!(resp.status, 204);

        let mut sent = vec![0u8; 4096];
        let n = server.read(&mut sent).await.unwrap();
        let sent = String::from_utf8_lossy(&sent[..n]);
        assert!(sent.starts_with("RESPMOD icap://scanner:1344/avscan ICAP/1.0\r\n"));
        assert!(sent.contains("Preview: 4\r\n"));
        assert!(sent.ends_with("4\r\n0123\r\n0\r\n\r\n"));
    }
}
