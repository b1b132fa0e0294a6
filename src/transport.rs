//! HTTP transport to the print service
//!
//! The service speaks IPP over HTTP/1.1 on localhost. One `HttpChannel` is
//! one persistent connection; reconnection policy lives in the session layer,
//! this module only knows how to re-open the socket once.

use crate::ipp::{IppRequest, IppResponse};
use std::future::Future;
use std::io;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

/// Wire access used by the session layer. Abstracted so the request/reply
/// machinery can be exercised against a scripted peer in tests.
pub trait Channel: Send {
    /// POST an IPP request, optionally followed by a file body, and decode
    /// the IPP reply. An HTTP-level or connection-level problem is an error;
    /// a decoded reply with a bad status code is not.
    fn roundtrip(
        &mut self,
        resource: &str,
        request: &IppRequest,
        file: Option<&Path>,
    ) -> impl Future<Output = io::Result<IppResponse>> + Send;

    /// GET a resource body (PPD file, configuration file).
    fn fetch(&mut self, resource: &str) -> impl Future<Output = io::Result<(u16, Vec<u8>)>> + Send;

    /// PUT a resource body.
    fn store(
        &mut self,
        resource: &str,
        body: &[u8],
    ) -> impl Future<Output = io::Result<u16>> + Send;

    /// Re-establish the connection, one attempt.
    fn reconnect(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Persistent connection to the print service
pub struct HttpChannel {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl HttpChannel {
    /// Connect to the service; failure here is fatal to gateway startup.
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self {
            host: host.to_string(),
            port,
            stream: Some(stream),
        })
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection lost"))
    }

    async fn send_request(
        &mut self,
        method: &str,
        resource: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> io::Result<(u16, Vec<u8>)> {
        debug!("{} {} ({} byte body)", method, resource, body.len());

        let mut head = format!(
            "{method} {resource} HTTP/1.1\r\nHost: {}:{}\r\nUser-Agent: quilld\r\n",
            self.host, self.port
        );
        if let Some(ct) = content_type {
            head.push_str(&format!("Content-Type: {ct}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

        let stream = self.stream()?;
        stream.write_all(head.as_bytes()).await?;
        if !body.is_empty() {
            stream.write_all(body).await?;
        }
        stream.flush().await?;

        read_response(stream).await
    }
}

impl Channel for HttpChannel {
    async fn roundtrip(
        &mut self,
        resource: &str,
        request: &IppRequest,
        file: Option<&Path>,
    ) -> io::Result<IppResponse> {
        let mut body = request.encode();
        if let Some(path) = file {
            let content = tokio::fs::read(path).await?;
            body.extend_from_slice(&content);
        }

        let (status, reply) = self
            .send_request("POST", resource, Some("application/ipp"), &body)
            .await?;

        if status != 200 {
            return Err(io::Error::other(http_status_text(status)));
        }

        IppResponse::decode(&reply).map_err(io::Error::other)
    }

    async fn fetch(&mut self, resource: &str) -> io::Result<(u16, Vec<u8>)> {
        self.send_request("GET", resource, None, &[]).await
    }

    async fn store(&mut self, resource: &str, body: &[u8]) -> io::Result<u16> {
        let (status, _) = self
            .send_request("PUT", resource, Some("application/octet-stream"), body)
            .await?;
        Ok(status)
    }

    async fn reconnect(&mut self) -> io::Result<()> {
        self.stream = None;
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        self.stream = Some(stream);
        Ok(())
    }
}

/// Read one HTTP/1.1 response: status line, headers, then a body framed by
/// Content-Length, chunked encoding, or connection close.
async fn read_response(stream: &mut TcpStream) -> io::Result<(u16, Vec<u8>)> {
    let mut reader = BufReader::new(stream);

    let status_line = read_line(&mut reader).await?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed status line: {status_line:?}"),
            )
        })?;

    let mut content_length: Option<usize> = None;
    let mut chunked = false;

    loop {
        let line = read_line(&mut reader).await?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().ok();
            } else if name.eq_ignore_ascii_case("transfer-encoding")
                && value.eq_ignore_ascii_case("chunked")
            {
                chunked = true;
            }
        }
    }

    let mut body = Vec::new();

    if chunked {
        loop {
            let size_line = read_line(&mut reader).await?;
            let size = usize::from_str_radix(size_line.trim(), 16).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "malformed chunk size")
            })?;
            if size == 0 {
                // trailing CRLF after the last chunk
                let _ = read_line(&mut reader).await?;
                break;
            }
            let start = body.len();
            body.resize(start + size, 0);
            reader.read_exact(&mut body[start..]).await?;
            let _ = read_line(&mut reader).await?;
        }
    } else if let Some(len) = content_length {
        body.resize(len, 0);
        reader.read_exact(&mut body).await?;
    } else {
        // No framing: the peer will close the connection when done.
        reader.read_to_end(&mut body).await?;
    }

    Ok((status, body))
}

async fn read_line<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<String> {
    // Byte-at-a-time is fine here: the reader is buffered and header
    // sections are tiny compared to bodies.
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
        }
    }
    String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}


/// Human-readable rendering of an HTTP status, used for the caller-visible
/// status string when a file transfer fails at the HTTP layer.
pub fn http_status_text(status: u16) -> String {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        426 => "Upgrade Required",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    };
    if reason.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status} {reason}")
    }
}
