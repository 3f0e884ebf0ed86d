use super::consumer::{Consumer, ConsumerConfig, ConsumerError, DeliveryMode};
use super::encoding::{self, EncodingError};
use super::error_reporter::{CODE_UNSPECIFIED, ErrorReporter};
use crate::buffer::Batch;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Largest slice handed to a single `write` call.
pub const MAX_BYTES_PER_WRITE: usize = 8192;

/// Bytes requested per `read` while waiting for the collector's answer in sync mode.
pub const RESPONSE_READ_SIZE: usize = 2048;

/// Responses larger than this are not read to the end; the connection is dropped instead.
pub const MAX_RESPONSE_SIZE: usize = 64 * 1024;

pub trait SocketStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SocketStream for T {}

/// Opens connections for a `SocketConsumer`.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self) -> io::Result<Box<dyn SocketStream>>;

    fn describe(&self) -> String;
}

/// TCP, optionally wrapped in TLS.
pub struct TcpConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl TcpConnector {
    pub fn new(config: &ConsumerConfig) -> Result<Self, ConsumerError> {
        let tls = if config.use_ssl {
            let provider = Arc::new(rustls::crypto::ring::default_provider());
            let root_store =
                RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let tls_config = rustls::ClientConfig::builder_with_provider(provider)
                .with_safe_default_protocol_versions()
                .map_err(|e| ConsumerError::Tls(e.to_string()))?
                .with_root_certificates(root_store)
                .with_no_client_auth();
            let server_name = ServerName::try_from(config.host.clone())
                .map_err(|e| ConsumerError::Tls(format!("invalid server name '{}': {e}", config.host)))?;
            Some((TlsConnector::from(Arc::new(tls_config)), server_name))
        } else {
            None
        };

        Ok(Self {
            host: config.host.clone(),
            port: config.port(),
            connect_timeout: config.connect_timeout,
            tls,
        })
    }
}

#[async_trait]
impl SocketConnector for TcpConnector {
    async fn connect(&self) -> io::Result<Box<dyn SocketStream>> {
        let tcp = timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        tcp.set_nodelay(true)?;

        match &self.tls {
            Some((connector, server_name)) => {
                let stream = timeout(
                    self.connect_timeout,
                    connector.connect(server_name.clone(), tcp),
                )
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"))??;
                Ok(Box::new(stream))
            }
            None => Ok(Box::new(tcp)),
        }
    }

    fn describe(&self) -> String {
        let protocol = if self.tls.is_some() { "tls" } else { "tcp" };
        format!("{protocol}://{}:{}", self.host, self.port)
    }
}

/// The minimal view of an HTTP response the socket consumer cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketResponse {
    pub status: Option<u16>,
    pub body: String,
    pub connection_close: bool,
    pub content_length: Option<usize>,
}

impl SocketResponse {
    /// Status line, header block, and the final line as the body.
    pub fn parse(raw: &str) -> Self {
        let lines: Vec<&str> = raw.split('\n').map(|l| l.trim_end_matches('\r')).collect();

        let status = lines
            .first()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse().ok());

        let headers: Vec<(&str, &str)> = lines
            .iter()
            .skip(1)
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim(), value.trim()))
            .collect();

        let connection_close = headers.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("connection") && value.eq_ignore_ascii_case("close")
        });
        let content_length = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.parse().ok());

        let body = lines.last().map(|l| l.to_string()).unwrap_or_default();

        Self {
            status,
            body,
            connection_close,
            content_length,
        }
    }
}

/// Raw bytes of one response and whether they end exactly where the
/// response does.
struct RawResponse {
    bytes: Vec<u8>,
    framed: bool,
}

fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Reads the header block, then `Content-Length` body bytes.
///
/// Without a usable length the bytes read so far are returned unframed and
/// the caller must not reuse the connection.
async fn read_message<S>(stream: &mut S) -> io::Result<RawResponse>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let mut bytes = Vec::with_capacity(RESPONSE_READ_SIZE);
    let mut chunk = vec![0u8; RESPONSE_READ_SIZE];

    let head = loop {
        if let Some(end) = head_end(&bytes) {
            break end;
        }
        if bytes.len() >= MAX_RESPONSE_SIZE {
            return Ok(RawResponse { bytes, framed: false });
        }
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            if bytes.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before a response arrived",
                ));
            }
            return Ok(RawResponse { bytes, framed: false });
        }
        bytes.extend_from_slice(&chunk[..read]);
    };

    let Some(length) = SocketResponse::parse(&String::from_utf8_lossy(&bytes[..head])).content_length
    else {
        return Ok(RawResponse { bytes, framed: false });
    };
    let total = head + length;
    if total > MAX_RESPONSE_SIZE {
        return Ok(RawResponse { bytes, framed: false });
    }

    while bytes.len() < total {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(RawResponse { bytes, framed: false });
        }
        bytes.extend_from_slice(&chunk[..read]);
    }
    let framed = bytes.len() == total;
    Ok(RawResponse { bytes, framed })
}

/// Keeps one connection open across calls and frames each batch as a raw
/// HTTP/1.1 POST.
///
/// A failed write tears the connection down and resends the whole request
/// once on a fresh one. Opening a connection is itself retried once.
pub struct SocketConsumer {
    config: ConsumerConfig,
    connector: Box<dyn SocketConnector>,
    socket: Option<Box<dyn SocketStream>>,
    reporter: ErrorReporter,
}

impl SocketConsumer {
    pub fn new(config: ConsumerConfig) -> Result<Self, ConsumerError> {
        config.validate()?;
        let connector = TcpConnector::new(&config)?;
        Self::with_connector(config, Box::new(connector))
    }

    pub fn with_connector(
        config: ConsumerConfig,
        connector: Box<dyn SocketConnector>,
    ) -> Result<Self, ConsumerError> {
        if config.mode == DeliveryMode::Fork {
            return Err(ConsumerError::InvalidConfiguration(
                "the socket consumer supports sync and async modes only".to_string(),
            ));
        }
        Ok(Self {
            reporter: config.reporter("socket"),
            config,
            connector,
            socket: None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// The exact bytes written for `batch`.
    pub fn request_bytes(&self, batch: &Batch) -> Result<Bytes, EncodingError> {
        let data = encoding::encode_form_body(batch.records())?;
        let head = format!(
            "POST {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Accept: application/json\r\n\
             Content-Length: {}\r\n\
             \r\n",
            self.config.endpoint,
            self.config.authority(),
            data.len()
        );

        let mut request = BytesMut::with_capacity(head.len() + data.len());
        request.put_slice(head.as_bytes());
        request.put_slice(data.as_bytes());
        Ok(request.freeze())
    }

    async fn ensure_socket(&mut self) -> bool {
        if self.socket.is_some() {
            debug!("Using existing socket");
            return true;
        }
        self.socket = create_socket(self.connector.as_ref(), &self.reporter).await;
        self.socket.is_some()
    }

    fn destroy_socket(&mut self) {
        if self.socket.take().is_some() {
            debug!(destination = %self.connector.describe(), "Destroyed socket");
        }
    }

    async fn write_chunked(&mut self, request: &[u8]) -> bool {
        let write_timeout = self.config.timeout;
        let Some(stream) = self.socket.as_mut() else {
            return false;
        };

        let mut sent = 0;
        while sent < request.len() {
            let end = (sent + MAX_BYTES_PER_WRITE).min(request.len());
            match timeout(write_timeout, stream.write(&request[sent..end])).await {
                Ok(Ok(0)) => {
                    self.reporter
                        .report(CODE_UNSPECIFIED, "Socket closed while writing");
                    return false;
                }
                Ok(Ok(bytes)) => {
                    debug!(bytes, sent = sent + bytes, total = request.len(), "Socket wrote");
                    sent += bytes;
                }
                Ok(Err(e)) => {
                    self.reporter.report_io("Socket write failed", &e);
                    return false;
                }
                Err(_) => {
                    self.reporter.report(CODE_UNSPECIFIED, "Socket write timed out");
                    return false;
                }
            }
        }

        match timeout(write_timeout, stream.flush()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                self.reporter.report_io("Socket flush failed", &e);
                false
            }
            Err(_) => {
                self.reporter.report(CODE_UNSPECIFIED, "Socket flush timed out");
                false
            }
        }
    }

    async fn send(&mut self, request: &[u8]) -> bool {
        for attempt in 1..=2 {
            if !self.ensure_socket().await {
                return false;
            }
            if self.write_chunked(request).await {
                return true;
            }
            self.destroy_socket();
            if attempt == 1 {
                debug!("Retrying socket write on a fresh connection");
            }
        }
        false
    }

    async fn read_response(&mut self) -> bool {
        let read_timeout = self.config.timeout;
        let Some(stream) = self.socket.as_mut() else {
            return false;
        };

        let raw = match timeout(read_timeout, read_message(&mut **stream)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                self.reporter.report_io("Socket read failed", &e);
                self.destroy_socket();
                return false;
            }
            Err(_) => {
                self.reporter.report(CODE_UNSPECIFIED, "Timed out waiting for response");
                self.destroy_socket();
                return false;
            }
        };

        let response = SocketResponse::parse(&String::from_utf8_lossy(&raw.bytes));
        if response.connection_close {
            debug!("Server closed the connection; reconnecting on next call");
            self.destroy_socket();
        } else if !raw.framed || response.status.is_none() {
            debug!(bytes = raw.bytes.len(), "Response framing unclear; reconnecting on next call");
            self.destroy_socket();
        }

        match response.status {
            Some(200) => true,
            status => {
                let code = status.map_or(CODE_UNSPECIFIED, i64::from);
                self.reporter.report(code, &response.body);
                false
            }
        }
    }
}

/// Opens a connection, retrying once on error.
async fn create_socket(
    connector: &dyn SocketConnector,
    reporter: &ErrorReporter,
) -> Option<Box<dyn SocketStream>> {
    let destination = connector.describe();
    for attempt in 1..=2 {
        debug!(%destination, attempt, "Opening socket connection");
        match connector.connect().await {
            Ok(stream) => return Some(stream),
            Err(e) => reporter.report_io(&format!("Failed to connect to {destination}"), &e),
        }
    }
    None
}

#[async_trait]
impl Consumer for SocketConsumer {
    async fn persist(&mut self, batch: &Batch) -> bool {
        if batch.is_empty() {
            return true;
        }

        let request = match self.request_bytes(batch) {
            Ok(request) => request,
            Err(e) => {
                self.reporter
                    .report(CODE_UNSPECIFIED, &format!("Failed to encode batch: {e}"));
                return false;
            }
        };

        debug!(
            destination = %self.connector.describe(),
            batch_id = batch.id(),
            bytes = request.len(),
            "Writing batch to socket"
        );

        if !self.send(&request).await {
            return false;
        }

        match self.config.mode {
            DeliveryMode::Sync => self.read_response().await,
            DeliveryMode::Async | DeliveryMode::Fork => true,
        }
    }

    fn name(&self) -> &'static str {
        "socket"
    }
}
