//! Socket plumbing: connect (plain or TLS), the read loop, and the write
//! half wrapped as a [`LineSink`].

use super::sendq::LineSink;
use super::server::ConnectTarget;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

/// Applies to connecting and to every individual read and write.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(180);

/// Longest inbound line: 8191 bytes of message tags plus a 512 byte message.
pub const MAX_LINE_LEN: u64 = 8191 + 512;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection timed out")]
    Timeout,
    #[error("connection cancelled")]
    Cancelled,
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub struct Established {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub local_port: u16,
}

/// Completions reported back to the session task. Every variant carries the
/// generation of the connection it belongs to.
pub enum TransportEvent {
    Connected { generation: u64, established: Established },
    ConnectFailed { generation: u64, error: String },
    Line { generation: u64, bytes: Vec<u8> },
    /// `reason` is `None` when the peer closed the connection cleanly.
    Closed { generation: u64, reason: Option<String> },
}

pub async fn connect(target: &ConnectTarget) -> Result<Established, ConnectError> {
    tokio::select! {
        _ = target.cancel.cancelled() => Err(ConnectError::Cancelled),
        result = timeout(SOCKET_TIMEOUT, open(target)) => match result {
            Ok(established) => established,
            Err(_) => Err(ConnectError::Timeout),
        },
    }
}

async fn open(target: &ConnectTarget) -> Result<Established, ConnectError> {
    let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
    stream.set_nodelay(true)?;
    let local_port = stream.local_addr()?.port();

    if !target.tls {
        let (reader, writer) = stream.into_split();
        return Ok(Established {
            reader: Box::new(reader),
            writer: Box::new(writer),
            local_port,
        });
    }

    let config = if target.accept_invalid_certs {
        tracing::warn!(host = %target.host, "TLS certificate verification disabled");
        insecure_tls_config()
    } else {
        tls_config()
    };
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = rustls::pki_types::ServerName::try_from(target.host.clone())
        .map_err(|_| ConnectError::InvalidServerName(target.host.clone()))?;
    let tls = connector.connect(server_name, stream).await?;
    let (reader, writer) = tokio::io::split(tls);
    Ok(Established {
        reader: Box::new(reader),
        writer: Box::new(writer),
        local_port,
    })
}

fn tls_config() -> rustls::ClientConfig {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

fn insecure_tls_config() -> rustls::ClientConfig {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth()
}

#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Read LF terminated lines until EOF, error, timeout or cancellation.
/// Line terminators are stripped and empty lines skipped.
pub fn spawn_reader(
    generation: u64,
    reader: BoxedReader,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(512);
        // Set while skipping the rest of an overlong line.
        let mut discarding = false;
        loop {
            buf.clear();
            let mut limited = (&mut reader).take(MAX_LINE_LEN);
            let read = tokio::select! {
                _ = cancel.cancelled() => return,
                read = timeout(SOCKET_TIMEOUT, limited.read_until(b'\n', &mut buf)) => read,
            };
            let reason = match read {
                Ok(Ok(0)) => None,
                Ok(Ok(_)) => {
                    let complete = buf.last() == Some(&b'\n');
                    if discarding {
                        discarding = !complete;
                        continue;
                    }
                    if !complete && buf.len() as u64 == MAX_LINE_LEN {
                        tracing::warn!(generation, "dropping line longer than {} bytes", MAX_LINE_LEN);
                        discarding = true;
                        continue;
                    }
                    while matches!(buf.last(), Some(b'\n' | b'\r')) {
                        buf.pop();
                    }
                    if buf.is_empty() {
                        continue;
                    }
                    let line = TransportEvent::Line {
                        generation,
                        bytes: buf.clone(),
                    };
                    if events.send(line).is_err() {
                        return;
                    }
                    continue;
                }
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("Read timed out".to_string()),
            };
            if !cancel.is_cancelled() {
                let _ = events.send(TransportEvent::Closed { generation, reason });
            }
            return;
        }
    })
}

/// Write half of a connection. Writes complete in order on a dedicated
/// task; the sink counts as busy while any of them is outstanding.
pub struct WriterSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    in_flight: Arc<AtomicUsize>,
}

impl WriterSink {
    pub fn spawn(
        generation: u64,
        mut writer: BoxedWriter,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&in_flight);

        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                let result = timeout(SOCKET_TIMEOUT, async {
                    writer.write_all(&bytes).await?;
                    writer.flush().await
                })
                .await;
                counter.fetch_sub(1, Ordering::AcqRel);
                let reason = match result {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "Write timed out".to_string(),
                };
                tracing::warn!(generation, reason = %reason, "write failed");
                let _ = events.send(TransportEvent::Closed {
                    generation,
                    reason: Some(reason),
                });
                return;
            }
            // Sender dropped: everything queued is out, close our side.
            let _ = writer.shutdown().await;
        });

        Self { tx, in_flight }
    }
}

impl LineSink for WriterSink {
    fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    fn write(&mut self, bytes: Vec<u8>) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(bytes).is_err() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            tracing::debug!("writer task is gone, dropping write");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_strips_terminators_and_reports_eof() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        spawn_reader(7, Box::new(client), token, tx);

        server.write_all(b"PING :a\r\n\r\nPING :b\n").await.unwrap();
        drop(server);

        let mut lines = Vec::new();
        let mut closed = None;
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Line { generation, bytes } => {
                    assert_eq!(generation, 7);
                    lines.push(String::from_utf8(bytes).unwrap());
                }
                TransportEvent::Closed { reason, .. } => {
                    closed = Some(reason);
                    break;
                }
                _ => unreachable!(),
            }
        }
        assert_eq!(lines, vec!["PING :a", "PING :b"]);
        assert_eq!(closed, Some(None));
    }

    #[tokio::test]
    async fn test_reader_drops_overlong_lines() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_reader(1, Box::new(client), CancellationToken::new(), tx);

        let mut flood = vec![b'A'; MAX_LINE_LEN as usize * 2 + 10];
        flood.extend_from_slice(b"\r\nPING :ok\r\n");
        server.write_all(&flood).await.unwrap();
        drop(server);

        let mut lines = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Line { bytes, .. } => lines.push(bytes),
                _ => break,
            }
        }
        assert_eq!(lines, vec![b"PING :ok".to_vec()]);
    }

    #[tokio::test]
    async fn test_cancelled_reader_is_silent() {
        let (client, _server) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = spawn_reader(1, Box::new(client), token.clone(), tx);
        token.cancel();
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_writer_sink_delivers_in_order() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sink = WriterSink::spawn(1, Box::new(client), tx);
        sink.write(b"NICK me\r\n".to_vec());
        sink.write(b"USER me * * :me\r\n".to_vec());
        drop(sink);

        let mut received = String::new();
        server.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "NICK me\r\nUSER me * * :me\r\n");
    }
}
