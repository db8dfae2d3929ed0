//! RFC 1413 ident responder.
//!
//! Sessions report the local port of each outbound connection together with
//! the username to claim. Entries live for a short TTL and are forgotten once
//! a query for them has been answered.

use crate::config::IdentdConfig;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_REQUEST_LEN: u64 = 512;

/// Told about each new outbound connection.
pub trait IdentReporter: Send + Sync {
    fn register(&self, local_port: u16, username: &str);
}

#[derive(Debug)]
pub struct IdentdService {
    ttl: Duration,
    users: Mutex<HashMap<u16, (String, Instant)>>,
}

impl IdentdService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Take the username for `port`, if it is registered and not expired.
    fn claim(&self, port: u16) -> Option<String> {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        users.retain(|_, (_, added)| now.duration_since(*added) < self.ttl);
        users.remove(&port).map(|(name, _)| name)
    }

    /// Build the reply for one request line.
    pub fn respond(&self, request: &str) -> Option<String> {
        let (local, remote) = request.trim().split_once(',')?;
        let local: u64 = local.trim().parse().unwrap_or(0);
        let remote: u64 = remote.trim().parse().unwrap_or(0);
        let clamp = |port: u64| port.min(u16::MAX as u64);
        let head = format!("{}, {} : ", clamp(local), clamp(remote));

        let valid = |port: u64| port != 0 && port <= u16::MAX as u64;
        if !valid(local) || !valid(remote) {
            tracing::info!(request, "identd: invalid port");
            return Some(format!("{}ERROR : INVALID-PORT\r\n", head));
        }
        match self.claim(local as u16) {
            Some(username) => {
                tracing::info!(local, username = %username, "identd: answering");
                Some(format!("{}USERID : UNIX : {}\r\n", head, username))
            }
            None => {
                tracing::info!(local, "identd: unknown local port");
                Some(format!("{}ERROR : NO-USER\r\n", head))
            }
        }
    }

    /// Accept ident queries until the listener fails.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "identd: accept failed");
                    return;
                }
            };
            let service = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = service.serve(stream).await {
                    tracing::debug!(%peer, error = %e, "identd: request failed");
                }
            });
        }
    }

    async fn serve(&self, stream: TcpStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader).take(MAX_REQUEST_LEN);
        let mut line = String::new();
        timeout(REQUEST_TIMEOUT, reader.read_line(&mut line))
            .await
            .context("timed out waiting for request")??;
        if let Some(reply) = self.respond(&line) {
            writer.write_all(reply.as_bytes()).await?;
            writer.shutdown().await?;
        }
        Ok(())
    }
}

impl IdentReporter for IdentdService {
    fn register(&self, local_port: u16, username: &str) {
        if local_port == 0 || username.is_empty() {
            return;
        }
        tracing::info!(local_port, username, "identd: registering");
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        users.insert(local_port, (username.to_string(), Instant::now()));
    }
}

/// Bind the configured address and serve in the background.
pub async fn start(config: &IdentdConfig) -> Result<Arc<IdentdService>> {
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind identd on {}", config.bind))?;
    let service = Arc::new(IdentdService::new(Duration::from_secs(config.ttl_secs)));
    tracing::info!(bind = %config.bind, "identd listening");
    tokio::spawn(Arc::clone(&service).run(listener));
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_formats() {
        let service = IdentdService::new(Duration::from_secs(30));
        service.register(51234, "crab");

        assert_eq!(
            service.respond("51234 , 6667\r\n").as_deref(),
            Some("51234, 6667 : USERID : UNIX : crab\r\n")
        );
        // answered once, then forgotten
        assert_eq!(
            service.respond("51234,6667").as_deref(),
            Some("51234, 6667 : ERROR : NO-USER\r\n")
        );
        assert_eq!(
            service.respond("0, 6667").as_deref(),
            Some("0, 6667 : ERROR : INVALID-PORT\r\n")
        );
        assert_eq!(
            service.respond("70000, 6667").as_deref(),
            Some("65535, 6667 : ERROR : INVALID-PORT\r\n")
        );
        assert_eq!(service.respond("garbage"), None);
    }

    #[test]
    fn test_entries_expire() {
        let service = IdentdService::new(Duration::ZERO);
        service.register(4000, "crab");
        assert_eq!(
            service.respond("4000, 113").as_deref(),
            Some("4000, 113 : ERROR : NO-USER\r\n")
        );
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = Arc::new(IdentdService::new(Duration::from_secs(30)));
        service.register(40000, "crab");
        tokio::spawn(Arc::clone(&service).run(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"40000, 6697\r\n").await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, "40000, 6697 : USERID : UNIX : crab\r\n");
    }
}
