//! Newline-delimited TCP source
//!
//! Accepts any number of connections; every line is one message. Each
//! connection is its own partition so framing state never mixes bytes from
//! different peers.
//!
//! ```text
//! TcpListener ──accept──► ConnectionHandler (per peer, partition = conn id)
//!                               │ read_bounded_line
//!                               ▼
//!                        mpsc::Sender<Message> ──► TcpLineSource::poll
//! ```
//!
//! TCP gives no replay, so commits are only counted.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use capline_config::TcpSourceConfig;

use crate::MessageSource;
use crate::common::{
    ReadLineResult, SourceMetrics, is_connection_reset, read_bounded_line, trim_newline,
};
use crate::error::{Result, SourceError};
use crate::message::{CommitHandle, Committer, Message, OffsetRange};

/// Commits on a transport without replay: counted, nothing else
struct CountingCommitter {
    metrics: Arc<SourceMetrics>,
}

impl Committer for CountingCommitter {
    fn commit(&self, _partition: u64, _range: OffsetRange) -> Result<()> {
        self.metrics.committed();
        Ok(())
    }
}

/// TCP line source
pub struct TcpLineSource {
    id: String,
    local_addr: SocketAddr,
    receiver: mpsc::Receiver<Message>,
    metrics: Arc<SourceMetrics>,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl TcpLineSource {
    /// Bind the listener and start accepting connections
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub async fn bind(config: &TcpSourceConfig) -> Result<Self> {
        let bind_addr = config.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| SourceError::Bind {
                address: bind_addr.clone(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            address = %local_addr,
            max_line_size = config.max_line_size,
            "TCP source listening"
        );

        let (sender, receiver) = mpsc::channel(config.channel_capacity);
        let metrics = Arc::new(SourceMetrics::new());
        let cancel = CancellationToken::new();

        let acceptor = Acceptor {
            listener,
            sender,
            committer: Arc::new(CountingCommitter {
                metrics: Arc::clone(&metrics),
            }),
            metrics: Arc::clone(&metrics),
            max_line_size: config.max_line_size,
            nodelay: config.nodelay,
            next_connection: AtomicU64::new(0),
        };
        let accept_task = tokio::spawn(acceptor.run(cancel.clone()));

        Ok(Self {
            id: format!("tcp:{local_addr}"),
            local_addr,
            receiver,
            metrics,
            cancel,
            accept_task,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for TcpLineSource {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.accept_task.abort();
    }
}

#[async_trait]
impl MessageSource for TcpLineSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(message) => Ok(message),
            Err(_) => Ok(None),
        }
    }

    fn metrics_handle(&self) -> Arc<SourceMetrics> {
        Arc::clone(&self.metrics)
    }
}

struct Acceptor {
    listener: TcpListener,
    sender: mpsc::Sender<Message>,
    committer: Arc<dyn Committer>,
    metrics: Arc<SourceMetrics>,
    max_line_size: usize,
    nodelay: bool,
    next_connection: AtomicU64,
}

impl Acceptor {
    async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => self.spawn_handler(stream, peer_addr, &cancel),
                        Err(e) => {
                            self.metrics.error();
                            tracing::warn!(error = %e, "TCP accept error");
                        }
                    }
                }
            }
        }
        tracing::debug!("TCP source accept loop stopped");
    }

    fn spawn_handler(&self, stream: TcpStream, peer_addr: SocketAddr, cancel: &CancellationToken) {
        if self.nodelay
            && let Err(e) = stream.set_nodelay(true)
        {
            tracing::debug!(peer = %peer_addr, error = %e, "failed to set TCP_NODELAY");
        }

        self.metrics.connection_opened();
        let handler = ConnectionHandler {
            partition: self.next_connection.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            sender: self.sender.clone(),
            committer: Arc::clone(&self.committer),
            metrics: Arc::clone(&self.metrics),
            max_line_size: self.max_line_size,
        };
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let metrics = Arc::clone(&handler.metrics);
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = handler.handle(stream) => {}
            }
            metrics.connection_closed();
        });
    }
}

struct ConnectionHandler {
    partition: u64,
    peer_addr: SocketAddr,
    sender: mpsc::Sender<Message>,
    committer: Arc<dyn Committer>,
    metrics: Arc<SourceMetrics>,
    max_line_size: usize,
}

impl ConnectionHandler {
    async fn handle(self, stream: TcpStream) {
        tracing::debug!(peer = %self.peer_addr, partition = self.partition, "connection opened");

        let mut reader = BufReader::new(stream);
        let mut line_buf = Vec::with_capacity(4096);
        let mut sequence = 0u64;

        loop {
            match read_bounded_line(&mut reader, &mut line_buf, self.max_line_size).await {
                Ok(ReadLineResult::Line(_)) => {
                    let line = trim_newline(&line_buf);
                    self.metrics.message_received(line.len() as u64);

                    let commit = CommitHandle::new(
                        Arc::clone(&self.committer),
                        self.partition,
                        OffsetRange::new(sequence, sequence + 1),
                    );
                    sequence += 1;

                    let message = Message::new(Bytes::copy_from_slice(line), self.partition, commit);
                    if self.sender.send(message).await.is_err() {
                        // Source dropped
                        break;
                    }
                }
                Ok(ReadLineResult::TooLong(consumed)) => {
                    self.metrics.line_too_long();
                    tracing::debug!(
                        peer = %self.peer_addr,
                        bytes = consumed,
                        max = self.max_line_size,
                        "line too large, dropped"
                    );
                }
                Ok(ReadLineResult::Eof) => break,
                Err(e) => {
                    if !is_connection_reset(&e) {
                        self.metrics.error();
                        tracing::debug!(peer = %self.peer_addr, error = %e, "TCP read error");
                    }
                    break;
                }
            }
        }

        tracing::debug!(peer = %self.peer_addr, lines = sequence, "connection closed");
    }
}

#[cfg(test)]
#[path = "tcp_test.rs"]
mod tcp_test;
