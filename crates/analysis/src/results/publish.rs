//! Line publisher
//!
//! Republishes every parsed document as one JSON line over TCP. The
//! connection is opened lazily, kept alive between reports and re-established
//! after write failures.

use std::io::ErrorKind;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use capline_config::PublishConfig;

use super::{DeliveryStats, ResultSink};
use crate::error::ResultSinkError;
use crate::trigger::AnalysisReport;

/// TCP newline-delimited JSON publisher
pub struct LinePublisher {
    name: String,
    config: PublishConfig,
    connection: Mutex<Option<TcpStream>>,
}

impl LinePublisher {
    pub fn new(config: PublishConfig) -> Self {
        Self {
            name: format!("publish:{}", config.target),
            config,
            connection: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<TcpStream, ResultSinkError> {
        let stream = timeout(
            self.config.connection_timeout,
            TcpStream::connect(&self.config.target),
        )
        .await
        .map_err(|_| ResultSinkError::ConnectionFailed {
            target: self.config.target.clone(),
            source: std::io::Error::new(ErrorKind::TimedOut, "connection timed out"),
        })?
        .map_err(|e| ResultSinkError::ConnectionFailed {
            target: self.config.target.clone(),
            source: e,
        })?;

        if self.config.tcp_keepalive {
            let keepalive = TcpKeepalive::new().with_time(self.config.connection_timeout);
            if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
                tracing::debug!(
                    sink = %self.name,
                    error = %e,
                    "failed to set TCP keep-alive, continuing without keep-alive"
                );
            }
        }

        tracing::debug!(sink = %self.name, "connected to target");
        Ok(stream)
    }

    async fn send_with_retry(&self, payload: &[u8]) -> Result<(), ResultSinkError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_interval).await;
            }

            match self.send(payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = e.to_string();
                    tracing::debug!(
                        sink = %self.name,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "send attempt failed"
                    );
                }
            }
        }

        Err(ResultSinkError::SendFailed {
            attempts,
            message: last_error,
        })
    }

    async fn send(&self, payload: &[u8]) -> Result<(), ResultSinkError> {
        let mut conn = self.connection.lock().await;
        if conn.is_none() {
            *conn = Some(self.connect().await?);
        }
        let Some(stream) = conn.as_mut() else {
            return Ok(());
        };

        let written = async {
            stream.write_all(payload).await?;
            stream.flush().await
        }
        .await;

        if let Err(e) = written {
            // Drop the broken connection; the next attempt reconnects
            *conn = None;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ResultSink for LinePublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, report: &AnalysisReport) -> Result<DeliveryStats, ResultSinkError> {
        let parsed = report.documents();
        let mut payload = Vec::new();
        let mut stats = DeliveryStats {
            errors: parsed.malformed as u64,
            ..DeliveryStats::default()
        };

        for document in &parsed.documents {
            match serde_json::to_writer(&mut payload, document) {
                Ok(()) => {
                    payload.push(b'\n');
                    stats.delivered += 1;
                }
                Err(_) => stats.errors += 1,
            }
        }

        if !payload.is_empty() {
            self.send_with_retry(&payload).await?;
        }
        Ok(stats)
    }
}
