// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::error::{InsynctiveError, Result};

/// Write half of the bridge stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A command waiting for its response line.
struct PendingCommand {
    id: u64,
    command: String,
    responder: oneshot::Sender<String>,
}

/// Correlates outgoing commands with incoming response lines.
///
/// The bridge answers strictly in order, so pending commands form a FIFO
/// queue: the Nth response line resolves the Nth command sent. Enqueueing
/// and writing happen under the writer lock, which keeps queue order equal
/// to wire order.
pub struct CommandEngine {
    /// Stream writer; `None` while disconnected
    writer: Mutex<Option<BoxedWriter>>,
    /// Commands in send order
    pending: Mutex<VecDeque<PendingCommand>>,
    next_id: AtomicU64,
    terminator: String,
    command_timeout: Duration,
}

impl CommandEngine {
    pub fn new(terminator: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            terminator: terminator.into(),
            command_timeout,
        }
    }

    /// Install the writer of a freshly opened stream.
    pub async fn attach(&self, writer: BoxedWriter) {
        *self.writer.lock().await = Some(writer);
    }

    /// Remove the writer and fail every pending command.
    ///
    /// Callers waiting on a dropped command receive `Disconnected`.
    pub async fn detach(&self) -> Option<BoxedWriter> {
        let mut writer = self.writer.lock().await;
        let dropped = {
            let mut pending = self.pending.lock().await;
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            warn!("Dropped {} pending command(s) on disconnect", dropped);
        }
        writer.take()
    }

    /// Whether a writer is installed.
    pub async fn is_attached(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Number of commands still waiting for a response.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Send a command and wait for its response line.
    pub async fn send_command(&self, command: &str) -> Result<String> {
        if command.is_empty() {
            return Err(InsynctiveError::EmptyCommand);
        }

        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut writer = self.writer.lock().await;
            let Some(stream) = writer.as_mut() else {
                return Err(InsynctiveError::Disconnected);
            };

            self.pending.lock().await.push_back(PendingCommand {
                id,
                command: command.to_string(),
                responder: tx,
            });

            debug!("Send: {}", command);
            let line = format!("{}{}", command, self.terminator);
            let written = match stream.write_all(line.as_bytes()).await {
                Ok(()) => stream.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                error!("Failed to write command {}: {}", command, e);
                self.remove(id).await;
                return Err(InsynctiveError::Io(e));
            }
        }

        match timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(InsynctiveError::Disconnected),
            Err(_) => {
                self.remove(id).await;
                warn!("Command timeout: {}", command);
                Err(InsynctiveError::CommandTimeout {
                    command: command.to_string(),
                })
            }
        }
    }

    /// Resolve the oldest pending command with a response line.
    ///
    /// Returns false when no command was waiting.
    pub async fn resolve_next(&self, response: String) -> bool {
        let Some(pending) = self.pending.lock().await.pop_front() else {
            return false;
        };
        info!("Sent: {}, Received: {}", pending.command, response);
        if pending.responder.send(response).is_err() {
            debug!("Caller of {} stopped waiting", pending.command);
        }
        true
    }

    async fn remove(&self, id: u64) {
        self.pending.lock().await.retain(|p| p.id != id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;

    async fn engine_with_pipe() -> (Arc<CommandEngine>, BufReader<tokio::io::DuplexStream>) {
        let engine = Arc::new(CommandEngine::new("\r\n", Duration::from_secs(5)));
        let (client, server) = tokio::io::duplex(1024);
        engine.attach(Box::new(client)).await;
        (engine, BufReader::new(server))
    }

    async fn read_line(reader: &mut BufReader<tokio::io::DuplexStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn test_send_without_writer_fails_fast() {
        let engine = CommandEngine::new("\r\n", Duration::from_secs(5));
        let err = engine.send_command("?POINTCOUNT").await.unwrap_err();
        assert!(matches!(err, InsynctiveError::Disconnected));
        assert_eq!(engine.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let engine = CommandEngine::new("\r\n", Duration::from_secs(5));
        let err = engine.send_command("").await.unwrap_err();
        assert!(matches!(err, InsynctiveError::EmptyCommand));
    }

    #[tokio::test]
    async fn test_fifo_correlation() {
        let (engine, mut wire) = engine_with_pipe().await;

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send_command("?POINTDEVICE-001").await }
        });
        assert_eq!(read_line(&mut wire).await, "?POINTDEVICE-001\r\n");

        let second = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send_command("?POINTSTATUS-001").await }
        });
        assert_eq!(read_line(&mut wire).await, "?POINTSTATUS-001\r\n");
        assert_eq!(engine.pending_len().await, 2);

        assert!(engine.resolve_next("$01".to_string()).await);
        assert!(engine.resolve_next("$00".to_string()).await);

        assert_eq!(first.await.unwrap().unwrap(), "$01");
        assert_eq!(second.await.unwrap().unwrap(), "$00");
        assert!(!engine.resolve_next("stray".to_string()).await);
    }

    #[tokio::test]
    async fn test_timeout_drops_head() {
        let engine = Arc::new(CommandEngine::new("\r\n", Duration::from_millis(50)));
        let (client, _server) = tokio::io::duplex(1024);
        engine.attach(Box::new(client)).await;

        let err = engine.send_command("?POINTID-001").await.unwrap_err();
        assert!(matches!(err, InsynctiveError::CommandTimeout { ref command } if command == "?POINTID-001"));
        assert_eq!(engine.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_detach_fails_pending() {
        let (engine, mut wire) = engine_with_pipe().await;

        let waiting = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send_command("?BRIDGEINFO").await }
        });
        read_line(&mut wire).await;

        assert!(engine.detach().await.is_some());
        assert!(!engine.is_attached().await);
        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, InsynctiveError::Disconnected));
    }
}
