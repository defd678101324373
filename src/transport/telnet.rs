// MIT License - Copyright (c) 2026 Peter Wright
// Insynctive bridge client

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{InsynctiveError, Result};
use crate::event::{transport_channel, TransportEvent, TransportEventReceiver, TransportEventSender};
use crate::protocol::{split_lines, Line};
use crate::transport::command::CommandEngine;
use crate::transport::{ConnectionState, Transport};

/// Telnet-style TCP transport to the bridge.
///
/// One stream connection, one reader task. The reader frames incoming bytes
/// into lines, resolves pending commands with response lines and broadcasts
/// status notifications. When the stream closes without `disconnect()` having
/// been called, the same task runs the bounded reconnect policy.
pub struct TelnetTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: BridgeConfig,
    engine: CommandEngine,
    event_tx: TransportEventSender,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    reader_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    reconnects_left: AtomicU32,
    /// Set once the reconnect budget is spent, cleared by `connect()`
    unreachable: AtomicBool,
    /// Serializes connect/disconnect
    lifecycle: Mutex<()>,
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.event_tx.send(event);
    }

    fn take_reader_handle(&self) -> Option<JoinHandle<()>> {
        self.reader_handle.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Signal the reader task to stop and wait for it.
    async fn stop_reader(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.take_reader_handle() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Reader task ended abnormally: {}", e);
                }
            }
        }
    }

    async fn handle_line(&self, line: String) {
        match self.config.line_patterns.classify(&line) {
            Line::Notification(notification) => {
                debug!(
                    "Status change: device {} -> {}",
                    notification.device_id, notification.status_code
                );
                self.emit(TransportEvent::Notification(notification));
            }
            Line::Response(response) => {
                let response_for_log = response.clone();
                if !self.engine.resolve_next(response).await {
                    warn!("Response with no pending command: {}", response_for_log);
                }
            }
            Line::Unrecognized(line) => {
                warn!("Dropping unrecognized line: {:?}", line);
            }
        }
    }
}

impl TelnetTransport {
    /// Create a transport for `config`.
    ///
    /// Fails with `InvalidHost` before any I/O if the host is not an IPv4
    /// literal.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;

        let (event_tx, _) = transport_channel(config.event_capacity);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let engine = CommandEngine::new(config.line_terminator.clone(), config.command_timeout);
        let reconnects_left = AtomicU32::new(config.reconnect_attempts);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                engine,
                event_tx,
                state_tx,
                shutdown_tx,
                reader_handle: std::sync::Mutex::new(None),
                reconnects_left,
                unreachable: AtomicBool::new(false),
                lifecycle: Mutex::new(()),
            }),
        })
    }

    /// The configuration this transport was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Commands still waiting for a response.
    pub async fn pending_commands(&self) -> usize {
        self.inner.engine.pending_len().await
    }
}

impl Transport for TelnetTransport {
    async fn connect(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        // A reader left over from a lost connection may still be reconnecting
        self.inner.stop_reader().await;

        self.inner.shutdown_tx.send_replace(false);
        self.inner.set_state(ConnectionState::Connecting);

        let stream = match open_stream(&self.inner.config).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to connect to the bridge: {}", e);
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let (reader, writer) = stream.into_split();
        self.inner.engine.attach(Box::new(writer)).await;
        self.inner
            .reconnects_left
            .store(self.inner.config.reconnect_attempts, Ordering::SeqCst);
        self.inner.unreachable.store(false, Ordering::SeqCst);

        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = spawn_reader_task(self.inner.clone(), reader, shutdown_rx);
        if let Ok(mut slot) = self.inner.reader_handle.lock() {
            *slot = Some(handle);
        }

        self.inner.set_state(ConnectionState::Connected);
        info!("Connected to the bridge on {}", self.inner.config.host);
        self.inner.emit(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.stop_reader().await;

        let Some(mut writer) = self.inner.engine.detach().await else {
            self.inner.set_state(ConnectionState::Disconnected);
            return Ok(());
        };

        if let Err(e) = writer.shutdown().await {
            warn!("Failure to disconnect from the bridge: {}", e);
        }
        self.inner.set_state(ConnectionState::Disconnected);
        info!("Disconnected from the bridge on {}", self.inner.config.host);
        self.inner.emit(TransportEvent::Disconnected);
        Ok(())
    }

    async fn send_command(&self, command: &str) -> Result<String> {
        if !self.is_connected() {
            if self.inner.unreachable.load(Ordering::SeqCst) {
                return Err(InsynctiveError::Unreachable {
                    attempts: self.inner.config.reconnect_attempts,
                });
            }
            return Err(InsynctiveError::Disconnected);
        }
        self.inner.engine.send_command(command).await
    }

    fn subscribe(&self) -> TransportEventReceiver {
        self.inner.event_tx.subscribe()
    }

    fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }
}

impl Drop for TelnetTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.take_reader_handle() {
            handle.abort();
        }
    }
}

/// Open the TCP stream within the configured connect timeout.
async fn open_stream(config: &BridgeConfig) -> Result<TcpStream> {
    debug!("Opening stream to {}", config.address());
    let stream = timeout(config.connect_timeout, TcpStream::connect(config.address()))
        .await
        .map_err(|_| InsynctiveError::ConnectionTimeout)??;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY: {}", e);
    }
    Ok(stream)
}

/// Spawn the task that reads from the bridge and supervises reconnects.
fn spawn_reader_task(
    inner: Arc<Inner>,
    reader: OwnedReadHalf,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = reader;
        loop {
            read_until_closed(&inner, &mut reader, &mut shutdown_rx).await;
            if *shutdown_rx.borrow() {
                debug!("Reader: shutdown requested");
                break;
            }

            error!("Connection to the bridge was closed!");
            inner.engine.detach().await;
            inner.set_state(ConnectionState::Disconnected);
            inner.emit(TransportEvent::Disconnected);

            match reconnect(&inner, &mut shutdown_rx).await {
                Some(new_reader) => reader = new_reader,
                None => break,
            }
        }
    })
}

/// Read and dispatch lines until the stream closes or shutdown is signalled.
async fn read_until_closed(
    inner: &Inner,
    reader: &mut OwnedReadHalf,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 4096];
    let mut leftover = Vec::new();

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        tokio::select! {
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    debug!("Reader: connection closed");
                    return;
                }
                Ok(n) => {
                    let mut data = std::mem::take(&mut leftover);
                    data.extend_from_slice(&buf[..n]);
                    for line in split_lines(&data, &mut leftover, &inner.config.line_patterns) {
                        inner.handle_line(line).await;
                    }
                }
                Err(e) => {
                    error!("Reader: read error: {}", e);
                    return;
                }
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

/// Bounded reconnect: one attempt per fixed backoff interval until the
/// budget runs out. Returns the new reader on success.
async fn reconnect(
    inner: &Inner,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Option<OwnedReadHalf> {
    let max = inner.config.reconnect_attempts;

    loop {
        let left = inner.reconnects_left.load(Ordering::SeqCst);
        if left == 0 {
            error!(
                "Bridge at {} unreachable after {} reconnect attempt(s)",
                inner.config.address(),
                max
            );
            inner.unreachable.store(true, Ordering::SeqCst);
            inner.set_state(ConnectionState::Disconnected);
            inner.emit(TransportEvent::Unreachable);
            return None;
        }
        inner.reconnects_left.store(left - 1, Ordering::SeqCst);
        let attempt = max.saturating_sub(left) + 1;

        inner.set_state(ConnectionState::Reconnecting);
        inner.emit(TransportEvent::Reconnecting { attempt, max });
        warn!(
            "Reconnecting to the bridge in {:?} (attempt {}/{})",
            inner.config.reconnect_delay, attempt, max
        );

        tokio::select! {
            _ = sleep(inner.config.reconnect_delay) => {}
            _ = shutdown_rx.changed() => {}
        }
        if *shutdown_rx.borrow() {
            return None;
        }

        match open_stream(&inner.config).await {
            Ok(stream) => {
                if *shutdown_rx.borrow() {
                    return None;
                }
                let (reader, writer) = stream.into_split();
                inner.engine.attach(Box::new(writer)).await;
                inner.set_state(ConnectionState::Connected);
                info!("Reconnected to the bridge on {}", inner.config.host);
                inner.emit(TransportEvent::Connected);
                return Some(reader);
            }
            Err(e) => warn!("Reconnect attempt {} failed: {}", attempt, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_host() {
        let err = TelnetTransport::new(BridgeConfig::for_host("999.1.1.1")).err();
        assert!(matches!(err, Some(InsynctiveError::InvalidHost { .. })));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails_locally() {
        let transport = TelnetTransport::new(BridgeConfig::for_host("127.0.0.1")).unwrap();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        let err = transport.send_command("?POINTCOUNT").await.unwrap_err();
        assert!(matches!(err, InsynctiveError::Disconnected));
        assert_eq!(transport.pending_commands().await, 0);
    }

    #[tokio::test]
    async fn test_connect_and_round_trip() {
        use tokio::io::{AsyncBufReadExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let command = lines.next_line().await.unwrap().unwrap();
            writer
                .write_all(b"POINTSTATUS-3,$01\r\nCount: 5\r\n")
                .await
                .unwrap();
            (command, writer, lines)
        });

        let config = BridgeConfig::builder().host("127.0.0.1").port(port).build();
        let transport = TelnetTransport::new(config).unwrap();
        let state = transport.watch_state();
        let mut events = transport.subscribe();

        transport.connect().await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Connected);
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Connected);

        assert_eq!(transport.send_command("?POINTCOUNT").await.unwrap(), "Count: 5");
        // Keep the server side open so the reader does not see a close
        let (command, _writer, _lines) = server.await.unwrap();
        assert_eq!(command, "?POINTCOUNT");
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Notification(crate::event::NotificationEvent {
                device_id: 3,
                status_code: "01".to_string(),
            })
        );

        transport.disconnect().await.unwrap();
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected_is_noop() {
        let transport = TelnetTransport::new(BridgeConfig::for_host("127.0.0.1")).unwrap();
        let mut events = transport.subscribe();
        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(events.try_recv().is_err());
    }
}
