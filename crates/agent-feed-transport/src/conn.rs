//! Reconnecting WebSocket connection to the event gateway.

use std::{sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite, tungstenite::Message,
};

use crate::protocol::ClientFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default delay between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default budget of consecutive failed connect attempts.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Connection lifecycle state.
///
/// Written only by the connection driver; everyone else observes it
/// through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no reconnection in progress.
    Disconnected,
    /// First connect attempt in progress.
    Connecting,
    /// Live connection, subscriptions replayed.
    Connected,
    /// Connection lost, automatic reconnection in progress.
    Reconnecting,
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8504/ws".to_string(),
            reconnect_delay: RECONNECT_DELAY,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Source of subscription frames to replay on every successful connect.
///
/// The gateway holds no subscription state across connection loss, so the
/// driver asks this source for the full active set each time a socket
/// comes up, and sends it before the connection is reported as Connected.
pub trait SubscriptionReplay: Send + Sync {
    /// Frames to send immediately after the handshake.
    fn frames(&self) -> Vec<ClientFrame>;
}

/// Transport error.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Transport closed")]
    Closed,
}

enum Command {
    Connect,
    Disconnect,
    Send(ClientFrame, oneshot::Sender<Result<(), TransportError>>),
}

enum ServeExit {
    /// Connection dropped unexpectedly; reconnect.
    Lost,
    /// Explicit disconnect; stay down until the next connect call.
    Disconnect,
    /// Handle dropped; stop the driver.
    Shutdown,
}

enum BackoffExit {
    Retry,
    Disconnect,
    Shutdown,
}

/// Handle to a spawned connection driver.
///
/// One socket per consumer session; created and torn down by the
/// session's lifecycle, never shared across sessions. Dropping the handle
/// stops the driver.
pub struct EventSocket {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl EventSocket {
    /// Spawn the connection driver.
    ///
    /// Inbound text frames are forwarded raw to `inbound_tx` in receipt
    /// order; `replay` is consulted on every successful connect.
    #[must_use]
    pub fn spawn(
        config: TransportConfig,
        replay: Arc<dyn SubscriptionReplay>,
        inbound_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        tokio::spawn(drive(config, replay, inbound_tx, cmd_rx, state_tx));

        Self { cmd_tx, state_rx }
    }

    /// Request a connection.
    ///
    /// Idempotent: a no-op while already connected or (re)connecting.
    /// Dial failures are absorbed by the reconnect policy rather than
    /// surfaced here.
    pub fn connect(&self) {
        let _ = self.cmd_tx.send(Command::Connect);
    }

    /// Disconnect and suppress automatic reconnection until the next
    /// `connect` call. Interrupts any backoff wait in progress.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    /// Send an outbound frame.
    ///
    /// Commands are processed on the driver's single queue, so a send
    /// enqueued while subscription replay is in flight goes out right
    /// after the replay instead of being dropped.
    ///
    /// # Errors
    /// Returns `NotConnected` if the driver has no live socket when it
    /// processes the command, `SendFailed` if the write itself fails, and
    /// `Closed` if the driver is gone.
    pub async fn send(&self, frame: ClientFrame) -> Result<(), TransportError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send(frame, ack_tx))
            .map_err(|_| TransportError::Closed)?;
        ack_rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Whether the connection is currently live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

async fn drive(
    config: TransportConfig,
    replay: Arc<dyn SubscriptionReplay>,
    inbound_tx: mpsc::UnboundedSender<String>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
) {
    'idle: loop {
        // Down until explicitly asked to connect.
        loop {
            match cmd_rx.recv().await {
                None => return,
                Some(Command::Connect) => break,
                Some(Command::Disconnect) => {}
                Some(Command::Send(_, ack)) => {
                    let _ = ack.send(Err(TransportError::NotConnected));
                }
            }
        }
        state_tx.send_replace(ConnectionState::Connecting);

        let mut attempts_left = config.max_reconnect_attempts;
        loop {
            match open(&config, replay.as_ref()).await {
                Ok(mut ws) => {
                    attempts_left = config.max_reconnect_attempts;
                    state_tx.send_replace(ConnectionState::Connected);
                    tracing::info!(url = %config.url, "event stream connected");

                    let exit = serve(&mut ws, &inbound_tx, &mut cmd_rx).await;
                    let _ = ws.close(None).await;
                    match exit {
                        ServeExit::Lost => {
                            tracing::info!("event stream lost, reconnecting");
                            state_tx.send_replace(ConnectionState::Reconnecting);
                        }
                        ServeExit::Disconnect => {
                            state_tx.send_replace(ConnectionState::Disconnected);
                            continue 'idle;
                        }
                        ServeExit::Shutdown => {
                            state_tx.send_replace(ConnectionState::Disconnected);
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "connect attempt failed");
                    state_tx.send_replace(ConnectionState::Reconnecting);
                    attempts_left = attempts_left.saturating_sub(1);
                    if attempts_left == 0 {
                        tracing::warn!(
                            url = %config.url,
                            attempts = config.max_reconnect_attempts,
                            "retry budget exhausted, giving up"
                        );
                        state_tx.send_replace(ConnectionState::Disconnected);
                        continue 'idle;
                    }
                }
            }

            match backoff(config.reconnect_delay, &mut cmd_rx).await {
                BackoffExit::Retry => {}
                BackoffExit::Disconnect => {
                    state_tx.send_replace(ConnectionState::Disconnected);
                    continue 'idle;
                }
                BackoffExit::Shutdown => {
                    state_tx.send_replace(ConnectionState::Disconnected);
                    return;
                }
            }
        }
    }
}

/// Dial the gateway and replay active subscriptions before anything else
/// touches the socket.
async fn open(
    config: &TransportConfig,
    replay: &dyn SubscriptionReplay,
) -> Result<WsStream, tungstenite::Error> {
    let (mut ws, _response) = connect_async(config.url.as_str()).await?;

    let frames = replay.frames();
    if !frames.is_empty() {
        tracing::debug!(count = frames.len(), "replaying subscriptions");
    }
    for frame in frames {
        let json = serde_json::to_string(&frame)
            .map_err(|e| tungstenite::Error::Io(std::io::Error::other(e)))?;
        ws.send(Message::Text(json.into())).await?;
    }

    Ok(ws)
}

async fn serve(
    ws: &mut WsStream,
    inbound_tx: &mpsc::UnboundedSender<String>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> ServeExit {
    loop {
        tokio::select! {
            inbound = ws.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if inbound_tx.send(text.to_string()).is_err() {
                        return ServeExit::Shutdown;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        if inbound_tx.send(text).is_err() {
                            return ServeExit::Shutdown;
                        }
                    }
                    Err(_) => tracing::debug!("ignoring non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => return ServeExit::Lost,
                Some(Ok(_)) => {} // ping/pong handled by the protocol layer
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "websocket error");
                    return ServeExit::Lost;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                None => return ServeExit::Shutdown,
                Some(Command::Connect) => {} // already connected
                Some(Command::Disconnect) => return ServeExit::Disconnect,
                Some(Command::Send(frame, ack)) => {
                    let json = match serde_json::to_string(&frame) {
                        Ok(j) => j,
                        Err(e) => {
                            let _ = ack.send(Err(TransportError::SendFailed(e.to_string())));
                            continue;
                        }
                    };
                    match ws.send(Message::Text(json.into())).await {
                        Ok(()) => {
                            let _ = ack.send(Ok(()));
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "send failed, reconnecting");
                            let _ = ack.send(Err(TransportError::SendFailed(e.to_string())));
                            return ServeExit::Lost;
                        }
                    }
                }
            },
        }
    }
}

/// Scheduled wait before the next attempt. Commands keep being processed:
/// a disconnect aborts the cycle and sends are refused, not queued.
async fn backoff(delay: Duration, cmd_rx: &mut mpsc::UnboundedReceiver<Command>) -> BackoffExit {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return BackoffExit::Retry,
            cmd = cmd_rx.recv() => match cmd {
                None => return BackoffExit::Shutdown,
                Some(Command::Connect) => {} // already reconnecting
                Some(Command::Disconnect) => return BackoffExit::Disconnect,
                Some(Command::Send(_, ack)) => {
                    let _ = ack.send(Err(TransportError::NotConnected));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const SHORT: Duration = Duration::from_millis(50);
    const WAIT: Duration = Duration::from_secs(5);

    struct StaticReplay(Vec<ClientFrame>);

    impl SubscriptionReplay for StaticReplay {
        fn frames(&self) -> Vec<ClientFrame> {
            self.0.clone()
        }
    }

    struct TestConn {
        from_client: mpsc::UnboundedReceiver<String>,
        to_client: mpsc::UnboundedSender<String>,
        _shutdown: oneshot::Sender<()>,
    }

    /// Accepts connections and exposes each as a channel pair. Dropping a
    /// `TestConn` closes that connection from the server side.
    async fn spawn_server() -> (String, mpsc::UnboundedReceiver<TestConn>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (from_tx, from_rx) = mpsc::unbounded_channel();
                let (to_tx, mut to_rx) = mpsc::unbounded_channel::<String>();
                let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
                if conn_tx
                    .send(TestConn {
                        from_client: from_rx,
                        to_client: to_tx,
                        _shutdown: shutdown_tx,
                    })
                    .is_err()
                {
                    return;
                }
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = ws.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = from_tx.send(text.to_string());
                                }
                                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                Some(Ok(_)) => {}
                            },
                            out = to_rx.recv() => match out {
                                Some(text) => {
                                    if ws.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                            _ = &mut shutdown_rx => {
                                let _ = ws.close(None).await;
                                break;
                            }
                        }
                    }
                });
            }
        });

        (format!("ws://{addr}"), conn_rx)
    }

    fn test_config(url: String) -> TransportConfig {
        TransportConfig {
            url,
            reconnect_delay: SHORT,
            max_reconnect_attempts: 3,
        }
    }

    async fn wait_for_state(socket: &EventSocket, wanted: ConnectionState) {
        let mut rx = socket.watch();
        timeout(WAIT, async {
            while *rx.borrow() != wanted {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_send_fails_when_disconnected() {
        let (url, _conns) = spawn_server().await;
        let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
        let socket = EventSocket::spawn(
            test_config(url),
            Arc::new(StaticReplay(Vec::new())),
            inbound_tx,
        );

        let result = socket.send(ClientFrame::Ping).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert_eq!(socket.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_replays_subscriptions_before_live() {
        let (url, mut conns) = spawn_server().await;
        let replay = Arc::new(StaticReplay(vec![
            ClientFrame::SubscribeAgent {
                agent_id: "alpha".to_string(),
            },
            ClientFrame::SubscribeAgent {
                agent_id: "beta".to_string(),
            },
        ]));
        let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
        let socket = EventSocket::spawn(test_config(url), replay, inbound_tx);

        socket.connect();
        let mut conn = timeout(WAIT, conns.recv()).await.unwrap().unwrap();

        let first = timeout(WAIT, conn.from_client.recv()).await.unwrap().unwrap();
        assert!(first.contains("subscribe_agent") && first.contains("alpha"));
        let second = timeout(WAIT, conn.from_client.recv()).await.unwrap().unwrap();
        assert!(second.contains("subscribe_agent") && second.contains("beta"));

        wait_for_state(&socket, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (url, mut conns) = spawn_server().await;
        let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
        let socket = EventSocket::spawn(
            test_config(url),
            Arc::new(StaticReplay(Vec::new())),
            inbound_tx,
        );

        socket.connect();
        socket.connect();
        wait_for_state(&socket, ConnectionState::Connected).await;
        socket.connect();

        let _first = timeout(WAIT, conns.recv()).await.unwrap().unwrap();
        assert!(
            timeout(Duration::from_millis(300), conns.recv())
                .await
                .is_err(),
            "extra connect calls must not open extra connections"
        );
    }

    #[tokio::test]
    async fn test_inbound_frames_forwarded_in_order() {
        let (url, mut conns) = spawn_server().await;
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let socket = EventSocket::spawn(
            test_config(url),
            Arc::new(StaticReplay(Vec::new())),
            inbound_tx,
        );

        socket.connect();
        let conn = timeout(WAIT, conns.recv()).await.unwrap().unwrap();
        wait_for_state(&socket, ConnectionState::Connected).await;

        for n in 0..5 {
            conn.to_client.send(format!("frame-{n}")).unwrap();
        }
        for n in 0..5 {
            let raw = timeout(WAIT, inbound_rx.recv()).await.unwrap().unwrap();
            assert_eq!(raw, format!("frame-{n}"));
        }
    }

    #[tokio::test]
    async fn test_reconnect_replays_exactly_once() {
        let (url, mut conns) = spawn_server().await;
        let replay = Arc::new(StaticReplay(vec![ClientFrame::SubscribeAgent {
            agent_id: "alpha".to_string(),
        }]));
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let socket = EventSocket::spawn(test_config(url), replay, inbound_tx);

        socket.connect();
        let mut first = timeout(WAIT, conns.recv()).await.unwrap().unwrap();
        let frame = timeout(WAIT, first.from_client.recv()).await.unwrap().unwrap();
        assert!(frame.contains("subscribe_agent"));
        wait_for_state(&socket, ConnectionState::Connected).await;

        // Server-side drop forces an unexpected disconnect.
        drop(first);

        let mut second = timeout(WAIT, conns.recv()).await.unwrap().unwrap();
        let replayed = timeout(WAIT, second.from_client.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(replayed.contains("subscribe_agent") && replayed.contains("alpha"));

        // Exactly once: nothing else is pending on the new connection.
        assert!(
            timeout(Duration::from_millis(300), second.from_client.recv())
                .await
                .is_err()
        );

        // Events still flow after the replay.
        wait_for_state(&socket, ConnectionState::Connected).await;
        second.to_client.send("post-reconnect".to_string()).unwrap();
        let raw = timeout(WAIT, inbound_rx.recv()).await.unwrap().unwrap();
        assert_eq!(raw, "post-reconnect");
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_reports_disconnected_once() {
        // Reserve a port with nothing listening on it.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
        let socket = EventSocket::spawn(
            TransportConfig {
                url: format!("ws://{addr}"),
                reconnect_delay: Duration::from_millis(20),
                max_reconnect_attempts: 3,
            },
            Arc::new(StaticReplay(Vec::new())),
            inbound_tx,
        );

        let mut rx = socket.watch();
        socket.connect();

        // The dial cycle starts (any state publication counts), then ends
        // back at Disconnected once the budget is spent.
        timeout(WAIT, rx.changed()).await.unwrap().unwrap();
        timeout(WAIT, async {
            while *rx.borrow_and_update() != ConnectionState::Disconnected {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        // Budget exhausted: no further attempts, state stays put.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(socket.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_suppresses_reconnection() {
        let (url, mut conns) = spawn_server().await;
        let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
        let socket = EventSocket::spawn(
            test_config(url),
            Arc::new(StaticReplay(Vec::new())),
            inbound_tx,
        );

        socket.connect();
        let _conn = timeout(WAIT, conns.recv()).await.unwrap().unwrap();
        wait_for_state(&socket, ConnectionState::Connected).await;

        socket.disconnect();
        wait_for_state(&socket, ConnectionState::Disconnected).await;

        assert!(
            timeout(Duration::from_millis(300), conns.recv())
                .await
                .is_err(),
            "disconnect must suppress automatic reconnection"
        );
    }
}
