// ====
// Hyperliquid WebSocket Supervisor
// ====
// One task owns the socket, the subscription set and the outage buffer.
// The handle talks to it over a command channel; timers post ticks into
// the same channel. Validated frames leave through a single event channel.
// ====

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{
    parse_frame, ping_frame, subscribe_frame, unsubscribe_frame, Inbound, StreamEvent, Subscription,
};
use super::state::{BackoffPolicy, ConnectionState, FailureOutcome, SupervisorCore};
use crate::exchange::errors::ExchangeError;
use crate::exchange::signing::Network;
use crate::runtime::TimerRegistry;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_SUPERVISOR_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub url: String,
    /// Ping period once Open
    pub heartbeat_interval: Duration,
    /// Silence after which the socket is considered dead; also bounds the
    /// opening handshake
    pub heartbeat_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub buffer_capacity: usize,
    /// Spacing between replayed subscribe frames
    pub replay_interval: Duration,
}

impl SupervisorConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            url: network.ws_url().to_string(),
            heartbeat_interval: Duration::from_millis(15_000),
            heartbeat_timeout: Duration::from_millis(45_000),
            backoff: BackoffPolicy::default(),
            buffer_capacity: 100,
            replay_interval: Duration::from_millis(200),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::for_network(Network::Testnet)
    }
}

enum Command {
    Connect(oneshot::Sender<Result<(), ExchangeError>>),
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    Disconnect(oneshot::Sender<()>),
    HeartbeatTick,
    ReconnectDue,
}

enum SessionEnd {
    Lost(String),
    Deliberate,
    Shutdown,
}

/// Handle to a running supervisor. Dropping it stops the supervisor task.
pub struct ConnectionSupervisor {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionSupervisor {
    /// Starts the supervisor task in Idle state. Validated payloads and the
    /// terminal `Fatal` event arrive on the returned receiver.
    pub fn spawn(
        config: SupervisorConfig,
        timers: TimerRegistry,
    ) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let id = NEXT_SUPERVISOR_ID.fetch_add(1, Ordering::Relaxed);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let driver = Driver {
            id,
            core: SupervisorCore::new(config.backoff, config.buffer_capacity),
            heartbeat_timer: format!("ws-supervisor-{}:heartbeat", id),
            reconnect_timer: format!("ws-supervisor-{}:reconnect", id),
            config,
            timers,
            commands: commands_rx,
            ticks: commands_tx.downgrade(),
            events: events_tx,
            state: state_tx,
            subscriptions: Vec::new(),
            waiters: Vec::new(),
            last_pong: Instant::now(),
        };
        tokio::spawn(driver.run());

        (
            Self {
                id,
                commands: commands_tx,
                state: state_rx,
            },
            events_rx,
        )
    }

    /// Connects (or joins an ongoing connection attempt) and resolves once
    /// the stream is Open with all subscriptions replayed.
    pub async fn connect(&self) -> Result<(), ExchangeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Connect(tx))?;
        rx.await.map_err(|_| ExchangeError::Disconnected)?
    }

    /// Registers a feed; sent right away when Open, otherwise on the next
    /// (re)connect. Registering the same feed twice has no effect.
    pub fn subscribe(&self, subscription: Subscription) -> Result<(), ExchangeError> {
        self.send(Command::Subscribe(subscription))
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> Result<(), ExchangeError> {
        self.send(Command::Unsubscribe(subscription))
    }

    /// Closes the stream and disables reconnects. Safe to call repeatedly
    /// and while a connect is in flight.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn send(&self, command: Command) -> Result<(), ExchangeError> {
        self.commands
            .send(command)
            .map_err(|_| ExchangeError::Disconnected)
    }
}

struct Driver {
    id: u64,
    config: SupervisorConfig,
    core: SupervisorCore,
    timers: TimerRegistry,
    heartbeat_timer: String,
    reconnect_timer: String,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Weak so that timers never keep the supervisor alive
    ticks: mpsc::WeakUnboundedSender<Command>,
    events: mpsc::UnboundedSender<StreamEvent>,
    state: watch::Sender<ConnectionState>,
    /// Registration order is replay order
    subscriptions: Vec<Subscription>,
    waiters: Vec<oneshot::Sender<Result<(), ExchangeError>>>,
    last_pong: Instant,
}

impl Driver {
    async fn run(mut self) {
        debug!(supervisor = self.id, url = %self.config.url, "Supervisor started");

        loop {
            let keep_running = match self.core.state() {
                ConnectionState::Connecting => self.connect_and_serve().await,
                _ => match self.commands.recv().await {
                    Some(command) => {
                        self.handle_offline(command);
                        true
                    }
                    None => false,
                },
            };
            if !keep_running {
                break;
            }
        }

        self.timers.clear(&self.heartbeat_timer);
        self.timers.clear(&self.reconnect_timer);
        self.fail_waiters(|| ExchangeError::Disconnected);
        debug!(supervisor = self.id, "Supervisor stopped");
    }

    /// Commands while there is no socket (Idle, ReconnectScheduled, Fatal)
    fn handle_offline(&mut self, command: Command) {
        match command {
            Command::Connect(tx) => {
                if self.core.start() {
                    self.publish();
                }
                self.waiters.push(tx);
            }
            Command::Subscribe(subscription) => {
                self.register(subscription);
            }
            Command::Unsubscribe(subscription) => {
                self.unregister(&subscription);
            }
            Command::Disconnect(ack) => {
                self.stop();
                let _ = ack.send(());
            }
            Command::ReconnectDue => {
                if self.core.reconnect_due() {
                    self.publish();
                }
            }
            Command::HeartbeatTick => {}
        }
    }

    /// Returns false once every handle is gone
    async fn connect_and_serve(&mut self) -> bool {
        debug!(supervisor = self.id, attempt = self.core.attempts(), "Connecting");
        let handshake = tokio::time::timeout(
            self.config.heartbeat_timeout,
            connect_async(self.config.url.clone()),
        );
        tokio::pin!(handshake);

        let ws = loop {
            tokio::select! {
                result = &mut handshake => match result {
                    Ok(Ok((ws, _response))) => break ws,
                    Ok(Err(e)) => {
                        self.on_failure(&format!("handshake failed: {}", e));
                        return true;
                    }
                    Err(_) => {
                        self.on_failure("handshake timed out");
                        return true;
                    }
                },
                command = self.commands.recv() => match command {
                    None => return false,
                    Some(Command::Disconnect(ack)) => {
                        info!(supervisor = self.id, "Connect attempt cancelled by disconnect");
                        self.stop();
                        let _ = ack.send(());
                        return true;
                    }
                    Some(Command::Connect(tx)) => self.waiters.push(tx),
                    Some(Command::Subscribe(subscription)) => {
                        self.register(subscription);
                    }
                    Some(Command::Unsubscribe(subscription)) => {
                        self.unregister(&subscription);
                    }
                    Some(Command::HeartbeatTick) | Some(Command::ReconnectDue) => {}
                },
            }
        };

        self.serve(ws).await
    }

    async fn serve(&mut self, ws: WsStream) -> bool {
        self.core.handshake_succeeded();
        info!(
            supervisor = self.id,
            subscriptions = self.subscriptions.len(),
            "Handshake complete"
        );

        let (mut sink, mut stream) = ws.split();
        let mut replay: VecDeque<Subscription> = self.subscriptions.iter().cloned().collect();
        // Feeds the server has seen a subscribe frame for on this socket
        let mut sent: Vec<Subscription> = Vec::new();
        let replay_timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(replay_timer);

        self.last_pong = Instant::now();
        self.start_heartbeat();
        if replay.is_empty() {
            self.open();
        }

        let end = loop {
            tokio::select! {
                _ = &mut replay_timer, if !replay.is_empty() => {
                    if let Some(subscription) = replay.pop_front() {
                        debug!(supervisor = self.id, %subscription, "Replaying subscription");
                        if let Err(e) = sink.send(Message::Text(subscribe_frame(&subscription))).await {
                            break SessionEnd::Lost(format!("send failed: {}", e));
                        }
                        sent.push(subscription);
                    }
                    if replay.is_empty() {
                        self.open();
                    } else {
                        replay_timer.as_mut().reset(Instant::now() + self.config.replay_interval);
                    }
                }

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => self.handle_text(&text),
                        Err(_) => warn!(supervisor = self.id, "Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = sink.send(Message::Pong(payload)).await {
                            break SessionEnd::Lost(format!("pong failed: {}", e));
                        }
                    }
                    Some(Ok(Message::Pong(_))) => self.last_pong = Instant::now(),
                    Some(Ok(Message::Close(frame))) => {
                        break SessionEnd::Lost(format!("closed by server: {:?}", frame));
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => break SessionEnd::Lost(e.to_string()),
                    None => break SessionEnd::Lost("stream ended".to_string()),
                },

                command = self.commands.recv() => match command {
                    None => break SessionEnd::Shutdown,
                    Some(Command::Disconnect(ack)) => {
                        self.core.begin_closing();
                        self.publish();
                        let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await;
                        self.stop();
                        let _ = ack.send(());
                        break SessionEnd::Deliberate;
                    }
                    Some(Command::Connect(tx)) => {
                        if self.core.state() == ConnectionState::Open {
                            let _ = tx.send(Ok(()));
                        } else {
                            self.waiters.push(tx);
                        }
                    }
                    Some(Command::Subscribe(subscription)) => {
                        if self.register(subscription.clone()) {
                            if self.core.state() == ConnectionState::Open {
                                if let Err(e) = sink.send(Message::Text(subscribe_frame(&subscription))).await {
                                    break SessionEnd::Lost(format!("send failed: {}", e));
                                }
                                sent.push(subscription);
                            } else {
                                replay.push_back(subscription);
                            }
                        }
                    }
                    Some(Command::Unsubscribe(subscription)) => {
                        if self.unregister(&subscription) {
                            // Already replayed feeds need an explicit unsubscribe,
                            // even while the rest of the replay is pending
                            if let Some(pos) = sent.iter().position(|s| s == &subscription) {
                                sent.remove(pos);
                                if let Err(e) = sink.send(Message::Text(unsubscribe_frame(&subscription))).await {
                                    break SessionEnd::Lost(format!("send failed: {}", e));
                                }
                            }
                            if self.core.state() != ConnectionState::Open {
                                replay.retain(|s| s != &subscription);
                                if replay.is_empty() {
                                    self.open();
                                }
                            }
                        }
                    }
                    Some(Command::HeartbeatTick) => {
                        let silent = self.last_pong.elapsed();
                        if silent > self.config.heartbeat_timeout {
                            warn!(
                                supervisor = self.id,
                                silent_ms = silent.as_millis() as u64,
                                "Heartbeat timeout, forcing reconnect"
                            );
                            break SessionEnd::Lost("heartbeat timeout".to_string());
                        }
                        if let Err(e) = sink.send(Message::Text(ping_frame())).await {
                            break SessionEnd::Lost(format!("ping failed: {}", e));
                        }
                    }
                    Some(Command::ReconnectDue) => {}
                },
            }
        };

        self.timers.clear(&self.heartbeat_timer);
        match end {
            SessionEnd::Lost(reason) => {
                self.core.begin_closing();
                self.publish();
                warn!(supervisor = self.id, reason = %reason, "Connection lost");
                self.on_failure(&reason);
                true
            }
            SessionEnd::Deliberate => true,
            SessionEnd::Shutdown => false,
        }
    }

    fn handle_text(&mut self, text: &str) {
        match parse_frame(text) {
            Ok(Inbound::Event(event)) => {
                if let Some(event) = self.core.accept(event) {
                    self.emit(event);
                }
            }
            Ok(Inbound::Pong) => self.last_pong = Instant::now(),
            Ok(Inbound::Ack(data)) => debug!(supervisor = self.id, %data, "Subscription acknowledged"),
            Ok(Inbound::Unknown(channel)) => {
                debug!(supervisor = self.id, channel = %channel, "Ignoring unhandled channel")
            }
            Err(e) => warn!(supervisor = self.id, error = %e, "Dropping invalid frame"),
        }
    }

    /// Open: flush the buffer, then release connect() callers
    fn open(&mut self) {
        let buffered = self.core.open();
        self.publish();
        if !buffered.is_empty() {
            debug!(supervisor = self.id, count = buffered.len(), "Flushing buffered messages");
        }
        for event in buffered {
            self.emit(event);
        }
        info!(supervisor = self.id, "Stream open");
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn on_failure(&mut self, reason: &str) {
        self.timers.clear(&self.heartbeat_timer);

        match self.core.fail() {
            FailureOutcome::Reconnect { delay, attempt } => {
                warn!(
                    supervisor = self.id,
                    attempt,
                    max_attempts = self.config.backoff.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    reason,
                    "Scheduling reconnect"
                );
                let ticks = self.ticks.clone();
                let scheduled = self.timers.set_timeout(&self.reconnect_timer, delay, move || async move {
                    if let Some(tx) = ticks.upgrade() {
                        let _ = tx.send(Command::ReconnectDue);
                    }
                    Ok(())
                });
                if scheduled {
                    self.publish();
                } else {
                    error!(supervisor = self.id, "Timer registry unavailable, giving up on reconnect");
                    self.stop();
                }
            }
            FailureOutcome::Fatal { attempts } => {
                error!(supervisor = self.id, attempts, reason, "Reconnect attempts exhausted");
                self.publish();
                self.emit(StreamEvent::Fatal { attempts });
                self.fail_waiters(|| ExchangeError::ConnectionFatal { attempts });
            }
        }
    }

    fn start_heartbeat(&self) {
        let ticks = self.ticks.clone();
        self.timers.set_interval(&self.heartbeat_timer, self.config.heartbeat_interval, move || {
            let ticks = ticks.clone();
            async move {
                if let Some(tx) = ticks.upgrade() {
                    let _ = tx.send(Command::HeartbeatTick);
                }
                Ok(())
            }
        });
    }

    /// Deliberate stop: back to Idle, pending connects fail
    fn stop(&mut self) {
        self.timers.clear(&self.heartbeat_timer);
        self.timers.clear(&self.reconnect_timer);
        self.core.stop();
        self.publish();
        self.fail_waiters(|| ExchangeError::Disconnected);
    }

    fn register(&mut self, subscription: Subscription) -> bool {
        if self.subscriptions.contains(&subscription) {
            debug!(supervisor = self.id, %subscription, "Already subscribed");
            return false;
        }
        debug!(supervisor = self.id, %subscription, "Subscription registered");
        self.subscriptions.push(subscription);
        true
    }

    fn unregister(&mut self, subscription: &Subscription) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s != subscription);
        before != self.subscriptions.len()
    }

    fn emit(&self, event: StreamEvent) {
        // A dropped receiver only means nobody is listening anymore
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.state.send_replace(self.core.state());
    }

    fn fail_waiters(&mut self, error: impl Fn() -> ExchangeError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(error()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config(max_attempts: u32) -> SupervisorConfig {
        SupervisorConfig {
            // Port 1 refuses connections on loopback
            url: "ws://127.0.0.1:1".to_string(),
            heartbeat_interval: Duration::from_millis(50),
            heartbeat_timeout: Duration::from_millis(500),
            backoff: BackoffPolicy {
                base: Duration::from_millis(10),
                cap: Duration::from_millis(40),
                max_attempts,
            },
            buffer_capacity: 10,
            replay_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_config_per_network() {
        let config = SupervisorConfig::for_network(Network::Mainnet);
        assert_eq!(config.url, "wss://api.hyperliquid.xyz/ws");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(45));
        assert_eq!(config.buffer_capacity, 100);
        assert_eq!(config.replay_interval, Duration::from_millis(200));
        assert_eq!(SupervisorConfig::default().url, Network::Testnet.ws_url());
    }

    #[tokio::test]
    async fn test_exhausted_attempts_are_fatal() {
        let timers = TimerRegistry::default();
        let (supervisor, mut events) = ConnectionSupervisor::spawn(unreachable_config(2), timers);

        let result = supervisor.connect().await;
        assert!(matches!(result, Err(ExchangeError::ConnectionFatal { attempts: 2 })));
        assert_eq!(supervisor.state(), ConnectionState::Fatal);
        assert_eq!(events.recv().await, Some(StreamEvent::Fatal { attempts: 2 }));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_connect() {
        let timers = TimerRegistry::default();
        let mut config = unreachable_config(10);
        config.backoff.base = Duration::from_secs(30);
        config.backoff.cap = Duration::from_secs(30);
        let (supervisor, _events) = ConnectionSupervisor::spawn(config, timers.clone());

        let mut state = supervisor.watch_state();
        let connect = supervisor.connect();
        tokio::pin!(connect);

        // First handshake fails fast, the retry is 30s away
        tokio::select! {
            _ = &mut connect => panic!("connect resolved early"),
            _ = state.wait_for(|s| *s == ConnectionState::ReconnectScheduled) => {}
        }

        supervisor.disconnect().await;
        assert!(matches!(connect.await, Err(ExchangeError::Disconnected)));
        assert_eq!(supervisor.state(), ConnectionState::Idle);
        assert!(timers.is_empty());

        // Second disconnect is a no-op
        supervisor.disconnect().await;
        assert_eq!(supervisor.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_during_handshake() {
        // Accepts TCP but never answers the upgrade request
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let timers = TimerRegistry::default();
        let mut config = unreachable_config(10);
        config.url = format!("ws://{}", addr);
        config.heartbeat_timeout = Duration::from_secs(30);
        let (supervisor, _events) = ConnectionSupervisor::spawn(config, timers.clone());

        let mut state = supervisor.watch_state();
        let connect = supervisor.connect();
        tokio::pin!(connect);

        tokio::select! {
            _ = &mut connect => panic!("connect resolved early"),
            _ = state.wait_for(|s| *s == ConnectionState::Connecting) => {}
        }

        tokio::time::timeout(Duration::from_secs(5), supervisor.disconnect())
            .await
            .expect("disconnect blocked on the handshake");
        assert!(matches!(connect.await, Err(ExchangeError::Disconnected)));
        assert_eq!(supervisor.state(), ConnectionState::Idle);
        assert!(timers.is_empty());
    }
}
