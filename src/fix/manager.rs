use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::backoff::ReconnectPolicy;
use super::messages::new_md_req_id;
use super::session::{FixSession, SessionCommand, SessionShared};
use super::state::SessionState;
use crate::config::FixSessionConfig;
use crate::error::SessionError;
use crate::tickstore::Tick;

/// One active market data subscription
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionInfo {
    pub symbol: String,
    pub md_req_id: String,
}

/// Point-in-time view of the upstream session
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionStatus {
    pub state: SessionState,
    pub endpoint: String,
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub next_incoming_seq: u64,
    pub next_outgoing_seq: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub gaps_detected: u64,
    pub resets: u64,
    pub reconnect_attempts: u64,
    pub ticks_emitted: u64,
    pub quotes_rejected: u64,
    pub last_error: Option<String>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_logon: Option<DateTime<Utc>>,
    pub subscriptions: Vec<SubscriptionInfo>,
}

/// Supervises the FIX session: connect, serve, back off, reconnect
///
/// Subscriptions live here rather than in the session so they survive reconnects; the
/// running session receives changes as [`SessionCommand`]s.
pub struct SessionManager {
    config: FixSessionConfig,
    shared: Arc<SessionShared>,
    tick_tx: mpsc::Sender<Tick>,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionCommand>>>,
}

impl SessionManager {
    /// Create a manager; symbols from the config are subscribed on first logon
    pub fn new(config: FixSessionConfig, tick_tx: mpsc::Sender<Tick>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SessionShared::new());

        {
            let mut subscriptions = shared.subscriptions.lock();
            for symbol in &config.symbols {
                if subscriptions.md_req_id(symbol).is_none() {
                    subscriptions.insert(symbol, &new_md_req_id(symbol));
                }
            }
        }

        Self {
            config,
            shared,
            tick_tx,
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Open TCP, log on and return the live session
    pub async fn connect(&self) -> Result<FixSession, SessionError> {
        self.connect_with(true).await
    }

    async fn connect_with(&self, reset_seq: bool) -> Result<FixSession, SessionError> {
        self.shared.transition(SessionState::Connecting);

        match FixSession::connect(
            &self.config,
            reset_seq,
            Arc::clone(&self.shared),
            self.tick_tx.clone(),
        )
        .await
        {
            Ok(session) => {
                self.shared.transition(SessionState::LoggedOn);
                Ok(session)
            }
            Err(e) => {
                self.shared.set_error(&e);
                self.shared.transition(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Subscribe to a symbol, returning its MDReqID
    ///
    /// Repeated calls return the existing MDReqID without sending another request.
    pub fn subscribe(&self, symbol: &str) -> Result<String, SessionError> {
        let mut subscriptions = self.shared.subscriptions.lock();
        if let Some(md_req_id) = subscriptions.md_req_id(symbol) {
            tracing::debug!("Already subscribed to {} ({})", symbol, md_req_id);
            return Ok(md_req_id.clone());
        }

        let md_req_id = new_md_req_id(symbol);
        subscriptions.insert(symbol, &md_req_id);

        let command = SessionCommand::Subscribe {
            symbol: symbol.to_string(),
            md_req_id: md_req_id.clone(),
        };
        if self.cmd_tx.send(command).is_err() {
            subscriptions.remove_symbol(symbol);
            return Err(SessionError::Closed);
        }

        tracing::info!("📝 Subscription registered for {} ({})", symbol, md_req_id);
        Ok(md_req_id)
    }

    pub fn unsubscribe(&self, symbol: &str) -> Result<(), SessionError> {
        let mut subscriptions = self.shared.subscriptions.lock();
        let md_req_id = subscriptions
            .remove_symbol(symbol)
            .ok_or_else(|| SessionError::NotSubscribed(symbol.to_string()))?;

        self.cmd_tx
            .send(SessionCommand::Unsubscribe {
                symbol: symbol.to_string(),
                md_req_id,
            })
            .map_err(|_| SessionError::Closed)
    }

    pub fn status(&self) -> SessionStatus {
        let shared = &self.shared;
        let subscriptions = shared
            .subscriptions
            .lock()
            .entries()
            .into_iter()
            .map(|(symbol, md_req_id)| SubscriptionInfo { symbol, md_req_id })
            .collect();

        SessionStatus {
            state: shared.state(),
            endpoint: self.config.endpoint(),
            sender_comp_id: self.config.sender_comp_id.clone(),
            target_comp_id: self.config.target_comp_id.clone(),
            next_incoming_seq: shared.next_incoming_seq.load(Ordering::Relaxed),
            next_outgoing_seq: shared.next_outgoing_seq.load(Ordering::Relaxed),
            messages_in: shared.messages_in.load(Ordering::Relaxed),
            messages_out: shared.messages_out.load(Ordering::Relaxed),
            gaps_detected: shared.gaps_detected.load(Ordering::Relaxed),
            resets: shared.resets.load(Ordering::Relaxed),
            reconnect_attempts: shared.reconnect_attempts.load(Ordering::Relaxed),
            ticks_emitted: shared.ticks_emitted.load(Ordering::Relaxed),
            quotes_rejected: shared.quotes_rejected.load(Ordering::Relaxed),
            last_error: shared.last_error.read().clone(),
            last_logon: *shared.last_logon.read(),
            subscriptions,
        }
    }

    /// Supervised loop; returns on cancellation, fatal error, closed tick channel or when
    /// reconnect attempts are exhausted
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(mut commands) = self.cmd_rx.lock().take() else {
            tracing::warn!("⚠️  Session supervisor already running");
            return;
        };

        let mut policy = ReconnectPolicy::new(&self.config.reconnect);
        let mut reset_seq = self.config.reset_on_logon;

        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.connect_with(reset_seq) => result,
            };

            let outcome = match connected {
                Ok(session) => {
                    policy.reset();
                    reset_seq = self.config.reset_on_logon;
                    session.run(&mut commands, &cancel).await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    tracing::info!("🛑 FIX session stopped");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!("❌ FIX session stopped: {}", e);
                    self.shared.set_error(&e);
                    self.shared.transition(SessionState::Disconnected);
                    break;
                }
                Err(e) => {
                    tracing::warn!("⚠️  FIX session lost: {}", e);
                    self.shared.set_error(&e);
                    if e.requires_reset() {
                        self.shared.resets.fetch_add(1, Ordering::Relaxed);
                        reset_seq = true;
                    }
                    self.shared.transition(SessionState::Disconnected);
                }
            }

            if self.tick_tx.is_closed() {
                tracing::info!("Tick consumer gone, not reconnecting");
                break;
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    "❌ Giving up after {} reconnect attempts",
                    policy.attempt_count()
                );
                break;
            };
            self.shared.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                "🔄 Reconnecting in {:?} (attempt {})",
                delay,
                policy.attempt_count()
            );

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.shared.transition(SessionState::Disconnected);
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectConfig;
    use crate::fix::codec::FixFrameCodec;
    use crate::fix::inbound::InboundFrame;
    use crate::fix::messages::{
        create_heartbeat, create_logon, create_logout, create_sequence_reset,
        create_test_request, parse_fields, FixMessage, SessionIds,
    };
    use futures::{SinkExt, StreamExt};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_util::codec::{FramedRead, FramedWrite};

    const WAIT: Duration = Duration::from_secs(5);

    fn server_ids() -> SessionIds {
        SessionIds {
            sender_comp_id: "SERVER".to_string(),
            target_comp_id: "CLIENT".to_string(),
            sender_sub_id: None,
            target_sub_id: None,
        }
    }

    fn config(port: u16) -> FixSessionConfig {
        FixSessionConfig {
            host: "127.0.0.1".to_string(),
            port,
            logon_timeout_secs: 2,
            gap_timeout_ms: 5_000,
            reconnect: ReconnectConfig {
                initial_delay_ms: 10,
                max_delay_ms: 50,
                backoff_multiplier: 2.0,
                jitter_factor: 0.0,
                max_attempts: 3,
            },
            ..FixSessionConfig::default()
        }
    }

    /// Minimal acceptor side of a FIX connection
    struct Peer {
        reader: FramedRead<OwnedReadHalf, FixFrameCodec>,
        writer: FramedWrite<OwnedWriteHalf, FixFrameCodec>,
    }

    impl Peer {
        async fn accept(listener: &TcpListener) -> Self {
            let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
            let (read_half, write_half) = stream.into_split();
            Self {
                reader: FramedRead::new(read_half, FixFrameCodec::new()),
                writer: FramedWrite::new(write_half, FixFrameCodec::new()),
            }
        }

        async fn recv(&mut self) -> InboundFrame {
            let bytes = timeout(WAIT, self.reader.next())
                .await
                .expect("timed out waiting for client message")
                .expect("client closed the connection")
                .unwrap();
            InboundFrame::parse(bytes).unwrap()
        }

        async fn send(&mut self, raw: String) {
            self.writer.send(raw).await.unwrap();
        }

        /// Accept the client's Logon and acknowledge it with seq 1
        async fn handshake(listener: &TcpListener) -> Self {
            let mut peer = Self::accept(listener).await;
            let logon = peer.recv().await;
            assert_eq!(logon.header.msg_type, "A");
            assert_eq!(logon.seq(), 1);
            peer.send(create_logon(&server_ids(), 1, 30, true, "", "")).await;
            peer
        }
    }

    fn field(frame: &InboundFrame, tag: u32) -> Option<String> {
        let text = std::str::from_utf8(&frame.raw).unwrap();
        parse_fields(text)
            .into_iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.to_string())
    }

    fn snapshot(seq: u64, symbol: &str, bid: &str, ask: &str) -> String {
        let mut msg = FixMessage::with_header(&server_ids(), seq);
        msg.add_field(262, "MD_TEST");
        msg.add_field(55, symbol);
        msg.add_field(268, 2);
        msg.add_field(269, 0);
        msg.add_field(270, bid);
        msg.add_field(269, 1);
        msg.add_field(270, ask);
        msg.build("W")
    }

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_connect_logs_on() {
        let (listener, port) = listener().await;
        let (tick_tx, _tick_rx) = mpsc::channel(16);
        let manager = SessionManager::new(config(port), tick_tx);

        let server = tokio::spawn(async move { Peer::handshake(&listener).await });

        let _session = manager.connect().await.unwrap();
        let _peer = server.await.unwrap();

        assert_eq!(manager.state(), SessionState::LoggedOn);
        let status = manager.status();
        assert_eq!(status.next_incoming_seq, 2);
        assert_eq!(status.next_outgoing_seq, 2);
        assert!(status.last_logon.is_some());
    }

    #[tokio::test]
    async fn test_refused_logon_is_authentication_error() {
        let (listener, port) = listener().await;
        let (tick_tx, _tick_rx) = mpsc::channel(16);
        let manager = Arc::new(SessionManager::new(config(port), tick_tx));

        let server = tokio::spawn(async move {
            let mut peer = Peer::accept(&listener).await;
            peer.recv().await;
            peer.send(create_logout(&server_ids(), 1, Some("Invalid credentials")))
                .await;
            peer
        });

        let err = manager.connect().await.err().expect("connect should fail");
        assert!(matches!(err, SessionError::Authentication(ref text) if text == "Invalid credentials"));
        let _peer = server.await.unwrap();
        assert_eq!(manager.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_supervisor_stops_on_authentication_failure() {
        let (listener, port) = listener().await;
        let (tick_tx, _tick_rx) = mpsc::channel(16);
        let manager = Arc::new(SessionManager::new(config(port), tick_tx));

        let server = tokio::spawn(async move {
            let mut peer = Peer::accept(&listener).await;
            peer.recv().await;
            peer.send(create_logout(&server_ids(), 1, Some("Unknown user")))
                .await;
            peer
        });

        let handle = Arc::clone(&manager).start(CancellationToken::new());
        timeout(WAIT, handle).await.unwrap().unwrap();
        let _peer = server.await.unwrap();

        let status = manager.status();
        assert_eq!(status.state, SessionState::Disconnected);
        assert_eq!(status.reconnect_attempts, 0);
        assert!(status.last_error.unwrap().contains("Unknown user"));
    }

    #[tokio::test]
    async fn test_double_subscribe_sends_one_request() {
        let (listener, port) = listener().await;
        let (tick_tx, mut tick_rx) = mpsc::channel(16);
        let manager = Arc::new(SessionManager::new(config(port), tick_tx));

        let first = manager.subscribe("EURUSD").unwrap();
        let second = manager.subscribe("EURUSD").unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("MD_EURUSD_"));

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&manager).start(cancel.clone());

        let mut peer = Peer::handshake(&listener).await;
        let request = peer.recv().await;
        assert_eq!(request.header.msg_type, "V");
        assert_eq!(field(&request, 262), Some(first.clone()));
        assert_eq!(field(&request, 263).as_deref(), Some("1"));
        assert_eq!(field(&request, 55).as_deref(), Some("EURUSD"));

        peer.send(snapshot(2, "EURUSD", "1.08500", "1.08520")).await;
        let tick = timeout(WAIT, tick_rx.recv()).await.unwrap().unwrap();
        assert_eq!(tick.symbol(), "EURUSD");
        assert_eq!(tick.bid(), dec!(1.08500));
        assert_eq!(tick.ask(), dec!(1.08520));

        // The next client message answers our TestRequest, so no second V was queued
        peer.send(create_test_request(&server_ids(), 3, "TEST_1")).await;
        let reply = peer.recv().await;
        assert_eq!(reply.header.msg_type, "0");
        assert_eq!(field(&reply, 112).as_deref(), Some("TEST_1"));

        cancel.cancel();
        let logout = peer.recv().await;
        assert_eq!(logout.header.msg_type, "5");
        peer.send(create_logout(&server_ids(), 4, None)).await;
        timeout(WAIT, handle).await.unwrap().unwrap();

        let status = manager.status();
        assert_eq!(status.state, SessionState::Disconnected);
        assert_eq!(status.ticks_emitted, 1);
        assert_eq!(status.subscriptions.len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_symbol() {
        let (tick_tx, _tick_rx) = mpsc::channel(16);
        let manager = SessionManager::new(config(1), tick_tx);

        assert!(matches!(
            manager.unsubscribe("USDJPY"),
            Err(SessionError::NotSubscribed(ref s)) if s == "USDJPY"
        ));

        manager.subscribe("USDJPY").unwrap();
        manager.unsubscribe("USDJPY").unwrap();
        assert!(manager.status().subscriptions.is_empty());
    }

    #[tokio::test]
    async fn test_gap_is_resent_once_and_released_in_order() {
        let (listener, port) = listener().await;
        let (tick_tx, mut tick_rx) = mpsc::channel(16);
        let manager = Arc::new(SessionManager::new(config(port), tick_tx));
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&manager).start(cancel.clone());

        let mut peer = Peer::handshake(&listener).await;
        peer.send(create_heartbeat(&server_ids(), 2, None)).await;
        peer.send(snapshot(7, "EURUSD", "1.10000", "1.10010")).await;
        peer.send(snapshot(8, "EURUSD", "1.20000", "1.20010")).await;

        let resend = peer.recv().await;
        assert_eq!(resend.header.msg_type, "2");
        assert_eq!(field(&resend, 7).as_deref(), Some("3"));
        assert_eq!(field(&resend, 16).as_deref(), Some("6"));

        // Held until the gap closes
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tick_rx.try_recv().is_err());
        assert_eq!(manager.state(), SessionState::Resynchronizing);

        peer.send(create_sequence_reset(&server_ids(), 3, 7, true)).await;
        let first = timeout(WAIT, tick_rx.recv()).await.unwrap().unwrap();
        let second = timeout(WAIT, tick_rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.bid(), dec!(1.10000));
        assert_eq!(second.bid(), dec!(1.20000));

        timeout(WAIT, async {
            while manager.state() != SessionState::LoggedOn {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let status = manager.status();
        assert_eq!(status.gaps_detected, 1);
        assert_eq!(status.next_incoming_seq, 9);

        cancel.cancel();
        drop(peer);
        timeout(WAIT, handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_test_request_answered_while_gap_open() {
        let (listener, port) = listener().await;
        let (tick_tx, mut tick_rx) = mpsc::channel(16);
        let manager = Arc::new(SessionManager::new(config(port), tick_tx));
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&manager).start(cancel.clone());

        let mut peer = Peer::handshake(&listener).await;
        peer.send(snapshot(5, "EURUSD", "1.10000", "1.10010")).await;

        let resend = peer.recv().await;
        assert_eq!(resend.header.msg_type, "2");
        assert_eq!(field(&resend, 7).as_deref(), Some("2"));
        assert_eq!(field(&resend, 16).as_deref(), Some("4"));

        // Sequence 6 sits behind the 2..4 gap but still gets its Heartbeat right away
        peer.send(create_test_request(&server_ids(), 6, "PING")).await;
        let reply = timeout(Duration::from_secs(1), peer.recv()).await.unwrap();
        assert_eq!(reply.header.msg_type, "0");
        assert_eq!(field(&reply, 112).as_deref(), Some("PING"));
        assert_eq!(manager.state(), SessionState::Resynchronizing);
        assert!(tick_rx.try_recv().is_err());

        peer.send(create_sequence_reset(&server_ids(), 2, 5, true)).await;
        let tick = timeout(WAIT, tick_rx.recv()).await.unwrap().unwrap();
        assert_eq!(tick.bid(), dec!(1.10000));

        timeout(WAIT, async {
            while manager.status().next_incoming_seq != 7 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // Releasing seq 6 from the queue does not answer the TestRequest a second time
        let again = timeout(Duration::from_millis(200), peer.reader.next()).await;
        assert!(again.is_err(), "unexpected second reply");

        cancel.cancel();
        drop(peer);
        timeout(WAIT, handle).await.unwrap().unwrap();
    }
}
