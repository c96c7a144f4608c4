use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::codec::FixFrameCodec;
use super::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use super::inbound::{InboundFrame, InboundMessage};
use super::market_data::{build_tick, Quote, QuoteBook};
use super::messages::{
    create_heartbeat, create_logon, create_logout, create_market_data_request,
    create_resend_request, create_sequence_reset, create_test_request, format_for_display,
    SessionIds, SubscriptionRequestType,
};
use super::sequence::{GapTimeout, SequenceCheck, SequenceTracker};
use super::state::SessionState;
use crate::config::FixSessionConfig;
use crate::error::SessionError;
use crate::tickstore::Tick;

/// Requests from the manager to the live session task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Subscribe { symbol: String, md_req_id: String },
    Unsubscribe { symbol: String, md_req_id: String },
}

/// Active market data subscriptions: symbol -> MDReqID and the reverse
#[derive(Debug, Default)]
pub struct Subscriptions {
    by_symbol: HashMap<String, String>,
    by_req_id: HashMap<String, String>,
}

impl Subscriptions {
    pub fn md_req_id(&self, symbol: &str) -> Option<&String> {
        self.by_symbol.get(symbol)
    }

    pub fn insert(&mut self, symbol: &str, md_req_id: &str) {
        self.by_symbol.insert(symbol.to_string(), md_req_id.to_string());
        self.by_req_id.insert(md_req_id.to_string(), symbol.to_string());
    }

    pub fn remove_symbol(&mut self, symbol: &str) -> Option<String> {
        let md_req_id = self.by_symbol.remove(symbol)?;
        self.by_req_id.remove(&md_req_id);
        Some(md_req_id)
    }

    pub fn remove_req_id(&mut self, md_req_id: &str) -> Option<String> {
        let symbol = self.by_req_id.remove(md_req_id)?;
        self.by_symbol.remove(&symbol);
        Some(symbol)
    }

    /// (symbol, MDReqID) pairs sorted by symbol
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .by_symbol
            .iter()
            .map(|(s, id)| (s.clone(), id.clone()))
            .collect();
        entries.sort();
        entries
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

/// State shared between the session task, its supervisor and status readers
#[derive(Debug)]
pub struct SessionShared {
    state: RwLock<SessionState>,
    pub subscriptions: Mutex<Subscriptions>,
    pub next_incoming_seq: AtomicU64,
    pub next_outgoing_seq: AtomicU64,
    pub messages_in: AtomicU64,
    pub messages_out: AtomicU64,
    pub gaps_detected: AtomicU64,
    pub resets: AtomicU64,
    pub reconnect_attempts: AtomicU64,
    pub ticks_emitted: AtomicU64,
    pub quotes_rejected: AtomicU64,
    pub last_error: RwLock<Option<String>>,
    pub last_logon: RwLock<Option<DateTime<Utc>>>,
}

impl SessionShared {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SessionState::Disconnected),
            subscriptions: Mutex::new(Subscriptions::default()),
            next_incoming_seq: AtomicU64::new(1),
            next_outgoing_seq: AtomicU64::new(1),
            messages_in: AtomicU64::new(0),
            messages_out: AtomicU64::new(0),
            gaps_detected: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            ticks_emitted: AtomicU64::new(0),
            quotes_rejected: AtomicU64::new(0),
            last_error: RwLock::new(None),
            last_logon: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Move to `next` if the edge is legal; illegal transitions are logged and ignored
    pub fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.write();
        if *state == next {
            return true;
        }
        if !state.can_transition_to(next) {
            tracing::warn!("⚠️  Ignoring illegal session transition {} -> {}", *state, next);
            return false;
        }
        tracing::debug!("Session state {} -> {}", *state, next);
        *state = next;
        true
    }

    pub fn set_error(&self, error: &SessionError) {
        *self.last_error.write() = Some(error.to_string());
    }
}

impl Default for SessionShared {
    fn default() -> Self {
        Self::new()
    }
}

/// One logged-on FIX connection
///
/// Owns both halves of the socket; every read, write and timer runs on the single task
/// that calls [`FixSession::run`], so no lock guards the writer.
pub struct FixSession {
    ids: SessionIds,
    source: String,
    lp: String,
    reader: FramedRead<OwnedReadHalf, FixFrameCodec>,
    writer: FramedWrite<OwnedWriteHalf, FixFrameCodec>,
    next_out: u64,
    sequence: SequenceTracker<InboundFrame>,
    heartbeat: HeartbeatMonitor,
    quotes: QuoteBook,
    max_gap: u64,
    logout_timeout: std::time::Duration,
    shared: std::sync::Arc<SessionShared>,
    tick_tx: mpsc::Sender<Tick>,
}

impl FixSession {
    /// Open TCP, send Logon and wait for the acknowledgment
    ///
    /// With `reset_seq` the outbound sequence restarts at 1 and 141=Y is sent; otherwise it
    /// continues from the previous connection.
    pub async fn connect(
        config: &FixSessionConfig,
        reset_seq: bool,
        shared: std::sync::Arc<SessionShared>,
        tick_tx: mpsc::Sender<Tick>,
    ) -> Result<Self, SessionError> {
        let endpoint = config.endpoint();
        tracing::info!("🔌 Connecting to FIX acceptor at {}", endpoint);

        let stream = timeout(config.logon_timeout(), TcpStream::connect(&endpoint))
            .await
            .map_err(|_| SessionError::Connection(format!("connect to {} timed out", endpoint)))?
            .map_err(|e| SessionError::Connection(format!("connect to {}: {}", endpoint, e)))?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let now = Instant::now();

        let mut session = Self {
            ids: SessionIds::from(config),
            source: config.source.clone(),
            lp: config.lp.clone(),
            reader: FramedRead::new(read_half, FixFrameCodec::new()),
            writer: FramedWrite::new(write_half, FixFrameCodec::new()),
            next_out: if reset_seq {
                1
            } else {
                shared.next_outgoing_seq.load(Ordering::Relaxed).max(1)
            },
            sequence: SequenceTracker::new(
                config.max_sequence_gap,
                config.gap_timeout(),
                config.max_resend_attempts,
            ),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval(), now),
            quotes: QuoteBook::new(),
            max_gap: config.max_sequence_gap,
            logout_timeout: config.logon_timeout(),
            shared,
            tick_tx,
        };

        tracing::info!("✅ TCP connection established, sending Logon");
        let seq = session.next_seq();
        let logon = create_logon(
            &session.ids,
            seq,
            config.heartbeat_interval().as_secs(),
            reset_seq,
            &config.username,
            &config.password,
        );
        session.send_raw(logon).await?;

        match timeout(config.logon_timeout(), session.await_logon()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SessionError::Connection(format!(
                    "logon not acknowledged within {:?}",
                    config.logon_timeout()
                )))
            }
        }

        Ok(session)
    }

    async fn await_logon(&mut self) -> Result<(), SessionError> {
        loop {
            let bytes = match self.reader.next().await {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(SessionError::Connection(
                        "connection closed during logon".to_string(),
                    ))
                }
            };
            self.shared.messages_in.fetch_add(1, Ordering::Relaxed);

            let frame = match InboundFrame::parse(bytes) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("⚠️  Discarding frame during logon: {}", e);
                    continue;
                }
            };

            match frame.message {
                InboundMessage::Logon {
                    heartbeat_secs,
                    reset_seq_num,
                } => {
                    self.sequence.reset(frame.seq() + 1);
                    self.heartbeat.on_inbound(Instant::now());
                    self.publish_sequence();
                    *self.shared.last_logon.write() = Some(Utc::now());
                    tracing::info!(
                        "🔐 Logged on as {} -> {} (peer seq {}, reset {}, heartbeat {:?}s)",
                        self.ids.sender_comp_id,
                        self.ids.target_comp_id,
                        frame.seq(),
                        reset_seq_num,
                        heartbeat_secs
                    );
                    return Ok(());
                }
                InboundMessage::Logout { text } | InboundMessage::Reject { text, .. } => {
                    let reason = text.unwrap_or_else(|| "logon rejected".to_string());
                    tracing::error!("❌ Logon refused: {}", reason);
                    return Err(SessionError::Authentication(reason));
                }
                other => {
                    tracing::debug!("Ignoring {} before logon acknowledgment", other.kind());
                }
            }
        }
    }

    /// Serve the session until cancellation (Ok) or a fault (Err)
    pub async fn run(
        mut self,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        self.resubscribe(commands).await?;

        let mut timer = interval(self.heartbeat.poll_period());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.logout("shutdown").await;
                    return Ok(());
                }

                frame = self.reader.next() => match frame {
                    Some(Ok(bytes)) => self.on_frame(bytes).await?,
                    Some(Err(e)) => return Err(e),
                    None => {
                        return Err(SessionError::Connection("peer closed the connection".to_string()))
                    }
                },

                _ = timer.tick() => self.on_timer().await?,

                Some(command) = commands.recv() => self.on_command(command).await?,
            }
        }
    }

    /// Re-send every remembered subscription exactly once
    ///
    /// Commands queued while disconnected are discarded under the subscriptions lock, so a
    /// symbol is requested either from this snapshot or from a later command, never both.
    async fn resubscribe(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<(), SessionError> {
        let entries = {
            let subscriptions = self.shared.subscriptions.lock();
            while commands.try_recv().is_ok() {}
            subscriptions.entries()
        };

        for (symbol, md_req_id) in entries {
            self.send_market_data_request(&symbol, &md_req_id, SubscriptionRequestType::Subscribe)
                .await?;
            tracing::info!("📈 Subscribed to {} ({})", symbol, md_req_id);
        }
        Ok(())
    }

    async fn on_frame(&mut self, bytes: bytes::Bytes) -> Result<(), SessionError> {
        let now = Instant::now();
        self.heartbeat.on_inbound(now);
        self.shared.messages_in.fetch_add(1, Ordering::Relaxed);

        let frame = match InboundFrame::parse(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("⚠️  Rejected inbound frame: {}", e);
                return Ok(());
            }
        };
        tracing::debug!(
            "📥 {} seq {}: {}",
            frame.message.kind(),
            frame.seq(),
            format_for_display(&String::from_utf8_lossy(&frame.raw))
        );

        // Reset mode ignores MsgSeqNum entirely
        if let InboundMessage::SequenceReset {
            new_seq_no,
            gap_fill: false,
        } = frame.message
        {
            tracing::warn!("⚠️  SequenceReset (reset mode) to {}", new_seq_no);
            self.sequence.reset_to(new_seq_no);
            self.after_sequence_change(now).await?;
            return Ok(());
        }

        let seq = frame.seq();
        match self.sequence.check(seq, frame.header.poss_dup, now) {
            SequenceCheck::InOrder => {
                self.dispatch(frame).await?;
                self.drain_ready(now).await?;
            }
            SequenceCheck::Gap { begin, end } => {
                self.shared.gaps_detected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("⚠️  Sequence gap: expected {}, received {}", begin, seq);
                self.shared.transition(SessionState::Resynchronizing);
                self.send_resend_request(begin, end).await?;
                let frame = self.answer_ahead_of_gap(frame).await?;
                self.sequence.queue(seq, frame);
            }
            SequenceCheck::Queued => {
                tracing::debug!("Queued seq {} behind open gap", seq);
                let frame = self.answer_ahead_of_gap(frame).await?;
                self.sequence.queue(seq, frame);
            }
            SequenceCheck::Duplicate => {
                tracing::debug!("Ignoring possible duplicate seq {}", seq);
            }
            SequenceCheck::TooLow { expected, received } => {
                return Err(SessionError::ProtocolSequence { expected, received });
            }
            SequenceCheck::GapTooLarge { expected, received } => {
                return Err(SessionError::GapTooLarge {
                    expected,
                    received,
                    max: self.max_gap,
                });
            }
        }

        self.publish_sequence();
        Ok(())
    }

    /// Handle TestRequest, ResendRequest and Logout on arrival even when they sit behind a gap
    ///
    /// The returned frame is queued in their place as an inert heartbeat so the sequence
    /// number is still consumed in order and the message is not answered twice.
    async fn answer_ahead_of_gap(&mut self, mut frame: InboundFrame) -> Result<InboundFrame, SessionError> {
        if !matches!(
            frame.message,
            InboundMessage::TestRequest { .. }
                | InboundMessage::ResendRequest { .. }
                | InboundMessage::Logout { .. }
        ) {
            return Ok(frame);
        }

        let message = std::mem::replace(
            &mut frame.message,
            InboundMessage::Heartbeat { test_req_id: None },
        );
        tracing::debug!("Answering {} seq {} ahead of open gap", message.kind(), frame.seq());
        self.dispatch(InboundFrame {
            header: frame.header.clone(),
            message,
            raw: frame.raw.clone(),
        })
        .await?;
        Ok(frame)
    }

    /// Process queued messages that became contiguous, then open the next gap if any
    async fn drain_ready(&mut self, now: Instant) -> Result<(), SessionError> {
        loop {
            let ready = self.sequence.release_ready();
            if ready.is_empty() {
                break;
            }
            for frame in ready {
                self.dispatch(frame).await?;
            }
        }
        self.after_sequence_change(now).await
    }

    async fn after_sequence_change(&mut self, now: Instant) -> Result<(), SessionError> {
        if let Some((begin, end)) = self.sequence.next_gap(now) {
            self.shared.gaps_detected.fetch_add(1, Ordering::Relaxed);
            self.send_resend_request(begin, end).await?;
        }
        self.publish_sequence();

        if !self.sequence.is_resynchronizing()
            && self.shared.state() == SessionState::Resynchronizing
        {
            tracing::info!("✅ Sequence gap recovered, next expected {}", self.sequence.expected());
            self.shared.transition(SessionState::LoggedOn);
        }
        Ok(())
    }

    async fn dispatch(&mut self, frame: InboundFrame) -> Result<(), SessionError> {
        match frame.message {
            InboundMessage::Logon { .. } => {
                tracing::warn!("⚠️  Unexpected Logon while logged on");
            }
            InboundMessage::Heartbeat { .. } => {}
            InboundMessage::TestRequest { test_req_id } => {
                let seq = self.next_seq();
                self.send_raw(create_heartbeat(&self.ids, seq, Some(&test_req_id)))
                    .await?;
            }
            InboundMessage::ResendRequest { begin, end } => {
                // Nothing outbound is worth replaying; gap-fill the whole range
                if begin < self.next_out {
                    tracing::info!(
                        "🔁 Peer requested resend {}..{}, gap filling to {}",
                        begin,
                        end,
                        self.next_out
                    );
                    let gap_fill = create_sequence_reset(&self.ids, begin, self.next_out, true);
                    self.send_raw(gap_fill).await?;
                }
            }
            InboundMessage::SequenceReset {
                new_seq_no,
                gap_fill,
            } => {
                if gap_fill && !self.sequence.gap_fill(new_seq_no) {
                    tracing::warn!(
                        "⚠️  Ignoring GapFill to {} (expected already {})",
                        new_seq_no,
                        self.sequence.expected()
                    );
                } else if !gap_fill {
                    self.sequence.reset_to(new_seq_no);
                }
            }
            InboundMessage::Logout { text } => {
                let reason = text.unwrap_or_default();
                tracing::warn!("👋 Peer logged out: {}", reason);
                let seq = self.next_seq();
                let _ = self.send_raw(create_logout(&self.ids, seq, None)).await;
                self.shared.transition(SessionState::LoggedOut);
                return Err(SessionError::Connection(format!("peer logged out: {}", reason)));
            }
            InboundMessage::Reject { ref_seq_num, text } => {
                tracing::warn!(
                    "⚠️  Session reject for seq {:?}: {}",
                    ref_seq_num,
                    text.unwrap_or_default()
                );
            }
            InboundMessage::MarketDataSnapshot(update) => {
                let quotes = self.quotes.apply_snapshot(&update);
                self.emit(quotes).await?;
            }
            InboundMessage::MarketDataIncremental(update) => {
                let quotes = self.quotes.apply_incremental(&update);
                self.emit(quotes).await?;
            }
            InboundMessage::MarketDataReject { md_req_id, text } => {
                let symbol = md_req_id
                    .as_deref()
                    .and_then(|id| self.shared.subscriptions.lock().remove_req_id(id));
                if let Some(symbol) = &symbol {
                    self.quotes.remove(symbol);
                }
                tracing::warn!(
                    "⚠️  Market data request {:?} rejected for {:?}: {}",
                    md_req_id,
                    symbol,
                    text.unwrap_or_default()
                );
            }
            InboundMessage::Other => {
                tracing::debug!("Ignoring message type {}", frame.header.msg_type);
            }
        }
        Ok(())
    }

    /// Forward complete, valid quotes as ticks; awaiting here backpressures the socket read
    async fn emit(&mut self, quotes: Vec<(String, Quote)>) -> Result<(), SessionError> {
        for (symbol, quote) in quotes {
            match build_tick(&symbol, quote, &self.source, &self.lp, Utc::now()) {
                Ok(Some(tick)) => {
                    self.tick_tx
                        .send(tick)
                        .await
                        .map_err(|_| SessionError::Closed)?;
                    self.shared.ticks_emitted.fetch_add(1, Ordering::Relaxed);
                }
                Ok(None) => {
                    tracing::debug!("Quote for {} still one-sided", symbol);
                }
                Err(e) => {
                    self.shared.quotes_rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("⚠️  Dropping quote: {}", e);
                }
            }
        }
        Ok(())
    }

    async fn on_timer(&mut self) -> Result<(), SessionError> {
        let now = Instant::now();

        match self.heartbeat.poll(now) {
            HeartbeatAction::Idle => {}
            HeartbeatAction::SendHeartbeat => {
                let seq = self.next_seq();
                tracing::debug!("💓 Sending Heartbeat (seq {})", seq);
                self.send_raw(create_heartbeat(&self.ids, seq, None)).await?;
            }
            HeartbeatAction::SendTestRequest(id) => {
                tracing::warn!("⚠️  Peer silent, sending TestRequest {}", id);
                let seq = self.next_seq();
                self.send_raw(create_test_request(&self.ids, seq, &id)).await?;
            }
            HeartbeatAction::Disconnect => {
                return Err(SessionError::Timeout("heartbeat from peer"));
            }
        }

        match self.sequence.poll_gap_timeout(now) {
            GapTimeout::None => {}
            GapTimeout::Reissue { begin, end } => {
                tracing::warn!("⚠️  Gap {}..{} not filled in time, re-requesting", begin, end);
                self.send_resend_request(begin, end).await?;
            }
            GapTimeout::GiveUp => {
                return Err(SessionError::Timeout("gap fill"));
            }
        }

        Ok(())
    }

    async fn on_command(&mut self, command: SessionCommand) -> Result<(), SessionError> {
        match command {
            SessionCommand::Subscribe { symbol, md_req_id } => {
                self.send_market_data_request(&symbol, &md_req_id, SubscriptionRequestType::Subscribe)
                    .await?;
                tracing::info!("📈 Subscribed to {} ({})", symbol, md_req_id);
            }
            SessionCommand::Unsubscribe { symbol, md_req_id } => {
                self.send_market_data_request(
                    &symbol,
                    &md_req_id,
                    SubscriptionRequestType::Unsubscribe,
                )
                .await?;
                self.quotes.remove(&symbol);
                tracing::info!("📉 Unsubscribed from {} ({})", symbol, md_req_id);
            }
        }
        Ok(())
    }

    async fn logout(&mut self, reason: &str) {
        let seq = self.next_seq();
        if let Err(e) = self.send_raw(create_logout(&self.ids, seq, Some(reason))).await {
            tracing::warn!("⚠️  Failed to send Logout: {}", e);
            return;
        }
        self.shared.transition(SessionState::LoggedOut);

        // Give the peer a moment to confirm
        let wait = self.logout_timeout;
        let reader = &mut self.reader;
        let confirm = async move {
            while let Some(Ok(bytes)) = reader.next().await {
                if let Ok(frame) = InboundFrame::parse(bytes) {
                    if let InboundMessage::Logout { .. } = frame.message {
                        return true;
                    }
                }
            }
            false
        };
        match timeout(wait, confirm).await {
            Ok(true) => tracing::info!("👋 Logout confirmed"),
            _ => tracing::debug!("No Logout confirmation from peer"),
        }
    }

    async fn send_market_data_request(
        &mut self,
        symbol: &str,
        md_req_id: &str,
        request_type: SubscriptionRequestType,
    ) -> Result<(), SessionError> {
        let seq = self.next_seq();
        let raw = create_market_data_request(&self.ids, seq, md_req_id, symbol, request_type);
        self.send_raw(raw).await
    }

    async fn send_resend_request(&mut self, begin: u64, end: u64) -> Result<(), SessionError> {
        tracing::info!("🔁 Requesting resend {}..{}", begin, end);
        let seq = self.next_seq();
        self.send_raw(create_resend_request(&self.ids, seq, begin, end))
            .await
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_out;
        self.next_out += 1;
        self.shared
            .next_outgoing_seq
            .store(self.next_out, Ordering::Relaxed);
        seq
    }

    async fn send_raw(&mut self, raw: String) -> Result<(), SessionError> {
        tracing::debug!("📤 {}", format_for_display(&raw));
        self.writer.send(raw).await?;
        self.heartbeat.on_outbound(Instant::now());
        self.shared.messages_out.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn publish_sequence(&self) {
        self.shared
            .next_incoming_seq
            .store(self.sequence.expected(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriptions_forward_and_reverse() {
        let mut subs = Subscriptions::default();
        subs.insert("EURUSD", "MD_EURUSD_1");
        subs.insert("GBPUSD", "MD_GBPUSD_2");

        assert_eq!(subs.md_req_id("EURUSD").map(String::as_str), Some("MD_EURUSD_1"));
        assert_eq!(subs.remove_req_id("MD_GBPUSD_2").as_deref(), Some("GBPUSD"));
        assert!(subs.md_req_id("GBPUSD").is_none());
        assert_eq!(subs.remove_symbol("EURUSD").as_deref(), Some("MD_EURUSD_1"));
        assert!(subs.is_empty());
    }

    #[test]
    fn test_shared_transition_rejects_illegal_edges() {
        let shared = SessionShared::new();
        assert!(!shared.transition(SessionState::LoggedOn));
        assert_eq!(shared.state(), SessionState::Disconnected);
        assert!(shared.transition(SessionState::Connecting));
        assert!(shared.transition(SessionState::LoggedOn));
        assert_eq!(shared.state(), SessionState::LoggedOn);
    }
}
