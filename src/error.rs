//! Error types for the quote pipeline
//!
//! Each stage of the pipeline owns one error enum. Session faults are handled inside the
//! session supervisor and surface as status, storage faults never reach `ingest` callers,
//! and hub faults stay scoped to the connection that caused them.

use thiserror::Error;

/// Errors raised by the FIX session layer
///
/// # Error Categories
///
/// - **Transient**: `Connection`, `Timeout`, `Io`, `Closed` (retried with backoff)
/// - **Fatal**: `Authentication` (stops reconnecting until credentials change)
/// - **Reset**: `ProtocolSequence`, `GapTooLarge` (force a full session reset)
/// - **Caller**: `NotSubscribed`, `Framing`
#[derive(Debug, Error)]
pub enum SessionError {
    /// Transport could not be opened or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Counterparty refused the logon (text from tag 58 when present)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Inbound sequence number below expected without PossDupFlag
    #[error("Sequence number too low: expected {expected}, received {received}")]
    ProtocolSequence { expected: u64, received: u64 },

    /// Gap wider than the configured tolerance
    #[error("Sequence gap too large: expected {expected}, received {received} (max {max})")]
    GapTooLarge { expected: u64, received: u64, max: u64 },

    /// Unsubscribe for a symbol with no active subscription
    #[error("Symbol not subscribed: {0}")]
    NotSubscribed(String),

    /// Frame failed checksum or body length validation
    #[error("Framing error: {0}")]
    Framing(String),

    /// A bounded wait expired
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The session task is gone
    #[error("Session closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Returns true if reconnecting with backoff may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::Connection(_)
                | SessionError::Timeout(_)
                | SessionError::Io(_)
                | SessionError::Closed
                | SessionError::ProtocolSequence { .. }
                | SessionError::GapTooLarge { .. }
        )
    }

    /// Returns true if the supervisor must stop until reconfigured
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Authentication(_))
    }

    /// Returns true if the session has to be torn down and logged on again
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            SessionError::ProtocolSequence { .. } | SessionError::GapTooLarge { .. }
        )
    }
}

/// Errors raised by the tick store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Tick rejected at construction (crossed quote, non-positive price, empty symbol)
    #[error("Invalid tick: {0}")]
    InvalidTick(String),

    /// Symbol cannot name a storage directory
    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    /// A segment append failed; the batch is retried on the next flush
    #[error("Failed to persist ticks for {symbol} on {date}: {source}")]
    PersistenceWrite {
        symbol: String,
        date: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl StoreError {
    /// Returns true if this is a validation error
    pub fn is_validation_error(&self) -> bool {
        matches!(self, StoreError::InvalidTick(_) | StoreError::InvalidSymbol(_))
    }
}

/// Errors raised by the distribution hub
#[derive(Debug, Error)]
pub enum HubError {
    /// Bearer token missing or rejected by the validator
    #[error("Subscriber authentication failed: {0}")]
    SubscriberAuth(String),

    /// Subscriber exceeded the drop streak threshold and was evicted
    #[error("Slow consumer {subscriber}: {drops} messages dropped")]
    SlowConsumer { subscriber: uuid::Uuid, drops: u64 },

    /// Outbound queue closed (subscriber already gone)
    #[error("Subscriber queue closed")]
    QueueClosed,

    /// Client sent something we could not parse
    #[error("Invalid client message: {0}")]
    InvalidMessage(String),

    #[error("Latency histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::ProtocolSequence {
            expected: 10,
            received: 7,
        };
        assert_eq!(
            err.to_string(),
            "Sequence number too low: expected 10, received 7"
        );

        let err = SessionError::NotSubscribed("EURUSD".to_string());
        assert_eq!(err.to_string(), "Symbol not subscribed: EURUSD");
    }

    #[test]
    fn test_session_error_categories() {
        assert!(SessionError::Connection("refused".into()).is_transient());
        assert!(!SessionError::Connection("refused".into()).is_fatal());
        assert!(SessionError::Authentication("bad password".into()).is_fatal());
        assert!(!SessionError::Authentication("bad password".into()).is_transient());
        assert!(SessionError::GapTooLarge {
            expected: 1,
            received: 5000,
            max: 1000
        }
        .requires_reset());
        assert!(!SessionError::NotSubscribed("X".into()).requires_reset());
    }

    #[test]
    fn test_store_error_categories() {
        assert!(StoreError::InvalidTick("bid > ask".into()).is_validation_error());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(!StoreError::Io(io).is_validation_error());
    }
}
