//! FIX 4.4 market data session
//!
//! Framing, message building and parsing, sequence recovery, heartbeats and the
//! supervised session that turns quotes into [`Tick`](crate::tickstore::Tick)s.

pub mod backoff;
pub mod codec;
pub mod heartbeat;
pub mod inbound;
pub mod manager;
pub mod market_data;
pub mod messages;
pub mod sequence;
pub mod session;
pub mod state;

pub use backoff::ReconnectPolicy;
pub use codec::FixFrameCodec;
pub use inbound::{InboundFrame, InboundMessage};
pub use manager::{SessionManager, SessionStatus, SubscriptionInfo};
pub use messages::{FixMessage, SessionIds};
pub use session::{FixSession, SessionCommand};
pub use state::SessionState;
