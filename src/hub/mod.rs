//! Distribution hub
//!
//! Authenticated websocket subscribers, each with a bounded outbound queue, fed by a
//! non-blocking fan-out.

pub mod auth;
pub mod broadcaster;
pub mod handler;
pub mod messages;
pub mod subscriber;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

pub use auth::{Identity, StaticTokenValidator, TokenValidator};
pub use broadcaster::{BroadcastReport, Hub, HubStats};
pub use handler::{websocket_handler, WsState};
pub use messages::{ClientMessage, WsMessage};
pub use subscriber::{Subscriber, SubscriberInfo};

/// Which ticks the pipeline hands to the hub
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    /// Only ticks whose mid moved by at least the broadcast epsilon
    #[default]
    Throttled,
    /// Every stored tick
    All,
}

impl FromStr for ForwardMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "throttled" => Ok(ForwardMode::Throttled),
            "all" => Ok(ForwardMode::All),
            other => Err(format!("unknown forward mode: {}", other)),
        }
    }
}

impl fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardMode::Throttled => write!(f, "throttled"),
            ForwardMode::All => write!(f, "all"),
        }
    }
}
