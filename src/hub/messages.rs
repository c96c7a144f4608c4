use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::tickstore::Tick;

/// Server -> client websocket messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// One quote update
    Tick(Tick),
    /// Latest price of every known symbol, sent once after connecting
    Snapshot {
        ticks: Vec<Tick>,
        timestamp: DateTime<Utc>,
    },
    /// Subscription confirmation with the full current filter
    Subscribed { symbols: Vec<String> },
    /// Unsubscription confirmation with the remaining filter
    Unsubscribed { symbols: Vec<String> },
    Error { message: String },
    /// Heartbeat
    Ping { timestamp: DateTime<Utc> },
    Pong { timestamp: DateTime<Utc> },
}

impl WsMessage {
    pub fn ping() -> Self {
        WsMessage::Ping {
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        WsMessage::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WsMessage::Error {
            message: message.into(),
        }
    }
}

/// Client -> server websocket messages
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { symbols: Vec<String> },
    Unsubscribe { symbols: Vec<String> },
    Ping,
}

/// A message already serialized once for every subscriber
///
/// Fan-out clones the `Arc`, never the JSON.
pub type Outbound = Arc<str>;

pub fn encode(message: &WsMessage) -> Result<Outbound, serde_json::Error> {
    serde_json::to_string(message).map(Arc::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tick_message_shape() {
        let tick = Tick::new("fix", "EURUSD", dec!(1.085), dec!(1.0852), "lp1", Utc::now()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&encode(&WsMessage::Tick(tick)).unwrap()).unwrap();

        assert_eq!(json["type"], "tick");
        assert_eq!(json["symbol"], "EURUSD");
        assert_eq!(json["bid"], "1.085");
        assert_eq!(json["lp"], "lp1");
    }

    #[test]
    fn test_client_messages() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"subscribe","symbols":["EURUSD","GBPUSD"]}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                symbols: vec!["EURUSD".to_string(), "GBPUSD".to_string()]
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"trade"}"#).is_err());
    }

    #[test]
    fn test_control_messages() {
        let json = serde_json::to_string(&WsMessage::error("bad request")).unwrap();
        assert_eq!(json, r#"{"type":"error","message":"bad request"}"#);

        let json = serde_json::to_string(&WsMessage::Subscribed {
            symbols: vec!["EURUSD".to_string()],
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"subscribed","symbols":["EURUSD"]}"#);
    }
}
