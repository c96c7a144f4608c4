use bytes::Bytes;

use super::market_data::{parse_market_data, MarketDataUpdate};
use super::messages::{parse_fields, validate_frame};
use crate::error::SessionError;

/// Standard header of an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundHeader {
    pub msg_type: String,
    pub msg_seq_num: u64,
    /// PossDupFlag (43)
    pub poss_dup: bool,
    pub sender_comp_id: String,
    pub target_comp_id: String,
}

/// Known inbound message kinds
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Logon {
        heartbeat_secs: Option<u64>,
        reset_seq_num: bool,
    },
    Heartbeat {
        test_req_id: Option<String>,
    },
    TestRequest {
        test_req_id: String,
    },
    ResendRequest {
        begin: u64,
        /// 0 means "up to the latest sent"
        end: u64,
    },
    SequenceReset {
        new_seq_no: u64,
        gap_fill: bool,
    },
    Logout {
        text: Option<String>,
    },
    Reject {
        ref_seq_num: Option<u64>,
        text: Option<String>,
    },
    MarketDataSnapshot(MarketDataUpdate),
    MarketDataIncremental(MarketDataUpdate),
    MarketDataReject {
        md_req_id: Option<String>,
        text: Option<String>,
    },
    Other,
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Logon { .. } => "Logon",
            InboundMessage::Heartbeat { .. } => "Heartbeat",
            InboundMessage::TestRequest { .. } => "TestRequest",
            InboundMessage::ResendRequest { .. } => "ResendRequest",
            InboundMessage::SequenceReset { .. } => "SequenceReset",
            InboundMessage::Logout { .. } => "Logout",
            InboundMessage::Reject { .. } => "Reject",
            InboundMessage::MarketDataSnapshot(_) => "MarketDataSnapshot",
            InboundMessage::MarketDataIncremental(_) => "MarketDataIncremental",
            InboundMessage::MarketDataReject { .. } => "MarketDataReject",
            InboundMessage::Other => "Other",
        }
    }
}

/// A validated, parsed inbound frame
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub header: InboundHeader,
    pub message: InboundMessage,
    pub raw: Bytes,
}

impl InboundFrame {
    /// Validate checksum/body length and convert into a typed message
    pub fn parse(raw: Bytes) -> Result<Self, SessionError> {
        validate_frame(&raw)?;

        let text = std::str::from_utf8(&raw)
            .map_err(|_| SessionError::Framing("frame is not valid UTF-8".to_string()))?;
        let fields = parse_fields(text);

        let first = |tag: u32| fields.iter().find(|(t, _)| *t == tag).map(|(_, v)| *v);
        let first_u64 = |tag: u32| first(tag).and_then(|v| v.parse::<u64>().ok());
        let text_of = |tag: u32| first(tag).map(String::from);

        let msg_type = first(35)
            .ok_or_else(|| SessionError::Framing("missing MsgType".to_string()))?
            .to_string();
        let msg_seq_num = first_u64(34)
            .ok_or_else(|| SessionError::Framing("missing MsgSeqNum".to_string()))?;

        let header = InboundHeader {
            msg_seq_num,
            poss_dup: first(43) == Some("Y"),
            sender_comp_id: first(49).unwrap_or_default().to_string(),
            target_comp_id: first(56).unwrap_or_default().to_string(),
            msg_type,
        };

        let message = match header.msg_type.as_str() {
            "A" => InboundMessage::Logon {
                heartbeat_secs: first_u64(108),
                reset_seq_num: first(141) == Some("Y"),
            },
            "0" => InboundMessage::Heartbeat {
                test_req_id: text_of(112),
            },
            "1" => InboundMessage::TestRequest {
                test_req_id: text_of(112).unwrap_or_default(),
            },
            "2" => InboundMessage::ResendRequest {
                begin: first_u64(7).unwrap_or(1),
                end: first_u64(16).unwrap_or(0),
            },
            "4" => InboundMessage::SequenceReset {
                new_seq_no: first_u64(36)
                    .ok_or_else(|| SessionError::Framing("SequenceReset without NewSeqNo".to_string()))?,
                gap_fill: first(123) == Some("Y"),
            },
            "5" => InboundMessage::Logout { text: text_of(58) },
            "3" => InboundMessage::Reject {
                ref_seq_num: first_u64(45),
                text: text_of(58),
            },
            "W" => InboundMessage::MarketDataSnapshot(parse_market_data(&fields)),
            "X" => InboundMessage::MarketDataIncremental(parse_market_data(&fields)),
            "Y" => InboundMessage::MarketDataReject {
                md_req_id: text_of(262),
                text: text_of(58),
            },
            _ => InboundMessage::Other,
        };

        Ok(Self {
            header,
            message,
            raw,
        })
    }

    pub fn seq(&self) -> u64 {
        self.header.msg_seq_num
    }
}
