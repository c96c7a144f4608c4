use chrono::Utc;
use std::collections::HashMap;

use crate::config::FixSessionConfig;
use crate::error::SessionError;

pub const SOH: u8 = 0x01;
pub const BEGIN_STRING: &str = "FIX.4.4";

/// Header fields emitted by [`FixMessage::build`], in this order after 35
const HEADER_ORDER: [u32; 7] = [49, 56, 34, 43, 52, 50, 57];

/// Counterparty identifiers stamped on every outbound header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIds {
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub sender_sub_id: Option<String>,
    pub target_sub_id: Option<String>,
}

impl From<&FixSessionConfig> for SessionIds {
    fn from(config: &FixSessionConfig) -> Self {
        Self {
            sender_comp_id: config.sender_comp_id.clone(),
            target_comp_id: config.target_comp_id.clone(),
            sender_sub_id: config.sender_sub_id.clone(),
            target_sub_id: config.target_sub_id.clone(),
        }
    }
}

/// FIX 4.4 message builder
pub struct FixMessage {
    header: HashMap<u32, String>,
    body_fields: Vec<(u32, String)>, // Body fields in insertion order
}

impl FixMessage {
    pub fn new() -> Self {
        Self {
            header: HashMap::new(),
            body_fields: Vec::new(),
        }
    }

    /// Start a message with the standard header for `ids` and `seq`
    pub fn with_header(ids: &SessionIds, seq: u64) -> Self {
        let mut msg = Self::new();
        msg.add_field(49, &ids.sender_comp_id); // SenderCompID
        msg.add_field(56, &ids.target_comp_id); // TargetCompID
        msg.add_field(34, seq); // MsgSeqNum
        msg.add_field(52, sending_time()); // SendingTime
        if let Some(sub) = &ids.sender_sub_id {
            msg.add_field(50, sub); // SenderSubID
        }
        if let Some(sub) = &ids.target_sub_id {
            msg.add_field(57, sub); // TargetSubID
        }
        msg
    }

    /// Add a field (header tags are placed by the builder, body tags keep insertion order)
    pub fn add_field(&mut self, tag: u32, value: impl ToString) {
        let value = value.to_string();
        if HEADER_ORDER.contains(&tag) {
            self.header.insert(tag, value);
        } else {
            self.body_fields.push((tag, value));
        }
    }

    /// Build the wire representation
    ///
    /// BodyLength (9) counts from `35=` up to and including the SOH before `10=`;
    /// CheckSum (10) is the byte sum of everything before it, mod 256.
    pub fn build(&self, msg_type: &str) -> String {
        let mut body = format!("35={}\x01", msg_type);

        for tag in HEADER_ORDER {
            if let Some(value) = self.header.get(&tag) {
                body.push_str(&format!("{}={}\x01", tag, value));
            }
        }

        for (tag, value) in &self.body_fields {
            body.push_str(&format!("{}={}\x01", tag, value));
        }

        let mut message = format!("8={}\x019={}\x01", BEGIN_STRING, body.len());
        message.push_str(&body);

        let checksum = calculate_checksum(message.as_bytes());
        message.push_str(&format!("10={:03}\x01", checksum));

        message
    }
}

impl Default for FixMessage {
    fn default() -> Self {
        Self::new()
    }
}

fn sending_time() -> String {
    Utc::now().format("%Y%m%d-%H:%M:%S%.3f").to_string()
}

/// Sum of all bytes modulo 256
pub fn calculate_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b))) as u8
}

/// Check BodyLength and CheckSum of a complete frame
pub fn validate_frame(frame: &[u8]) -> Result<(), SessionError> {
    if !frame.starts_with(b"8=") {
        return Err(SessionError::Framing("missing BeginString".to_string()));
    }

    let begin_end = position(frame, SOH)
        .ok_or_else(|| SessionError::Framing("unterminated BeginString".to_string()))?;
    let rest = &frame[begin_end + 1..];
    if !rest.starts_with(b"9=") {
        return Err(SessionError::Framing("BodyLength must follow BeginString".to_string()));
    }
    let len_end = position(rest, SOH)
        .ok_or_else(|| SessionError::Framing("unterminated BodyLength".to_string()))?;
    let declared: usize = std::str::from_utf8(&rest[2..len_end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SessionError::Framing("BodyLength is not a number".to_string()))?;
    let body_start = begin_end + 1 + len_end + 1;

    // Trailer is the last field: "10=NNN<SOH>"
    if frame.len() < body_start + 7 || frame.last() != Some(&SOH) {
        return Err(SessionError::Framing("missing CheckSum".to_string()));
    }
    let trailer_start = frame.len() - 7;
    if &frame[trailer_start..trailer_start + 3] != b"10=" {
        return Err(SessionError::Framing("CheckSum must be the last field".to_string()));
    }

    let actual = trailer_start - body_start;
    if actual != declared {
        return Err(SessionError::Framing(format!(
            "BodyLength mismatch: declared {}, actual {}",
            declared, actual
        )));
    }

    let expected: u8 = std::str::from_utf8(&frame[trailer_start + 3..frame.len() - 1])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SessionError::Framing("CheckSum is not a number".to_string()))?;
    let computed = calculate_checksum(&frame[..trailer_start]);
    if computed != expected {
        return Err(SessionError::Framing(format!(
            "CheckSum mismatch: declared {:03}, computed {:03}",
            expected, computed
        )));
    }

    Ok(())
}

fn position(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

/// Split a raw message into (tag, value) pairs, keeping wire order
pub fn parse_fields(raw_message: &str) -> Vec<(u32, &str)> {
    raw_message
        .split('\x01')
        .filter_map(parse_fix_field)
        .collect()
}

pub fn parse_fix_field(field: &str) -> Option<(u32, &str)> {
    field
        .split_once('=')
        .and_then(|(tag, value)| tag.parse::<u32>().ok().map(|tag| (tag, value)))
}

/// SubscriptionRequestType (263)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionRequestType {
    Subscribe,
    Unsubscribe,
}

impl SubscriptionRequestType {
    fn as_fix(&self) -> &'static str {
        match self {
            SubscriptionRequestType::Subscribe => "1",
            SubscriptionRequestType::Unsubscribe => "2",
        }
    }
}

/// Logon (A)
pub fn create_logon(
    ids: &SessionIds,
    seq: u64,
    heartbeat_secs: u64,
    reset_seq_num: bool,
    username: &str,
    password: &str,
) -> String {
    let mut msg = FixMessage::with_header(ids, seq);
    msg.add_field(98, 0); // EncryptMethod (None)
    msg.add_field(108, heartbeat_secs); // HeartBtInt
    if reset_seq_num {
        msg.add_field(141, "Y"); // ResetSeqNumFlag
    }
    if !username.is_empty() {
        msg.add_field(553, username);
    }
    if !password.is_empty() {
        msg.add_field(554, password);
    }
    msg.build("A")
}

/// Heartbeat (0), echoing TestReqID when answering a TestRequest
pub fn create_heartbeat(ids: &SessionIds, seq: u64, test_req_id: Option<&str>) -> String {
    let mut msg = FixMessage::with_header(ids, seq);
    if let Some(id) = test_req_id {
        msg.add_field(112, id);
    }
    msg.build("0")
}

/// TestRequest (1)
pub fn create_test_request(ids: &SessionIds, seq: u64, test_req_id: &str) -> String {
    let mut msg = FixMessage::with_header(ids, seq);
    msg.add_field(112, test_req_id);
    msg.build("1")
}

/// ResendRequest (2) for the inclusive range `[begin, end]`
pub fn create_resend_request(ids: &SessionIds, seq: u64, begin: u64, end: u64) -> String {
    let mut msg = FixMessage::with_header(ids, seq);
    msg.add_field(7, begin); // BeginSeqNo
    msg.add_field(16, end); // EndSeqNo
    msg.build("2")
}

/// SequenceReset (4); in gap-fill mode it is sent as a possible duplicate at `seq`
pub fn create_sequence_reset(ids: &SessionIds, seq: u64, new_seq_no: u64, gap_fill: bool) -> String {
    let mut msg = FixMessage::with_header(ids, seq);
    if gap_fill {
        msg.add_field(43, "Y"); // PossDupFlag
        msg.add_field(123, "Y"); // GapFillFlag
    }
    msg.add_field(36, new_seq_no); // NewSeqNo
    msg.build("4")
}

/// Logout (5)
pub fn create_logout(ids: &SessionIds, seq: u64, text: Option<&str>) -> String {
    let mut msg = FixMessage::with_header(ids, seq);
    if let Some(text) = text {
        msg.add_field(58, text);
    }
    msg.build("5")
}

/// MarketDataRequest (V) for one symbol, top of book, bid and offer
pub fn create_market_data_request(
    ids: &SessionIds,
    seq: u64,
    md_req_id: &str,
    symbol: &str,
    request_type: SubscriptionRequestType,
) -> String {
    let mut msg = FixMessage::with_header(ids, seq);
    msg.add_field(262, md_req_id); // MDReqID
    msg.add_field(263, request_type.as_fix()); // SubscriptionRequestType
    msg.add_field(264, 1); // MarketDepth (top of book)
    msg.add_field(265, 1); // MDUpdateType (incremental)
    msg.add_field(146, 1); // NoRelatedSym
    msg.add_field(55, symbol);
    msg.add_field(267, 2); // NoMDEntryTypes
    msg.add_field(269, 0); // Bid
    msg.add_field(269, 1); // Offer
    msg.build("V")
}

/// MDReqID for a new subscription: `MD_<symbol>_<unix nanos>`
pub fn new_md_req_id(symbol: &str) -> String {
    let nanos = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros() * 1000);
    format!("MD_{}_{}", symbol, nanos)
}

/// Format FIX message for display (replace SOH with |)
pub fn format_for_display(message: &str) -> String {
    message.replace('\x01', " | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> SessionIds {
        SessionIds {
            sender_comp_id: "CLIENT".to_string(),
            target_comp_id: "SERVER".to_string(),
            sender_sub_id: Some("QUOTE".to_string()),
            target_sub_id: None,
        }
    }

    fn field<'a>(raw: &'a str, tag: u32) -> Option<&'a str> {
        parse_fields(raw)
            .into_iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v)
    }

    #[test]
    fn test_checksum_calculation() {
        assert_eq!(calculate_checksum(b"8=FIX.4.4\x01"), (b"8=FIX.4.4\x01".iter().map(|&b| b as u32).sum::<u32>() % 256) as u8);
        assert_eq!(calculate_checksum(&[255, 1]), 0);
    }

    #[test]
    fn test_built_message_validates() {
        let raw = create_logon(&ids(), 1, 30, true, "user", "secret");
        assert!(raw.starts_with("8=FIX.4.4\x019="));
        assert!(validate_frame(raw.as_bytes()).is_ok());

        assert_eq!(field(&raw, 35), Some("A"));
        assert_eq!(field(&raw, 108), Some("30"));
        assert_eq!(field(&raw, 141), Some("Y"));
        assert_eq!(field(&raw, 553), Some("user"));
        assert_eq!(field(&raw, 50), Some("QUOTE"));
        assert_eq!(field(&raw, 57), None);
    }

    #[test]
    fn test_header_order() {
        let raw = create_heartbeat(&ids(), 7, Some("T1"));
        let tags: Vec<u32> = parse_fields(&raw).into_iter().map(|(t, _)| t).collect();
        assert_eq!(tags, vec![8, 9, 35, 49, 56, 34, 52, 50, 112, 10]);
    }

    #[test]
    fn test_body_length_and_checksum_mismatch_rejected() {
        let raw = create_test_request(&ids(), 3, "PING");

        let bad_len = raw.replacen("9=", "9=1", 1);
        assert!(matches!(
            validate_frame(bad_len.as_bytes()),
            Err(SessionError::Framing(_))
        ));

        let mut bad_sum = raw.into_bytes();
        let n = bad_sum.len();
        bad_sum[n - 2] = if bad_sum[n - 2] == b'0' { b'1' } else { b'0' };
        assert!(matches!(
            validate_frame(&bad_sum),
            Err(SessionError::Framing(_))
        ));
    }

    #[test]
    fn test_market_data_request_layout() {
        let raw = create_market_data_request(
            &ids(),
            4,
            "MD_EURUSD_1",
            "EURUSD",
            SubscriptionRequestType::Subscribe,
        );
        let body: Vec<(u32, &str)> = parse_fields(&raw)
            .into_iter()
            .filter(|(t, _)| [262, 263, 264, 265, 146, 55, 267, 269].contains(t))
            .collect();
        assert_eq!(
            body,
            vec![
                (262, "MD_EURUSD_1"),
                (263, "1"),
                (264, "1"),
                (265, "1"),
                (146, "1"),
                (55, "EURUSD"),
                (267, "2"),
                (269, "0"),
                (269, "1"),
            ]
        );

        let unsub = create_market_data_request(
            &ids(),
            5,
            "MD_EURUSD_1",
            "EURUSD",
            SubscriptionRequestType::Unsubscribe,
        );
        assert_eq!(field(&unsub, 263), Some("2"));
    }

    #[test]
    fn test_gap_fill_is_poss_dup() {
        let raw = create_sequence_reset(&ids(), 5, 9, true);
        assert_eq!(field(&raw, 34), Some("5"));
        assert_eq!(field(&raw, 43), Some("Y"));
        assert_eq!(field(&raw, 123), Some("Y"));
        assert_eq!(field(&raw, 36), Some("9"));
    }

    #[test]
    fn test_md_req_id_format() {
        let id = new_md_req_id("XAUUSD");
        assert!(id.starts_with("MD_XAUUSD_"));
        assert!(id["MD_XAUUSD_".len()..].parse::<i64>().is_ok());
    }
}
