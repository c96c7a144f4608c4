use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::messages::SOH;
use crate::error::SessionError;

const BEGIN_MARKER: &[u8] = b"8=FIX";
/// "10=NNN" plus SOH
const TRAILER_LEN: usize = 7;
/// Longest "8=FIX.x.y<SOH>9=NNNNNN<SOH>" prefix we wait for before calling it garbage
const MAX_PREFIX_LEN: usize = 32;
const MAX_BODY_LEN: usize = 1 << 20;

/// Splits a TCP byte stream into whole FIX frames
///
/// Decoding never fails: bytes that cannot start a frame are skipped up to the next
/// `8=FIX` with a warning, so one corrupt frame does not end the read stream.
/// Checksum validation is left to [`super::messages::validate_frame`].
#[derive(Debug, Default)]
pub struct FixFrameCodec {
    skipped_bytes: u64,
}

impl FixFrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    fn skip(&mut self, src: &mut BytesMut, count: usize, reason: &str) {
        tracing::warn!("⚠️  Dropping {} bytes from FIX stream: {}", count, reason);
        self.skipped_bytes += count as u64;
        src.advance(count);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl Decoder for FixFrameCodec {
    type Item = Bytes;
    type Error = SessionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, SessionError> {
        loop {
            let start = match find(&src[..], BEGIN_MARKER) {
                Some(start) => start,
                None => {
                    // Keep a tail that may be the beginning of a split marker
                    let keep = BEGIN_MARKER.len() - 1;
                    if src.len() > keep {
                        let drop = src.len() - keep;
                        self.skip(src, drop, "no BeginString");
                    }
                    return Ok(None);
                }
            };
            if start > 0 {
                self.skip(src, start, "data before BeginString");
            }

            let begin_end = match src.iter().position(|&b| b == SOH) {
                Some(i) => i,
                None if src.len() > MAX_PREFIX_LEN => {
                    self.skip(src, 1, "unterminated BeginString");
                    continue;
                }
                None => return Ok(None),
            };

            let rest = &src[begin_end + 1..];
            if rest.len() < 2 {
                return Ok(None);
            }
            if &rest[..2] != b"9=" {
                self.skip(src, 1, "BodyLength does not follow BeginString");
                continue;
            }

            let len_end = match rest[2..].iter().position(|&b| b == SOH) {
                Some(i) => i,
                None if rest.len() > MAX_PREFIX_LEN => {
                    self.skip(src, 1, "unterminated BodyLength");
                    continue;
                }
                None => return Ok(None),
            };

            let body_len = match std::str::from_utf8(&rest[2..2 + len_end])
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
            {
                Some(len) if len <= MAX_BODY_LEN => len,
                _ => {
                    self.skip(src, 1, "invalid BodyLength");
                    continue;
                }
            };

            let body_start = begin_end + 1 + 2 + len_end + 1;
            let total = body_start + body_len + TRAILER_LEN;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            let trailer = &src[body_start + body_len..total];
            if &trailer[..3] != b"10=" || trailer[TRAILER_LEN - 1] != SOH {
                self.skip(src, 1, "CheckSum not where BodyLength points");
                continue;
            }

            return Ok(Some(src.split_to(total).freeze()));
        }
    }
}

impl Encoder<String> for FixFrameCodec {
    type Error = SessionError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), SessionError> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}
