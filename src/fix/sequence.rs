use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Classification of an inbound MsgSeqNum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Exactly the expected number; expected has advanced
    InOrder,
    /// A new gap opened; send one ResendRequest for `[begin, end]` and queue the message
    Gap { begin: u64, end: u64 },
    /// Ahead of expected while a gap is already being recovered; queue it
    Queued,
    /// Below expected with PossDupFlag=Y; ignore
    Duplicate,
    /// Below expected without PossDupFlag; protocol violation
    TooLow { expected: u64, received: u64 },
    /// Gap wider than the configured tolerance
    GapTooLarge { expected: u64, received: u64 },
}

/// What to do about a gap that has not been filled in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapTimeout {
    None,
    Reissue { begin: u64, end: u64 },
    GiveUp,
}

#[derive(Debug, Clone, Copy)]
struct GapState {
    end: u64,
    requested_at: Instant,
    attempts: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceStats {
    pub gaps_detected: u64,
    pub resend_requests: u64,
    pub duplicates: u64,
}

/// Inbound sequence tracking with gap recovery
///
/// Messages that arrive ahead of a gap are held in `pending` (keyed by sequence number)
/// and released in order once the gap closes, either by resent messages or by a
/// SequenceReset-GapFill.
pub struct SequenceTracker<T> {
    expected: u64,
    max_gap: u64,
    gap_timeout: Duration,
    max_attempts: u32,
    pending: BTreeMap<u64, T>,
    gap: Option<GapState>,
    stats: SequenceStats,
}

impl<T> SequenceTracker<T> {
    pub fn new(max_gap: u64, gap_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            expected: 1,
            max_gap,
            gap_timeout,
            max_attempts: max_attempts.max(1),
            pending: BTreeMap::new(),
            gap: None,
            stats: SequenceStats::default(),
        }
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn stats(&self) -> SequenceStats {
        self.stats
    }

    /// Range still outstanding, if a gap is being recovered
    pub fn gap(&self) -> Option<(u64, u64)> {
        self.gap.map(|g| (self.expected, g.end))
    }

    pub fn is_resynchronizing(&self) -> bool {
        self.gap.is_some()
    }

    pub fn check(&mut self, seq: u64, poss_dup: bool, now: Instant) -> SequenceCheck {
        if seq == self.expected {
            self.expected += 1;
            return SequenceCheck::InOrder;
        }

        if seq < self.expected {
            if poss_dup {
                self.stats.duplicates += 1;
                return SequenceCheck::Duplicate;
            }
            return SequenceCheck::TooLow {
                expected: self.expected,
                received: seq,
            };
        }

        if seq - self.expected > self.max_gap {
            return SequenceCheck::GapTooLarge {
                expected: self.expected,
                received: seq,
            };
        }

        if self.gap.is_some() {
            return SequenceCheck::Queued;
        }

        let (begin, end) = (self.expected, seq - 1);
        self.start_gap(end, now);
        SequenceCheck::Gap { begin, end }
    }

    fn start_gap(&mut self, end: u64, now: Instant) {
        self.gap = Some(GapState {
            end,
            requested_at: now,
            attempts: 1,
        });
        self.stats.gaps_detected += 1;
        self.stats.resend_requests += 1;
    }

    /// Hold a message received ahead of the expected number
    pub fn queue(&mut self, seq: u64, item: T) {
        if seq >= self.expected {
            self.pending.insert(seq, item);
        }
    }

    /// Pop queued messages that are now contiguous with expected, advancing past them
    pub fn release_ready(&mut self) -> Vec<T> {
        // Anything a gap fill jumped over is stale
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() >= self.expected {
                break;
            }
            entry.remove();
        }

        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.expected) {
            ready.push(item);
            self.expected += 1;
        }

        if let Some(gap) = self.gap {
            if self.expected > gap.end {
                self.gap = None;
            }
        }
        ready
    }

    /// After the current gap closed, open the next one if queued messages still leave a hole
    pub fn next_gap(&mut self, now: Instant) -> Option<(u64, u64)> {
        if self.gap.is_some() {
            return None;
        }
        let first = *self.pending.keys().next()?;
        let end = first - 1;
        self.start_gap(end, now);
        Some((self.expected, end))
    }

    /// SequenceReset with GapFillFlag=Y; only moves forward
    pub fn gap_fill(&mut self, new_seq: u64) -> bool {
        if new_seq <= self.expected {
            return false;
        }
        self.expected = new_seq;
        true
    }

    /// SequenceReset in reset mode: expected is set unconditionally
    pub fn reset_to(&mut self, new_seq: u64) {
        self.expected = new_seq;
        self.pending.retain(|&seq, _| seq >= new_seq);
        self.gap = None;
    }

    /// Start over (new connection or Logon with ResetSeqNumFlag)
    pub fn reset(&mut self, next_expected: u64) {
        self.expected = next_expected;
        self.pending.clear();
        self.gap = None;
    }

    pub fn poll_gap_timeout(&mut self, now: Instant) -> GapTimeout {
        let Some(gap) = self.gap.as_mut() else {
            return GapTimeout::None;
        };
        if now.saturating_duration_since(gap.requested_at) < self.gap_timeout {
            return GapTimeout::None;
        }
        if gap.attempts >= self.max_attempts {
            return GapTimeout::GiveUp;
        }
        gap.attempts += 1;
        gap.requested_at = now;
        self.stats.resend_requests += 1;
        GapTimeout::Reissue {
            begin: self.expected,
            end: gap.end,
        }
    }
}
