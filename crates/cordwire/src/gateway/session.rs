//! Resumable session state.

/// Session identity plus the last sequence number seen.
///
/// Only exists after a READY has been received since the last
/// disconnect; the controller discards it on `disconnect()` and when a
/// resume is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session id from READY.
    pub session_id: String,
    /// Last dispatch sequence number.
    pub seq: Option<u64>,
}

impl Session {
    /// A session starting at `seq`.
    #[must_use]
    pub fn new(session_id: impl Into<String>, seq: Option<u64>) -> Self {
        Self {
            session_id: session_id.into(),
            seq,
        }
    }

    /// Record a dispatch sequence number. Sequence numbers only grow.
    pub fn observe(&mut self, seq: u64) {
        if self.seq.is_none_or(|current| seq > current) {
            self.seq = Some(seq);
        }
    }
}
