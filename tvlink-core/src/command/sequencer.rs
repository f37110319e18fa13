//! Per-connection sequence id allocation.

/// Correlator between a request and its response/approve.
pub type SeqId = u32;

/// Monotonic sequence id counter, one per inner connection.
///
/// Ids start at 1 and wrap at `u32::MAX`. Wrapping is harmless as long as
/// far fewer than 2^32 requests are outstanding at once; that is assumed,
/// not enforced.
#[derive(Debug)]
pub struct Sequencer {
    next: SeqId,
}

impl Sequencer {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> SeqId {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }

    /// Start a fresh id space (new connection).
    pub fn reset(&mut self) {
        self.next = 1;
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}
