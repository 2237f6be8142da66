// ── Idempotency window ──

use fanfleet_proto::Seq;

/// What the listener should do with a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Newer than anything seen (or outside the window); process it.
    Accept,
    /// Sequence 0: the window was reset; process it.
    Reset,
    /// Within `delta` of the last accepted sequence; drop silently.
    Duplicate,
}

/// Input-sequence filter of the external command listener.
///
/// A command with sequence `new` is dropped iff `last - delta <= new <= last`.
/// Sequence 0 always resets `last` to 0.
#[derive(Debug, Clone, Copy)]
pub struct IdempotencyWindow {
    last: Seq,
    delta: Seq,
}

impl IdempotencyWindow {
    pub fn new(delta: Seq) -> Self {
        Self { last: 0, delta }
    }

    pub fn last(&self) -> Seq {
        self.last
    }

    pub fn check(&mut self, new: Seq) -> Verdict {
        if new == 0 {
            self.last = 0;
            return Verdict::Reset;
        }

        let floor = self.last.saturating_sub(self.delta);
        if (floor..=self.last).contains(&new) {
            return Verdict::Duplicate;
        }

        self.last = new;
        Verdict::Accept
    }

    pub fn reset(&mut self) {
        self.last = 0;
    }
}
