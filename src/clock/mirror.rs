//! Read-only copy of the controller's clock, held by subscriber nodes
//!
//! Only the notification receive path writes to a mirror. The two fields
//! arrive on separate characteristics, so for one reporting cycle the pair
//! may not match (e.g. `0 ms` while still `Running`); consumers tolerate that.

use super::{ClockSnapshot, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockMirror {
    remaining_ms: Option<u32>,
    phase: Option<Phase>,
    stale: bool,
    updates: u32,
}

impl ClockMirror {
    /// Nothing received yet: stale until the first notification
    pub const fn new() -> Self {
        Self {
            remaining_ms: None,
            phase: None,
            stale: true,
            updates: 0,
        }
    }

    pub(crate) fn set_remaining(&mut self, remaining_ms: u32) {
        self.remaining_ms = Some(remaining_ms);
        self.stale = false;
        self.updates = self.updates.wrapping_add(1);
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = Some(phase);
        self.stale = false;
        self.updates = self.updates.wrapping_add(1);
    }

    /// Keep the last values but flag them as no longer live
    pub(crate) fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub fn remaining_ms(&self) -> Option<u32> {
        self.remaining_ms
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Number of field updates applied since boot
    pub fn updates(&self) -> u32 {
        self.updates
    }

    /// Both fields, once each has been received at least once
    pub fn snapshot(&self) -> Option<ClockSnapshot> {
        match (self.remaining_ms, self.phase) {
            (Some(remaining_ms), Some(phase)) => Some(ClockSnapshot { remaining_ms, phase }),
            _ => None,
        }
    }
}

impl Default for ClockMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_needs_both_fields() {
        let mut mirror = ClockMirror::new();
        assert!(mirror.is_stale());
        assert_eq!(mirror.snapshot(), None);

        mirror.set_remaining(4_200);
        assert!(!mirror.is_stale());
        assert_eq!(mirror.snapshot(), None);

        mirror.set_phase(Phase::Paused);
        assert_eq!(
            mirror.snapshot(),
            Some(ClockSnapshot {
                remaining_ms: 4_200,
                phase: Phase::Paused
            })
        );
        assert_eq!(mirror.updates(), 2);
    }

    #[test]
    fn test_stale_keeps_last_values() {
        let mut mirror = ClockMirror::new();
        mirror.set_remaining(1_000);
        mirror.set_phase(Phase::Running);
        mirror.mark_stale();
        assert!(mirror.is_stale());
        assert_eq!(mirror.remaining_ms(), Some(1_000));
    }
}
