//! Shot Clock State
//!
//! The countdown state machine (`ClockEngine`), the time source it reads and
//! the read-only mirror kept by subscriber nodes.

pub mod engine;
pub mod mirror;
pub mod time;

pub use engine::{run_expiry_timer, Arm, ArmSignal, ClockEngine, Transition};
pub use mirror::ClockMirror;
pub use time::{SystemTime, TimeSource};

use serde::{Deserialize, Serialize};

/// Countdown lifecycle phase
///
/// The discriminants are the 1-byte wire encoding of the Clock State
/// characteristic and must match on publisher and subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Phase {
    Running = 0,
    Paused = 1,
    Stopped = 2,
    Expired = 3,
}

impl Phase {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Phase::Running),
            1 => Some(Phase::Paused),
            2 => Some(Phase::Stopped),
            3 => Some(Phase::Expired),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Phase {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Phase::from_u8(value).ok_or(value)
    }
}

/// Consistent `(remaining_ms, phase)` pair read from the engine or a mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockSnapshot {
    pub remaining_ms: u32,
    pub phase: Phase,
}

impl ClockSnapshot {
    /// Remaining time in whole seconds, rounded up for human display
    pub const fn seconds_ceil(&self) -> u32 {
        self.remaining_ms.div_ceil(1000)
    }
}

/// Commands accepted by the engine, from local buttons or the remote back-channel
///
/// Serialized with postcard: one byte holding the variant index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockCommand {
    Start,
    Stop,
    Pause,
    Resume,
    /// Pause when running, resume otherwise
    Toggle,
}
