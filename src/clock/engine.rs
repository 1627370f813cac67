//! Countdown Engine
//!
//! Single source of truth for the shot clock on the controller node.
//!
//! The state is shared between three execution contexts: the deferred-work
//! context issuing commands, the expiry path and the periodic reporter. Every
//! access goes through a short critical section on a `Cell`, so reads are
//! always a consistent `(remaining_ms, phase)` pair and nothing ever waits on
//! a lock.
//!
//! Each arm or cancel bumps an epoch. An expiry carries the epoch it was armed
//! with and is dropped if the countdown has since been stopped, paused or
//! re-armed, which makes cancellation effective as soon as `stop()`/`pause()`
//! return.

use core::cell::Cell;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;

use super::time::{elapsed_ms, TimeSource};
use super::{ClockCommand, ClockSnapshot, Phase};
use crate::config::ClockConfig;

/// One armed countdown, as handed to the expiry timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Arm {
    pub epoch: u32,
    pub armed_at_ms: u32,
    pub duration_ms: u32,
}

impl Arm {
    /// Time left on this arm at `now_ms`
    pub const fn remaining_at(&self, now_ms: u32) -> u32 {
        self.duration_ms.saturating_sub(elapsed_ms(now_ms, self.armed_at_ms))
    }
}

/// Latest instruction for the expiry timer; newer values replace older ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArmSignal {
    Arm(Arm),
    Cancel,
}

/// Phase change produced by a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
}

#[derive(Debug, Clone, Copy)]
struct Countdown {
    phase: Phase,
    /// Value reported while not running
    frozen_ms: u32,
    armed_at_ms: u32,
    armed_for_ms: u32,
    epoch: u32,
    /// Live value captured by the last stop
    last_live_ms: u32,
}

impl Countdown {
    const fn boot(default_duration_ms: u32) -> Self {
        Self {
            phase: Phase::Stopped,
            frozen_ms: default_duration_ms,
            armed_at_ms: 0,
            armed_for_ms: 0,
            epoch: 0,
            last_live_ms: 0,
        }
    }

    fn live_remaining(&self, now_ms: u32) -> u32 {
        match self.phase {
            Phase::Running => self
                .armed_for_ms
                .saturating_sub(elapsed_ms(now_ms, self.armed_at_ms)),
            _ => self.frozen_ms,
        }
    }

    fn arm(&mut self, now_ms: u32, duration_ms: u32) -> Arm {
        self.epoch = self.epoch.wrapping_add(1);
        self.phase = Phase::Running;
        self.frozen_ms = duration_ms;
        self.armed_at_ms = now_ms;
        self.armed_for_ms = duration_ms;
        Arm {
            epoch: self.epoch,
            armed_at_ms: now_ms,
            duration_ms,
        }
    }

    fn cancel(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }
}

pub struct ClockEngine<T: TimeSource> {
    time: T,
    default_duration_ms: u32,
    start_on_boot: bool,
    state: Mutex<CriticalSectionRawMutex, Cell<Countdown>>,
    arm: Signal<CriticalSectionRawMutex, ArmSignal>,
    expired: Signal<CriticalSectionRawMutex, ClockSnapshot>,
}

impl<T: TimeSource> ClockEngine<T> {
    pub const fn new(time: T, config: ClockConfig) -> Self {
        Self {
            time,
            default_duration_ms: config.default_duration_ms,
            start_on_boot: config.start_on_boot,
            state: Mutex::new(Cell::new(Countdown::boot(config.default_duration_ms))),
            arm: Signal::new(),
            expired: Signal::new(),
        }
    }

    /// Apply the boot policy. Without `start_on_boot` the clock stays stopped
    /// showing the full default duration.
    pub fn boot(&self) -> Phase {
        if self.start_on_boot {
            self.start(self.default_duration_ms).to
        } else {
            info!("CLOCK: booted stopped at {} ms", self.default_duration_ms);
            self.phase()
        }
    }

    pub fn default_duration_ms(&self) -> u32 {
        self.default_duration_ms
    }

    pub fn now_ms(&self) -> u32 {
        self.time.now_ms()
    }

    fn update<R>(&self, f: impl FnOnce(&mut Countdown) -> R) -> R {
        self.state.lock(|cell| {
            let mut countdown = cell.get();
            let result = f(&mut countdown);
            cell.set(countdown);
            result
        })
    }

    /// (Re)arm the countdown from `duration_ms`. Always succeeds and
    /// supersedes any in-flight expiry.
    pub fn start(&self, duration_ms: u32) -> Transition {
        let now = self.time.now_ms();
        let (from, arm) = self.update(|c| (c.phase, c.arm(now, duration_ms)));
        self.arm.signal(ArmSignal::Arm(arm));
        info!("CLOCK: start {} ms (epoch {})", duration_ms, arm.epoch);
        Transition {
            from,
            to: Phase::Running,
        }
    }

    /// Stop from any phase. The reported value is forced to 0; the live value
    /// at the stop instant is kept in `last_live_ms`.
    pub fn stop(&self) -> Transition {
        let now = self.time.now_ms();
        let (from, last_live) = self.update(|c| {
            let from = c.phase;
            c.last_live_ms = c.live_remaining(now);
            c.cancel();
            c.phase = Phase::Stopped;
            c.frozen_ms = 0;
            (from, c.last_live_ms)
        });
        self.arm.signal(ArmSignal::Cancel);
        info!("CLOCK: stop from {:?}, {} ms left", from, last_live);
        Transition {
            from,
            to: Phase::Stopped,
        }
    }

    /// Freeze a running countdown. No-op in any other phase.
    pub fn pause(&self) -> Transition {
        let now = self.time.now_ms();
        let transition = self.update(|c| {
            let from = c.phase;
            if from == Phase::Running {
                c.frozen_ms = c.live_remaining(now);
                c.cancel();
                c.phase = Phase::Paused;
            }
            Transition { from, to: c.phase }
        });

        if transition.from == Phase::Running {
            self.arm.signal(ArmSignal::Cancel);
            debug!("CLOCK: paused");
        } else {
            debug!("CLOCK: pause ignored in {:?}", transition.from);
        }
        transition
    }

    /// Re-arm from the frozen value when paused, otherwise behave like
    /// `start(default_duration)`.
    pub fn resume(&self) -> Transition {
        let now = self.time.now_ms();
        let resumed = self.update(|c| {
            if c.phase == Phase::Paused {
                let frozen = c.frozen_ms;
                Some(c.arm(now, frozen))
            } else {
                None
            }
        });

        match resumed {
            Some(arm) => {
                self.arm.signal(ArmSignal::Arm(arm));
                debug!("CLOCK: resumed with {} ms", arm.duration_ms);
                Transition {
                    from: Phase::Paused,
                    to: Phase::Running,
                }
            }
            None => self.start(self.default_duration_ms),
        }
    }

    /// Deadline transition. Only an expiry for the current arm of a running
    /// countdown has any effect. Never blocks; safe from the timer context.
    pub fn on_expire(&self, epoch: u32) -> bool {
        let expired = self.update(|c| {
            if c.phase == Phase::Running && c.epoch == epoch {
                c.phase = Phase::Expired;
                c.frozen_ms = 0;
                true
            } else {
                false
            }
        });

        if expired {
            self.expired.signal(ClockSnapshot {
                remaining_ms: 0,
                phase: Phase::Expired,
            });
        }
        expired
    }

    /// Expire the running countdown if its deadline has passed
    pub fn expire_if_due(&self) -> bool {
        let now = self.time.now_ms();
        let due = self.update(|c| {
            (c.phase == Phase::Running && c.live_remaining(now) == 0).then_some(c.epoch)
        });
        match due {
            Some(epoch) => self.on_expire(epoch),
            None => false,
        }
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        let now = self.time.now_ms();
        self.state.lock(|cell| {
            let c = cell.get();
            ClockSnapshot {
                remaining_ms: c.live_remaining(now),
                phase: c.phase,
            }
        })
    }

    pub fn phase(&self) -> Phase {
        self.state.lock(|cell| cell.get().phase)
    }

    /// Live remaining value captured by the most recent `stop()`
    pub fn last_live_ms(&self) -> u32 {
        self.state.lock(|cell| cell.get().last_live_ms)
    }

    pub fn apply(&self, command: ClockCommand) -> Transition {
        match command {
            ClockCommand::Start => self.start(self.default_duration_ms),
            ClockCommand::Stop => self.stop(),
            ClockCommand::Pause => self.pause(),
            ClockCommand::Resume => self.resume(),
            ClockCommand::Toggle => {
                if self.phase() == Phase::Running {
                    self.pause()
                } else {
                    self.resume()
                }
            }
        }
    }

    /// Wait for the next arm/cancel instruction
    pub async fn next_arm(&self) -> ArmSignal {
        self.arm.wait().await
    }

    /// Wait until a countdown expires
    pub async fn wait_expired(&self) -> ClockSnapshot {
        self.expired.wait().await
    }
}

/// Expiry timer loop
///
/// Sleeps until the deadline of the most recent arm, restarting the wait
/// whenever a newer arm or a cancel arrives, and fires `on_expire` with the
/// epoch it was armed with.
pub async fn run_expiry_timer<T: TimeSource>(engine: &ClockEngine<T>) -> ! {
    let mut pending = engine.next_arm().await;
    loop {
        pending = match pending {
            ArmSignal::Cancel => engine.next_arm().await,
            ArmSignal::Arm(arm) => {
                let left = arm.remaining_at(engine.now_ms());
                match select(Timer::after_millis(left as u64), engine.next_arm()).await {
                    Either::First(()) => {
                        if engine.on_expire(arm.epoch) {
                            info!("CLOCK: expired (epoch {})", arm.epoch);
                        }
                        engine.next_arm().await
                    }
                    Either::Second(next) => next,
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct FakeTime(AtomicU32);

    impl FakeTime {
        fn advance(&self, ms: u32) {
            self.0.fetch_add(ms, Ordering::Relaxed);
        }
    }

    impl TimeSource for FakeTime {
        fn now_ms(&self) -> u32 {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn engine() -> ClockEngine<FakeTime> {
        ClockEngine::new(FakeTime(AtomicU32::new(1_000)), ClockConfig::new())
    }

    #[test]
    fn test_boots_stopped_at_full_duration() {
        let engine = engine();
        assert_eq!(engine.boot(), Phase::Stopped);
        assert_eq!(
            engine.snapshot(),
            ClockSnapshot {
                remaining_ms: 10_000,
                phase: Phase::Stopped
            }
        );
    }

    #[test]
    fn test_start_on_boot() {
        let engine = ClockEngine::new(
            FakeTime(AtomicU32::new(0)),
            ClockConfig {
                default_duration_ms: 5_000,
                start_on_boot: true,
            },
        );
        assert_eq!(engine.boot(), Phase::Running);
        assert_eq!(engine.snapshot().remaining_ms, 5_000);
    }

    #[test]
    fn test_countdown_runs_down() {
        let engine = engine();
        engine.start(10_000);
        engine.time.advance(300);
        assert_eq!(engine.snapshot().remaining_ms, 9_700);
        engine.time.advance(20_000);
        assert_eq!(engine.snapshot().remaining_ms, 0);
    }

    #[test]
    fn test_stop_zeroes_and_keeps_last_live_value() {
        let engine = engine();
        engine.start(10_000);
        engine.time.advance(2_500);
        let t = engine.stop();
        assert_eq!(t.from, Phase::Running);
        assert_eq!(engine.snapshot().remaining_ms, 0);
        assert_eq!(engine.last_live_ms(), 7_500);
    }

    #[test]
    fn test_stale_epoch_does_not_expire() {
        let engine = engine();
        engine.start(1_000);
        let ArmSignal::Arm(first) = engine.arm.try_take().unwrap() else {
            panic!("expected an arm");
        };
        engine.start(1_000);
        assert!(!engine.on_expire(first.epoch));
        assert_eq!(engine.phase(), Phase::Running);
    }

    #[test]
    fn test_expiry_after_stop_is_ignored() {
        let engine = engine();
        engine.start(1_000);
        let ArmSignal::Arm(arm) = engine.arm.try_take().unwrap() else {
            panic!("expected an arm");
        };
        engine.stop();
        assert_eq!(engine.arm.try_take(), Some(ArmSignal::Cancel));
        assert!(!engine.on_expire(arm.epoch));
        assert_eq!(engine.phase(), Phase::Stopped);
    }

    #[test]
    fn test_toggle_pauses_and_resumes() {
        let engine = engine();
        assert_eq!(engine.apply(ClockCommand::Toggle).to, Phase::Running);
        engine.time.advance(1_000);
        assert_eq!(engine.apply(ClockCommand::Toggle).to, Phase::Paused);
        engine.time.advance(5_000);
        assert_eq!(engine.snapshot().remaining_ms, 9_000);
        assert_eq!(engine.apply(ClockCommand::Toggle).to, Phase::Running);
        assert_eq!(engine.snapshot().remaining_ms, 9_000);
    }

    #[test]
    fn test_expire_if_due_signals_reporter() {
        let engine = engine();
        engine.start(500);
        assert!(!engine.expire_if_due());
        engine.time.advance(500);
        assert!(engine.expire_if_due());
        assert_eq!(
            engine.expired.try_take(),
            Some(ClockSnapshot {
                remaining_ms: 0,
                phase: Phase::Expired
            })
        );
        // Only once
        assert!(!engine.expire_if_due());
    }
}
