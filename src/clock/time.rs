//! Monotonic time source for the countdown
//!
//! Timestamps are wrapping 32-bit milliseconds: the engine only ever looks at
//! differences, and 32-bit atomics are all a Cortex-M4 has.

use embassy_time::Instant;

pub trait TimeSource {
    /// Milliseconds since an arbitrary epoch, wrapping
    fn now_ms(&self) -> u32;
}

/// Uptime clock backed by the embassy time driver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now_ms(&self) -> u32 {
        Instant::now().as_millis() as u32
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

/// Milliseconds elapsed from `earlier` to `now` across a counter wrap
pub const fn elapsed_ms(now: u32, earlier: u32) -> u32 {
    now.wrapping_sub(earlier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_across_wrap() {
        assert_eq!(elapsed_ms(10, 5), 5);
        assert_eq!(elapsed_ms(4, u32::MAX - 5), 10);
    }

    #[test]
    fn test_system_time_is_monotonic() {
        let time = SystemTime;
        let a = time.now_ms();
        let b = time.now_ms();
        assert!(elapsed_ms(b, a) < 1_000);
    }
}
