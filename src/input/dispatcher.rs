//! Input Dispatcher
//!
//! Two halves around a bounded channel. `InputQueue::record_edge` runs in the
//! GPIO interrupt/edge-wait context: it filters by edge policy, debounces with
//! atomics and `try_send`s, never blocking. `InputDispatcher` runs in task
//! context, counts events and calls the role's `ButtonHandler`.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use super::button::{ButtonConfig, ButtonEvent, ButtonId, Edge};
use crate::clock::time::elapsed_ms;

pub const INPUT_QUEUE_DEPTH: usize = 8;

/// What happened to a raw edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordOutcome {
    Queued,
    /// Edge direction not selected by the button's policy
    Filtered,
    /// Inside the debounce window of the previous edge
    Debounced,
    /// Queue full; event lost
    Dropped,
}

pub struct InputQueue {
    channel: Channel<CriticalSectionRawMutex, ButtonEvent, INPUT_QUEUE_DEPTH>,
    last_edge_ms: [AtomicU32; ButtonId::COUNT],
    seen: [AtomicBool; ButtonId::COUNT],
    dropped: AtomicU32,
}

impl InputQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            last_edge_ms: [const { AtomicU32::new(0) }; ButtonId::COUNT],
            seen: [const { AtomicBool::new(false) }; ButtonId::COUNT],
            dropped: AtomicU32::new(0),
        }
    }

    /// Record a raw edge. Never blocks.
    ///
    /// Debounce runs on the raw edge before the policy filter, so a filtered
    /// edge still opens a window and its contact bounce cannot pass as the
    /// opposite edge.
    pub fn record_edge(&self, button: &ButtonConfig, edge: Edge, now_ms: u32) -> RecordOutcome {
        let i = button.id.index();
        if self.seen[i].load(Ordering::Acquire) {
            let last = self.last_edge_ms[i].load(Ordering::Acquire);
            if elapsed_ms(now_ms, last) < button.debounce_ms as u32 {
                return RecordOutcome::Debounced;
            }
        }
        self.last_edge_ms[i].store(now_ms, Ordering::Release);
        self.seen[i].store(true, Ordering::Release);

        if !button.policy.accepts(edge) {
            return RecordOutcome::Filtered;
        }

        let event = ButtonEvent {
            id: button.id,
            edge,
            at_ms: now_ms,
        };
        match self.channel.try_send(event) {
            Ok(()) => RecordOutcome::Queued,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                RecordOutcome::Dropped
            }
        }
    }

    /// Events lost to a full queue since boot
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn try_next(&self) -> Option<ButtonEvent> {
        self.channel.try_receive().ok()
    }

    pub async fn next(&self) -> ButtonEvent {
        self.channel.receive().await
    }
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Role-specific button behaviour
pub trait ButtonHandler {
    fn on_button(&mut self, event: ButtonEvent);
}

impl<H: ButtonHandler + ?Sized> ButtonHandler for &mut H {
    fn on_button(&mut self, event: ButtonEvent) {
        (**self).on_button(event)
    }
}

pub struct InputDispatcher<H> {
    handler: H,
    counts: [u32; ButtonId::COUNT],
}

impl<H: ButtonHandler> InputDispatcher<H> {
    pub const fn new(handler: H) -> Self {
        Self {
            handler,
            counts: [0; ButtonId::COUNT],
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Events dispatched for `id` since boot
    pub fn count(&self, id: ButtonId) -> u32 {
        self.counts[id.index()]
    }

    pub fn dispatch(&mut self, event: ButtonEvent) {
        let count = &mut self.counts[event.id.index()];
        *count = count.wrapping_add(1);
        info!("INPUT: {:?} {:?} (#{})", event.id, event.edge, *count);
        self.handler.on_button(event);
    }

    /// Drain whatever is queued without waiting
    pub fn dispatch_pending(&mut self, queue: &InputQueue) -> usize {
        let mut n = 0;
        while let Some(event) = queue.try_next() {
            self.dispatch(event);
            n += 1;
        }
        n
    }

    /// Input task body
    pub async fn run(&mut self, queue: &InputQueue) -> ! {
        loop {
            let event = queue.next().await;
            self.dispatch(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::EdgePolicy;

    const START: ButtonConfig = ButtonConfig::new(ButtonId::Start, EdgePolicy::Rising, 20);

    #[test]
    fn test_bounce_is_suppressed() {
        let queue = InputQueue::new();
        assert_eq!(queue.record_edge(&START, Edge::Press, 100), RecordOutcome::Queued);
        assert_eq!(queue.record_edge(&START, Edge::Release, 105), RecordOutcome::Debounced);
        assert_eq!(queue.record_edge(&START, Edge::Press, 110), RecordOutcome::Debounced);
        assert_eq!(queue.record_edge(&START, Edge::Press, 120), RecordOutcome::Queued);
    }

    #[test]
    fn test_release_bounce_is_not_a_new_press() {
        let queue = InputQueue::new();
        assert_eq!(queue.record_edge(&START, Edge::Press, 100), RecordOutcome::Queued);
        assert_eq!(queue.record_edge(&START, Edge::Release, 5_100), RecordOutcome::Filtered);
        assert_eq!(queue.record_edge(&START, Edge::Press, 5_105), RecordOutcome::Debounced);
        assert_eq!(queue.record_edge(&START, Edge::Release, 5_112), RecordOutcome::Debounced);
        assert_eq!(queue.try_next().map(|e| e.at_ms), Some(100));
        assert_eq!(queue.try_next(), None);
    }

    #[test]
    fn test_first_edge_at_time_zero() {
        let queue = InputQueue::new();
        assert_eq!(queue.record_edge(&START, Edge::Press, 0), RecordOutcome::Queued);
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let queue = InputQueue::new();
        for n in 0..INPUT_QUEUE_DEPTH as u32 {
            assert_eq!(queue.record_edge(&START, Edge::Press, n * 100), RecordOutcome::Queued);
        }
        assert_eq!(queue.record_edge(&START, Edge::Press, 10_000), RecordOutcome::Dropped);
        assert_eq!(queue.dropped(), 1);
    }
}
