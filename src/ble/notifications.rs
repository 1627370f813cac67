//! Notification Service
//!
//! Publisher half of the bridge: tracks which clock characteristics the
//! connected peer has subscribed to and pushes the engine's state to it,
//! periodically and immediately on expiry.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Timer};

use super::gatt::{encode_state, encode_value, read_payload, ClockCharacteristic};
use crate::clock::{ClockEngine, ClockSnapshot, TimeSource};

/// Errors reported by the link when sending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// No connected peer
    NotConnected,
    /// Stack out of transmit buffers; retried next cycle
    Busy,
    /// Link not encrypted/authenticated enough for the operation
    Insufficient,
    /// Any other stack error, with its raw code
    Stack(u32),
}

/// Sends one notification on the current link
pub trait NotifyTransport {
    fn notify(&mut self, characteristic: ClockCharacteristic, payload: &[u8]) -> Result<(), TransportError>;
}

impl<N: NotifyTransport + ?Sized> NotifyTransport for &mut N {
    fn notify(&mut self, characteristic: ClockCharacteristic, payload: &[u8]) -> Result<(), TransportError> {
        (**self).notify(characteristic, payload)
    }
}

/// Local attribute table served to GATT reads. Writing it sends nothing.
pub trait AttributeStore {
    fn store(&mut self, characteristic: ClockCharacteristic, payload: &[u8]) -> Result<(), TransportError>;
}

impl<S: AttributeStore + ?Sized> AttributeStore for &mut S {
    fn store(&mut self, characteristic: ClockCharacteristic, payload: &[u8]) -> Result<(), TransportError> {
        (**self).store(characteristic, payload)
    }
}

/// Write the snapshot into the readable attributes, value then state
pub fn store_snapshot<S: AttributeStore>(attributes: &mut S, snapshot: ClockSnapshot) {
    for characteristic in [ClockCharacteristic::Value, ClockCharacteristic::State] {
        if let Err(e) = attributes.store(characteristic, &read_payload(characteristic, snapshot)) {
            debug!("NOTIFY: {:?} value not stored: {:?}", characteristic, e);
        }
    }
}

/// Per-characteristic subscription flags of the connected peer
///
/// Written from the GATT event path, read by the reporter.
pub struct Subscriptions {
    value: AtomicBool,
    state: AtomicBool,
}

impl Subscriptions {
    pub const fn new() -> Self {
        Self {
            value: AtomicBool::new(false),
            state: AtomicBool::new(false),
        }
    }

    fn flag(&self, characteristic: ClockCharacteristic) -> Option<&AtomicBool> {
        match characteristic {
            ClockCharacteristic::Value => Some(&self.value),
            ClockCharacteristic::State => Some(&self.state),
            ClockCharacteristic::Command => None,
        }
    }

    /// Apply a CCCD write. Enabling requires an authorized link; disabling is
    /// always accepted. Returns the resulting subscription state.
    pub fn on_cccd_write(&self, characteristic: ClockCharacteristic, enabled: bool, authorized: bool) -> bool {
        let Some(flag) = self.flag(characteristic) else {
            warn!("NOTIFY: CCCD write on non-notifying {:?}", characteristic);
            return false;
        };

        if enabled && !authorized {
            warn!("NOTIFY: subscription to {:?} refused, link not authenticated", characteristic);
            flag.store(false, Ordering::Release);
            return false;
        }

        flag.store(enabled, Ordering::Release);
        info!("NOTIFY: {:?} notifications {}", characteristic, if enabled { "on" } else { "off" });
        enabled
    }

    pub fn is_subscribed(&self, characteristic: ClockCharacteristic) -> bool {
        self.flag(characteristic)
            .map(|f| f.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Subscriptions do not outlive the link
    pub fn clear(&self) {
        self.value.store(false, Ordering::Release);
        self.state.store(false, Ordering::Release);
    }
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishOutcome {
    Sent,
    /// Skipped, the peer has not enabled notifications
    NotSubscribed,
}

/// Per-characteristic result of one publish cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PublishReport {
    pub value: Result<PublishOutcome, TransportError>,
    pub state: Result<PublishOutcome, TransportError>,
}

impl PublishReport {
    pub fn sent_count(&self) -> u8 {
        [self.value, self.state]
            .iter()
            .filter(|r| matches!(r, Ok(PublishOutcome::Sent)))
            .count() as u8
    }

    pub fn is_ok(&self) -> bool {
        self.value.is_ok() && self.state.is_ok()
    }
}

/// Publish statistics, readable from any context
pub struct PublishStats {
    cycles: AtomicU32,
    failures: AtomicU32,
}

impl PublishStats {
    pub const fn new() -> Self {
        Self {
            cycles: AtomicU32::new(0),
            failures: AtomicU32::new(0),
        }
    }

    pub fn cycles(&self) -> u32 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl Default for PublishStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes a snapshot and notifies each subscribed characteristic
pub struct ClockPublisher<'a> {
    subscriptions: &'a Subscriptions,
    stats: PublishStats,
}

impl<'a> ClockPublisher<'a> {
    pub const fn new(subscriptions: &'a Subscriptions) -> Self {
        Self {
            subscriptions,
            stats: PublishStats::new(),
        }
    }

    pub fn stats(&self) -> &PublishStats {
        &self.stats
    }

    fn send_one<N: NotifyTransport>(
        &self,
        transport: &mut N,
        characteristic: ClockCharacteristic,
        payload: &[u8],
    ) -> Result<PublishOutcome, TransportError> {
        if !self.subscriptions.is_subscribed(characteristic) {
            return Ok(PublishOutcome::NotSubscribed);
        }
        match transport.notify(characteristic, payload) {
            Ok(()) => Ok(PublishOutcome::Sent),
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!("NOTIFY: {:?} notification failed: {:?}", characteristic, e);
                Err(e)
            }
        }
    }

    /// Value first, then state. A failure on one does not skip the other.
    pub fn publish<N: NotifyTransport>(&self, snapshot: ClockSnapshot, transport: &mut N) -> PublishReport {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        let value = self.send_one(transport, ClockCharacteristic::Value, &encode_value(snapshot.remaining_ms));
        let state = self.send_one(transport, ClockCharacteristic::State, &encode_state(snapshot.phase));
        trace!(
            "NOTIFY: published {} ms / {:?}",
            snapshot.remaining_ms,
            snapshot.phase
        );
        PublishReport { value, state }
    }
}

/// One reporting cycle: sample the engine and publish
pub fn report_once<T: TimeSource, N: NotifyTransport>(
    engine: &ClockEngine<T>,
    publisher: &ClockPublisher<'_>,
    transport: &mut N,
) -> PublishReport {
    engine.expire_if_due();
    publisher.publish(engine.snapshot(), transport)
}

/// Periodic reporter task body
///
/// Publishes every `interval`, and at once when the countdown expires so the
/// terminal zero is not delayed by up to a full interval. The readable
/// attributes follow the same snapshot.
pub async fn run_reporter<T: TimeSource, N: NotifyTransport, S: AttributeStore>(
    engine: &ClockEngine<T>,
    publisher: &ClockPublisher<'_>,
    mut transport: N,
    mut attributes: S,
    interval: Duration,
) -> ! {
    info!("NOTIFY: reporter every {} ms", interval.as_millis());
    loop {
        if let Either::Second(snapshot) = select(Timer::after(interval), engine.wait_expired()).await {
            debug!("NOTIFY: expiry push at {} ms", snapshot.remaining_ms);
        }
        report_once(engine, publisher, &mut transport);
        store_snapshot(&mut attributes, engine.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Sink {
        sent: heapless::Vec<(ClockCharacteristic, heapless::Vec<u8, 4>), 8>,
        fail_value: bool,
    }

    impl NotifyTransport for Sink {
        fn notify(&mut self, characteristic: ClockCharacteristic, payload: &[u8]) -> Result<(), TransportError> {
            if self.fail_value && characteristic == ClockCharacteristic::Value {
                return Err(TransportError::Busy);
            }
            let mut data = heapless::Vec::new();
            data.extend_from_slice(payload).unwrap();
            self.sent.push((characteristic, data)).unwrap();
            Ok(())
        }
    }

    fn snapshot() -> ClockSnapshot {
        ClockSnapshot {
            remaining_ms: 10_000,
            phase: crate::clock::Phase::Running,
        }
    }

    #[test]
    fn test_unauthorized_subscription_refused() {
        let subs = Subscriptions::new();
        assert!(!subs.on_cccd_write(ClockCharacteristic::Value, true, false));
        assert!(!subs.is_subscribed(ClockCharacteristic::Value));
        assert!(subs.on_cccd_write(ClockCharacteristic::Value, true, true));
        assert!(!subs.on_cccd_write(ClockCharacteristic::Value, false, false));
        assert!(!subs.on_cccd_write(ClockCharacteristic::Command, true, true));
    }

    #[test]
    fn test_publish_skips_unsubscribed() {
        let subs = Subscriptions::new();
        subs.on_cccd_write(ClockCharacteristic::State, true, true);
        let publisher = ClockPublisher::new(&subs);
        let mut sink = Sink::default();

        let report = publisher.publish(snapshot(), &mut sink);
        assert_eq!(report.value, Ok(PublishOutcome::NotSubscribed));
        assert_eq!(report.state, Ok(PublishOutcome::Sent));
        assert_eq!(sink.sent.len(), 1);
        assert_eq!(sink.sent[0].1.as_slice(), &[0]);
    }

    #[test]
    fn test_failure_does_not_skip_state() {
        let subs = Subscriptions::new();
        subs.on_cccd_write(ClockCharacteristic::Value, true, true);
        subs.on_cccd_write(ClockCharacteristic::State, true, true);
        let publisher = ClockPublisher::new(&subs);
        let mut sink = Sink {
            fail_value: true,
            ..Default::default()
        };

        let report = publisher.publish(snapshot(), &mut sink);
        assert_eq!(report.value, Err(TransportError::Busy));
        assert_eq!(report.state, Ok(PublishOutcome::Sent));
        assert_eq!(report.sent_count(), 1);
        assert_eq!(publisher.stats().failures(), 1);
        assert_eq!(publisher.stats().cycles(), 1);
    }

    #[test]
    fn test_clear_drops_all() {
        let subs = Subscriptions::new();
        subs.on_cccd_write(ClockCharacteristic::Value, true, true);
        subs.on_cccd_write(ClockCharacteristic::State, true, true);
        subs.clear();
        assert!(!subs.is_subscribed(ClockCharacteristic::Value));
        assert!(!subs.is_subscribed(ClockCharacteristic::State));
    }
}
