//! Clock Subscriber
//!
//! Subscriber half of the bridge, run on display and remote nodes. After a
//! link comes up the peer's DCLK service is discovered, both notifying
//! characteristics are subscribed, and every notification is decoded into the
//! local `ClockMirror`.
//!
//! ```text
//!  Idle ──connected──▶ Discovering ──discovered──▶ Discovered ──subscribe──▶ Subscribed
//!    ▲                                                                          │
//!    └──────────────────────────────── disconnected ────────────────────────────┘
//! ```

use super::gatt::{
    decode_state, decode_value, encode_command, ClockCharacteristic, CodecError, Uuid, CCCD_NOTIFY, DCLK_SERVICE_UUID,
};
use embassy_time::{Duration, Timer};

use super::notifications::TransportError;
use crate::clock::{ClockCommand, ClockMirror};

/// One characteristic as reported by GATT discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub value_handle: u16,
    pub cccd_handle: Option<u16>,
}

/// The peer's DCLK service as reported by GATT discovery
#[derive(Debug, Clone, Copy)]
pub struct DiscoveredService<'a> {
    pub uuid: Uuid,
    pub characteristics: &'a [DiscoveredCharacteristic],
}

/// Handles needed to receive one notifying characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NotifyHandles {
    pub value_handle: u16,
    pub cccd_handle: u16,
}

/// Handles assigned from discovery, matched by UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockHandles {
    pub value: NotifyHandles,
    pub state: NotifyHandles,
    /// Absent on controllers without the remote back-channel
    pub command: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryError {
    WrongService,
    MissingCharacteristic(ClockCharacteristic),
    MissingCccd(ClockCharacteristic),
}

impl ClockHandles {
    pub fn assign(service: &DiscoveredService<'_>) -> Result<Self, DiscoveryError> {
        if service.uuid != DCLK_SERVICE_UUID {
            return Err(DiscoveryError::WrongService);
        }

        let find = |characteristic: ClockCharacteristic| {
            service
                .characteristics
                .iter()
                .find(|c| c.uuid == characteristic.uuid())
        };
        let notify = |characteristic: ClockCharacteristic| {
            let c = find(characteristic).ok_or(DiscoveryError::MissingCharacteristic(characteristic))?;
            let cccd_handle = c.cccd_handle.ok_or(DiscoveryError::MissingCccd(characteristic))?;
            Ok(NotifyHandles {
                value_handle: c.value_handle,
                cccd_handle,
            })
        };

        Ok(Self {
            value: notify(ClockCharacteristic::Value)?,
            state: notify(ClockCharacteristic::State)?,
            command: find(ClockCharacteristic::Command).map(|c| c.value_handle),
        })
    }

    fn characteristic_for(&self, value_handle: u16) -> Option<ClockCharacteristic> {
        if value_handle == self.value.value_handle {
            Some(ClockCharacteristic::Value)
        } else if value_handle == self.state.value_handle {
            Some(ClockCharacteristic::State)
        } else {
            None
        }
    }
}

/// GATT client operations on the current link
#[allow(async_fn_in_trait)]
pub trait GattClient {
    async fn write_cccd(&mut self, cccd_handle: u16, value: u16) -> Result<(), TransportError>;
    async fn write(&mut self, value_handle: u16, data: &[u8]) -> Result<(), TransportError>;
}

/// Receives mirror changes, e.g. to redraw a display
pub trait MirrorObserver {
    fn on_mirror_update(&mut self, mirror: &ClockMirror);
    /// The mirror stopped tracking the controller
    fn on_mirror_stale(&mut self, mirror: &ClockMirror);
}

/// No-op observer
impl MirrorObserver for () {
    fn on_mirror_update(&mut self, _mirror: &ClockMirror) {}
    fn on_mirror_stale(&mut self, _mirror: &ClockMirror) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Idle,
    Discovering,
    Discovered(ClockHandles),
    Subscribed(ClockHandles),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubscribeOutcome {
    Subscribed,
    AlreadyActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubscribeError {
    /// Discovery has not completed on this link
    NotDiscovered,
    /// The peer has no command characteristic
    NoCommandChannel,
    Codec(CodecError),
    Transport(TransportError),
}

impl From<TransportError> for SubscribeError {
    fn from(e: TransportError) -> Self {
        SubscribeError::Transport(e)
    }
}

/// Whether the stack should keep delivering notifications for a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NotifyAction {
    Continue,
    Stop,
}

#[derive(Debug, Clone)]
pub struct ClockSubscriber {
    link: LinkState,
    value_subscribed: bool,
    state_subscribed: bool,
    mirror: ClockMirror,
    malformed: u32,
}

impl ClockSubscriber {
    pub const fn new() -> Self {
        Self {
            link: LinkState::Idle,
            value_subscribed: false,
            state_subscribed: false,
            mirror: ClockMirror::new(),
            malformed: 0,
        }
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn mirror(&self) -> &ClockMirror {
        &self.mirror
    }

    pub fn is_subscribed(&self, characteristic: ClockCharacteristic) -> bool {
        match characteristic {
            ClockCharacteristic::Value => self.value_subscribed,
            ClockCharacteristic::State => self.state_subscribed,
            ClockCharacteristic::Command => false,
        }
    }

    /// Notifications dropped because their payload did not decode
    pub fn malformed_count(&self) -> u32 {
        self.malformed
    }

    fn handles(&self) -> Option<ClockHandles> {
        match self.link {
            LinkState::Discovered(h) | LinkState::Subscribed(h) => Some(h),
            LinkState::Idle | LinkState::Discovering => None,
        }
    }

    pub fn on_connected(&mut self) {
        self.link = LinkState::Discovering;
        self.value_subscribed = false;
        self.state_subscribed = false;
        debug!("SUBSCRIBE: link up, discovering");
    }

    pub fn on_discovered(&mut self, service: &DiscoveredService<'_>) -> Result<ClockHandles, DiscoveryError> {
        match ClockHandles::assign(service) {
            Ok(handles) => {
                self.link = LinkState::Discovered(handles);
                info!(
                    "SUBSCRIBE: discovered value {} state {}",
                    handles.value.value_handle,
                    handles.state.value_handle
                );
                Ok(handles)
            }
            Err(e) => {
                error!("SUBSCRIBE: discovery failed: {:?}", e);
                Err(e)
            }
        }
    }

    /// Enable notifications on both characteristics
    ///
    /// Each CCCD is written independently; a failed write leaves only that
    /// characteristic unsubscribed, and a later call retries just the missing
    /// ones.
    pub async fn subscribe<C: GattClient>(&mut self, client: &mut C) -> Result<SubscribeOutcome, SubscribeError> {
        let handles = self.handles().ok_or(SubscribeError::NotDiscovered)?;

        if self.value_subscribed && self.state_subscribed {
            debug!("SUBSCRIBE: already subscribed");
            return Ok(SubscribeOutcome::AlreadyActive);
        }

        let mut first_error = None;
        if !self.value_subscribed {
            match client.write_cccd(handles.value.cccd_handle, CCCD_NOTIFY).await {
                Ok(()) => self.value_subscribed = true,
                Err(e) => {
                    warn!("SUBSCRIBE: value subscribe failed: {:?}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if !self.state_subscribed {
            match client.write_cccd(handles.state.cccd_handle, CCCD_NOTIFY).await {
                Ok(()) => self.state_subscribed = true,
                Err(e) => {
                    warn!("SUBSCRIBE: state subscribe failed: {:?}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(SubscribeError::Transport(e));
        }
        self.link = LinkState::Subscribed(handles);
        info!("SUBSCRIBE: subscribed");
        Ok(SubscribeOutcome::Subscribed)
    }

    /// `subscribe`, tried up to `attempts` times with `retry_delay` between
    /// failures. An exhausted retry leaves a link that will never notify; the
    /// caller drops it so the next connection starts from discovery.
    pub async fn subscribe_with_retry<C: GattClient>(
        &mut self,
        client: &mut C,
        attempts: u8,
        retry_delay: Duration,
    ) -> Result<SubscribeOutcome, SubscribeError> {
        let mut last_error = SubscribeError::NotDiscovered;
        for attempt in 1..=attempts {
            match self.subscribe(client).await {
                Ok(outcome) => return Ok(outcome),
                Err(SubscribeError::NotDiscovered) => return Err(SubscribeError::NotDiscovered),
                Err(e) => {
                    warn!("SUBSCRIBE: attempt {} of {} failed: {:?}", attempt, attempts, e);
                    last_error = e;
                }
            }
            if attempt < attempts {
                Timer::after(retry_delay).await;
            }
        }
        Err(last_error)
    }

    /// Handle one notification. `None` data means the stack ended the
    /// subscription for that handle.
    pub fn on_notification<O: MirrorObserver>(
        &mut self,
        value_handle: u16,
        data: Option<&[u8]>,
        observer: &mut O,
    ) -> NotifyAction {
        let Some(handles) = self.handles() else {
            return NotifyAction::Stop;
        };
        let Some(characteristic) = handles.characteristic_for(value_handle) else {
            debug!("SUBSCRIBE: notification on unknown handle {}", value_handle);
            return NotifyAction::Continue;
        };

        let Some(payload) = data else {
            match characteristic {
                ClockCharacteristic::Value => self.value_subscribed = false,
                _ => self.state_subscribed = false,
            }
            self.link = LinkState::Discovered(handles);
            self.mirror.mark_stale();
            warn!("SUBSCRIBE: {:?} unsubscribed", characteristic);
            observer.on_mirror_stale(&self.mirror);
            return NotifyAction::Stop;
        };

        let applied = match characteristic {
            ClockCharacteristic::Value => decode_value(payload).map(|ms| self.mirror.set_remaining(ms)),
            _ => decode_state(payload).map(|phase| self.mirror.set_phase(phase)),
        };
        match applied {
            Ok(()) => observer.on_mirror_update(&self.mirror),
            Err(e) => {
                self.malformed = self.malformed.wrapping_add(1);
                warn!("SUBSCRIBE: dropped malformed {:?} payload: {:?}", characteristic, e);
            }
        }
        NotifyAction::Continue
    }

    pub fn on_disconnected<O: MirrorObserver>(&mut self, observer: &mut O) {
        self.link = LinkState::Idle;
        self.value_subscribed = false;
        self.state_subscribed = false;
        self.mirror.mark_stale();
        info!("SUBSCRIBE: link down, mirror stale");
        observer.on_mirror_stale(&self.mirror);
    }

    /// Write a command to the controller's command characteristic
    pub async fn send_command<C: GattClient>(&self, client: &mut C, command: ClockCommand) -> Result<(), SubscribeError> {
        let handles = self.handles().ok_or(SubscribeError::NotDiscovered)?;
        let handle = handles.command.ok_or(SubscribeError::NoCommandChannel)?;
        let payload = encode_command(command).map_err(SubscribeError::Codec)?;
        client.write(handle, &payload).await?;
        debug!("SUBSCRIBE: sent {:?}", command);
        Ok(())
    }
}

impl Default for ClockSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::gatt::{CLOCK_COMMAND_UUID, CLOCK_STATE_UUID, CLOCK_VALUE_UUID};

    const CHARS: [DiscoveredCharacteristic; 3] = [
        DiscoveredCharacteristic {
            uuid: CLOCK_STATE_UUID,
            value_handle: 12,
            cccd_handle: Some(13),
        },
        DiscoveredCharacteristic {
            uuid: CLOCK_COMMAND_UUID,
            value_handle: 15,
            cccd_handle: None,
        },
        DiscoveredCharacteristic {
            uuid: CLOCK_VALUE_UUID,
            value_handle: 17,
            cccd_handle: Some(18),
        },
    ];

    #[test]
    fn test_handles_assigned_by_uuid_not_order() {
        let service = DiscoveredService {
            uuid: DCLK_SERVICE_UUID,
            characteristics: &CHARS,
        };
        let handles = ClockHandles::assign(&service).unwrap();
        assert_eq!(handles.value.value_handle, 17);
        assert_eq!(handles.value.cccd_handle, 18);
        assert_eq!(handles.state.value_handle, 12);
        assert_eq!(handles.command, Some(15));
    }

    #[test]
    fn test_missing_cccd_is_reported() {
        let mut chars = CHARS;
        chars[2].cccd_handle = None;
        let service = DiscoveredService {
            uuid: DCLK_SERVICE_UUID,
            characteristics: &chars,
        };
        assert_eq!(
            ClockHandles::assign(&service),
            Err(DiscoveryError::MissingCccd(ClockCharacteristic::Value))
        );
    }

    #[test]
    fn test_wrong_service() {
        let service = DiscoveredService {
            uuid: CLOCK_VALUE_UUID,
            characteristics: &CHARS,
        };
        assert_eq!(ClockHandles::assign(&service), Err(DiscoveryError::WrongService));
    }

    #[test]
    fn test_notifications_before_discovery_stop() {
        let mut sub = ClockSubscriber::new();
        assert_eq!(sub.on_notification(17, Some(&[0; 4]), &mut ()), NotifyAction::Stop);
        assert_eq!(sub.mirror().remaining_ms(), None);
    }
}
