//! Node Configuration
//!
//! Compile-time defaults for the shot clock nodes. Every node is built from a
//! `NodeConfig`; the role constructors fill in the button map and name used by
//! each firmware image.

use heapless::String;

use crate::input::{ButtonConfig, ButtonId, EdgePolicy};

/// Full countdown length armed by "start" (ms)
pub const DEFAULT_DURATION_MS: u32 = 10_000;

/// Period of the clock replication loop (ms)
pub const SYNC_INTERVAL_MS: u32 = 300;

/// Default debounce window for every button (ms)
pub const DEFAULT_DEBOUNCE_MS: u16 = 20;

/// Holding the remote's pair button this long clears all bonds (ms)
pub const LONG_PRESS_MS: u32 = 3_000;

/// Pairing mode closes on its own after this long without a bond (ms)
pub const PAIRING_TIMEOUT_MS: u32 = 60_000;

/// Fixed passkey shown/entered during pairing
pub const STATIC_PASSKEY: u32 = 123_456;

/// ASCII digits of a six-digit passkey, zero padded
pub const fn passkey_digits(passkey: u32) -> [u8; 6] {
    let mut digits = [b'0'; 6];
    let mut rest = passkey;
    let mut i = 6;
    while i > 0 {
        i -= 1;
        digits[i] = b'0' + (rest % 10) as u8;
        rest /= 10;
    }
    digits
}

/// Maximum number of known peers (bonded or connected)
pub const MAX_PEERS: usize = 4;

/// Simultaneous links per node
pub const MAX_LINKS: usize = 1;

/// Maximum device name length allowed by GAP
pub const MAX_DEVICE_NAME_LEN: usize = 32;

pub const CONTROLLER_NAME: &str = "DCLK-Controller";
pub const DISPLAY_NAME: &str = "DCLK-Display";
pub const REMOTE_NAME: &str = "DCLK-Remote";

/// Which firmware image this configuration describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeRole {
    /// Owns the countdown, GATT server
    Controller,
    /// Mirrors the countdown, GATT client
    Display,
    /// Mirrors the countdown and sends commands back to the controller
    Remote,
}

/// What entering pairing mode does to the existing bonds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BondPolicy {
    /// Delete every bond before opening up (forced re-pair workflow)
    ClearOnPairing,
    /// Keep existing bonds, new peers are added alongside them
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockConfig {
    pub default_duration_ms: u32,
    /// Arm the countdown at boot instead of waiting for "start"
    pub start_on_boot: bool,
}

impl ClockConfig {
    pub const fn new() -> Self {
        Self {
            default_duration_ms: DEFAULT_DURATION_MS,
            start_on_boot: false,
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PairingConfig {
    pub bond_policy: BondPolicy,
    /// 0 disables the timeout
    pub timeout_ms: u32,
}

impl PairingConfig {
    pub const fn new() -> Self {
        Self {
            bond_policy: BondPolicy::ClearOnPairing,
            timeout_ms: PAIRING_TIMEOUT_MS,
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionParams {
    /// Minimum connection interval (units of 1.25ms)
    pub min_conn_interval: u16,
    /// Maximum connection interval (units of 1.25ms)
    pub max_conn_interval: u16,
    /// Slave latency
    pub slave_latency: u16,
    /// Supervision timeout (units of 10ms)
    pub supervision_timeout: u16,
}

impl ConnectionParams {
    /// Within the GAP ranges, and the supervision timeout outlasts two
    /// maximum intervals including skipped (latency) events
    pub const fn is_valid(&self) -> bool {
        let intervals_ok = self.min_conn_interval >= 6
            && self.max_conn_interval <= 3200
            && self.min_conn_interval <= self.max_conn_interval;
        let timeout_ok = self.supervision_timeout >= 10 && self.supervision_timeout <= 3200;
        let latency_ok = self.slave_latency <= 499;
        intervals_ok
            && timeout_ok
            && latency_ok
            && (self.supervision_timeout as u32) * 4 > (1 + self.slave_latency as u32) * self.max_conn_interval as u32
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            min_conn_interval: 24, // 30ms
            max_conn_interval: 40, // 50ms
            slave_latency: 0,
            supervision_timeout: 400, // 4s
        }
    }
}

/// Per-node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub role: NodeRole,
    pub device_name: String<MAX_DEVICE_NAME_LEN>,
    pub clock: ClockConfig,
    pub pairing: PairingConfig,
    pub sync_interval_ms: u32,
    pub conn_params: ConnectionParams,
    pub buttons: heapless::Vec<ButtonConfig, 4>,
}

impl NodeConfig {
    fn base(role: NodeRole, name: &str) -> Self {
        // Truncated to the GAP limit
        let mut device_name = String::new();
        for c in name.chars() {
            if device_name.push(c).is_err() {
                break;
            }
        }

        Self {
            role,
            device_name,
            clock: ClockConfig::new(),
            pairing: PairingConfig::new(),
            sync_interval_ms: SYNC_INTERVAL_MS,
            conn_params: ConnectionParams::default(),
            buttons: heapless::Vec::new(),
        }
    }

    fn with_buttons(mut self, buttons: &[(ButtonId, EdgePolicy)]) -> Self {
        for &(id, policy) in buttons {
            let _ = self.buttons.push(ButtonConfig::new(id, policy, DEFAULT_DEBOUNCE_MS));
        }
        self
    }

    /// Controller: all four buttons, press edge only
    pub fn controller() -> Self {
        Self::base(NodeRole::Controller, CONTROLLER_NAME).with_buttons(&[
            (ButtonId::Pair, EdgePolicy::Rising),
            (ButtonId::User, EdgePolicy::Rising),
            (ButtonId::Start, EdgePolicy::Rising),
            (ButtonId::Stop, EdgePolicy::Rising),
        ])
    }

    /// Display: a single pairing button
    pub fn display() -> Self {
        Self::base(NodeRole::Display, DISPLAY_NAME).with_buttons(&[(ButtonId::Pair, EdgePolicy::Rising)])
    }

    /// Remote: all four buttons, pairing reacts to both edges
    pub fn remote() -> Self {
        Self::base(NodeRole::Remote, REMOTE_NAME).with_buttons(&[
            (ButtonId::Pair, EdgePolicy::Both),
            (ButtonId::User, EdgePolicy::Rising),
            (ButtonId::Start, EdgePolicy::Rising),
            (ButtonId::Stop, EdgePolicy::Rising),
        ])
    }

    pub fn button(&self, id: ButtonId) -> Option<&ButtonConfig> {
        self.buttons.iter().find(|b| b.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_defaults() {
        let controller = NodeConfig::controller();
        assert_eq!(controller.role, NodeRole::Controller);
        assert_eq!(controller.device_name.as_str(), CONTROLLER_NAME);
        assert_eq!(controller.buttons.len(), 4);
        assert_eq!(controller.clock.default_duration_ms, 10_000);
        assert!(!controller.clock.start_on_boot);

        let display = NodeConfig::display();
        assert_eq!(display.buttons.len(), 1);
        assert!(display.button(ButtonId::Start).is_none());
        assert!(display.button(ButtonId::Pair).is_some());
    }

    #[test]
    fn test_connection_params_validity() {
        assert!(ConnectionParams::default().is_valid());
        assert!(NodeConfig::remote().conn_params.is_valid());

        let inverted = ConnectionParams {
            min_conn_interval: 40,
            max_conn_interval: 24,
            ..ConnectionParams::default()
        };
        assert!(!inverted.is_valid());

        // 1 s timeout against 11 x 50 ms of allowed silence
        let short_timeout = ConnectionParams {
            slave_latency: 10,
            supervision_timeout: 100,
            ..ConnectionParams::default()
        };
        assert!(!short_timeout.is_valid());
    }

    #[test]
    fn test_passkey_digits() {
        assert_eq!(&passkey_digits(STATIC_PASSKEY), b"123456");
        assert_eq!(&passkey_digits(42), b"000042");
    }

    #[test]
    fn test_remote_pair_button_sees_both_edges() {
        let remote = NodeConfig::remote();
        let pair = remote.button(ButtonId::Pair).unwrap();
        assert_eq!(pair.policy, EdgePolicy::Both);
        assert_eq!(pair.debounce_ms, DEFAULT_DEBOUNCE_MS);
    }
}
