//! Common test utilities
//!
//! Host-side fakes for the hardware seams:
//! - manual time source
//! - recording notify transport, attribute table, GATT client, radio and output sink
//! - peer address helpers

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};

use dclk_firmware::ble::advertising::{DiscoveryMode, RadioControl, RadioError};
use dclk_firmware::ble::bonding::{AddressKind, BondStore, PeerAddress};
use dclk_firmware::ble::gatt::ClockCharacteristic;
use dclk_firmware::ble::notifications::{AttributeStore, NotifyTransport, TransportError};
use dclk_firmware::ble::subscriber::GattClient;
use dclk_firmware::clock::TimeSource;
use dclk_firmware::output::OutputSink;

/// Time that only moves when told to
pub struct ManualTime(AtomicU32);

impl ManualTime {
    pub const fn new(start_ms: u32) -> Self {
        Self(AtomicU32::new(start_ms))
    }

    pub fn advance(&self, ms: u32) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now_ms(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn peer(n: u8) -> PeerAddress {
    PeerAddress::new(AddressKind::RandomStatic, [n, 0x11, 0x22, 0x33, 0x44, 0xC0])
}

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Vec<(ClockCharacteristic, Vec<u8>)>,
    pub calls: u32,
    pub fail_with: Option<TransportError>,
}

impl RecordingTransport {
    pub fn values(&self) -> Vec<u32> {
        self.sent
            .iter()
            .filter(|(c, _)| *c == ClockCharacteristic::Value)
            .map(|(_, p)| u32::from_le_bytes([p[0], p[1], p[2], p[3]]))
            .collect()
    }

    pub fn phases(&self) -> Vec<u8> {
        self.sent
            .iter()
            .filter(|(c, _)| *c == ClockCharacteristic::State)
            .map(|(_, p)| p[0])
            .collect()
    }
}

impl NotifyTransport for RecordingTransport {
    fn notify(&mut self, characteristic: ClockCharacteristic, payload: &[u8]) -> Result<(), TransportError> {
        self.calls += 1;
        if let Some(e) = self.fail_with {
            return Err(e);
        }
        self.sent.push((characteristic, payload.to_vec()));
        Ok(())
    }
}

/// Readable attribute values, last write wins
#[derive(Default)]
pub struct RecordingAttributes {
    pub value: Option<Vec<u8>>,
    pub state: Option<Vec<u8>>,
    pub writes: u32,
}

impl AttributeStore for RecordingAttributes {
    fn store(&mut self, characteristic: ClockCharacteristic, payload: &[u8]) -> Result<(), TransportError> {
        self.writes += 1;
        match characteristic {
            ClockCharacteristic::Value => self.value = Some(payload.to_vec()),
            ClockCharacteristic::State => self.state = Some(payload.to_vec()),
            ClockCharacteristic::Command => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattWrite {
    Cccd { handle: u16, value: u16 },
    Value { handle: u16, data: Vec<u8> },
}

#[derive(Default)]
pub struct RecordingGattClient {
    pub writes: Vec<GattWrite>,
    /// CCCD handles whose writes fail
    pub failing: Vec<u16>,
}

impl GattClient for RecordingGattClient {
    async fn write_cccd(&mut self, cccd_handle: u16, value: u16) -> Result<(), TransportError> {
        if self.failing.contains(&cccd_handle) {
            return Err(TransportError::Busy);
        }
        self.writes.push(GattWrite::Cccd {
            handle: cccd_handle,
            value,
        });
        Ok(())
    }

    async fn write(&mut self, value_handle: u16, data: &[u8]) -> Result<(), TransportError> {
        self.writes.push(GattWrite::Value {
            handle: value_handle,
            data: data.to_vec(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    StopDiscovery,
    StartDiscovery(DiscoveryMode),
    SetAcceptList(Vec<PeerAddress>),
    DeleteBonds,
    PersistBonds(Vec<PeerAddress>),
    Disconnect(PeerAddress),
}

#[derive(Default)]
pub struct RecordingRadio {
    pub calls: Vec<RadioCall>,
    pub fail_start: bool,
}

impl RecordingRadio {
    pub fn last_accept_list(&self) -> Option<&[PeerAddress]> {
        self.calls.iter().rev().find_map(|c| match c {
            RadioCall::SetAcceptList(list) => Some(list.as_slice()),
            _ => None,
        })
    }

    pub fn last_discovery(&self) -> Option<DiscoveryMode> {
        self.calls.iter().rev().find_map(|c| match c {
            RadioCall::StartDiscovery(mode) => Some(*mode),
            _ => None,
        })
    }
}

impl RadioControl for RecordingRadio {
    fn stop_discovery(&mut self) -> Result<(), RadioError> {
        self.calls.push(RadioCall::StopDiscovery);
        Ok(())
    }

    fn start_discovery(&mut self, mode: DiscoveryMode) -> Result<(), RadioError> {
        if self.fail_start {
            return Err(RadioError::InvalidState);
        }
        self.calls.push(RadioCall::StartDiscovery(mode));
        Ok(())
    }

    fn set_accept_list(&mut self, peers: &[PeerAddress]) -> Result<(), RadioError> {
        self.calls.push(RadioCall::SetAcceptList(peers.to_vec()));
        Ok(())
    }

    fn delete_bonds(&mut self) -> Result<(), RadioError> {
        self.calls.push(RadioCall::DeleteBonds);
        Ok(())
    }

    fn persist_bonds(&mut self, bonds: &BondStore) -> Result<(), RadioError> {
        self.calls.push(RadioCall::PersistBonds(bonds.peers().to_vec()));
        Ok(())
    }

    fn disconnect(&mut self, peer: &PeerAddress) -> Result<(), RadioError> {
        self.calls.push(RadioCall::Disconnect(*peer));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingOutput {
    pub lines: Vec<String>,
    pub buzzes: Vec<u32>,
    pub link: Option<bool>,
}

impl RecordingOutput {
    pub fn last_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }
}

impl OutputSink for RecordingOutput {
    fn show_line(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    fn pulse_buzzer(&mut self, duration_ms: u32) {
        self.buzzes.push(duration_ms);
    }

    fn set_link_indicator(&mut self, connected: bool) {
        self.link = Some(connected);
    }
}
