//! DCLK service on nrf-softdevice
//!
//! Server side for the controller, client side for display and remote. The
//! UUID literals match `ble::gatt`.

use nrf_softdevice::ble::gatt_server::{NotifyValueError, SetValueError};
use nrf_softdevice::ble::{gatt_client, Connection};

use crate::ble::gatt::{
    ClockCharacteristic, CLOCK_COMMAND_UUID, CLOCK_STATE_UUID, CLOCK_VALUE_UUID, DCLK_SERVICE_UUID, VALUE_LEN,
};
use crate::ble::notifications::{AttributeStore, NotifyTransport, TransportError};
use crate::ble::subscriber::{DiscoveredCharacteristic, DiscoveredService, GattClient};

#[nrf_softdevice::gatt_service(uuid = "00001553-1212-efde-1523-785feabcd123")]
pub struct ClockService {
    #[characteristic(uuid = "00001554-1212-efde-1523-785feabcd123", read, notify, security = "mitm")]
    pub state: u8,
    #[characteristic(uuid = "00001555-1212-efde-1523-785feabcd123", write, security = "mitm")]
    pub command: u8,
    #[characteristic(uuid = "00001556-1212-efde-1523-785feabcd123", read, notify, security = "mitm")]
    pub value: [u8; VALUE_LEN],
}

#[nrf_softdevice::gatt_server]
pub struct Server {
    pub clock: ClockService,
}

fn notify_error(e: NotifyValueError) -> TransportError {
    match e {
        NotifyValueError::Disconnected => TransportError::NotConnected,
        NotifyValueError::Raw(raw) => TransportError::Stack(raw as u32),
    }
}

fn set_error(e: SetValueError) -> TransportError {
    match e {
        SetValueError::Raw(raw) => TransportError::Stack(raw as u32),
    }
}

/// Notifications from the controller's server on one connection
pub struct ServerNotifier<'a> {
    pub server: &'a Server,
    pub conn: &'a Connection,
}

impl NotifyTransport for ServerNotifier<'_> {
    fn notify(&mut self, characteristic: ClockCharacteristic, payload: &[u8]) -> Result<(), TransportError> {
        let clock = &self.server.clock;
        match characteristic {
            ClockCharacteristic::Value => {
                let value: [u8; VALUE_LEN] = payload.try_into().map_err(|_| TransportError::Stack(0))?;
                clock.value_notify(self.conn, &value).map_err(notify_error)
            }
            ClockCharacteristic::State => {
                let state = payload.first().copied().ok_or(TransportError::Stack(0))?;
                clock.state_notify(self.conn, &state).map_err(notify_error)
            }
            ClockCharacteristic::Command => Err(TransportError::Insufficient),
        }
    }
}

/// The server's own attribute table, read by peers without notifications
pub struct ServerAttributes<'a> {
    pub server: &'a Server,
}

impl AttributeStore for ServerAttributes<'_> {
    fn store(&mut self, characteristic: ClockCharacteristic, payload: &[u8]) -> Result<(), TransportError> {
        let clock = &self.server.clock;
        match characteristic {
            ClockCharacteristic::Value => {
                let value: [u8; VALUE_LEN] = payload.try_into().map_err(|_| TransportError::Stack(0))?;
                clock.value_set(&value).map_err(set_error)
            }
            ClockCharacteristic::State => {
                let state = payload.first().copied().ok_or(TransportError::Stack(0))?;
                clock.state_set(&state).map_err(set_error)
            }
            ClockCharacteristic::Command => Ok(()),
        }
    }
}

#[nrf_softdevice::gatt_client(uuid = "00001553-1212-efde-1523-785feabcd123")]
pub struct ClockServiceClient {
    #[characteristic(uuid = "00001554-1212-efde-1523-785feabcd123", read, notify)]
    state: u8,
    #[characteristic(uuid = "00001555-1212-efde-1523-785feabcd123", write)]
    command: u8,
    #[characteristic(uuid = "00001556-1212-efde-1523-785feabcd123", read, notify)]
    value: [u8; VALUE_LEN],
}

impl ClockServiceClient {
    /// Handles found by discovery, in the form `ClockSubscriber` assigns from
    pub fn characteristics(&self) -> [DiscoveredCharacteristic; 3] {
        [
            DiscoveredCharacteristic {
                uuid: CLOCK_VALUE_UUID,
                value_handle: self.value_value_handle,
                cccd_handle: Some(self.value_cccd_handle),
            },
            DiscoveredCharacteristic {
                uuid: CLOCK_STATE_UUID,
                value_handle: self.state_value_handle,
                cccd_handle: Some(self.state_cccd_handle),
            },
            DiscoveredCharacteristic {
                uuid: CLOCK_COMMAND_UUID,
                value_handle: self.command_value_handle,
                cccd_handle: None,
            },
        ]
    }

    pub fn value_handle(&self) -> u16 {
        self.value_value_handle
    }

    pub fn state_handle(&self) -> u16 {
        self.state_value_handle
    }
}

pub fn describe(characteristics: &[DiscoveredCharacteristic]) -> DiscoveredService<'_> {
    DiscoveredService {
        uuid: DCLK_SERVICE_UUID,
        characteristics,
    }
}

/// Attribute writes over a central's connection
pub struct LinkClient<'a> {
    pub conn: &'a Connection,
}

fn write_error(e: gatt_client::WriteError) -> TransportError {
    match e {
        gatt_client::WriteError::Disconnected => TransportError::NotConnected,
        gatt_client::WriteError::Gatt(_) => TransportError::Insufficient,
        gatt_client::WriteError::Raw(raw) => TransportError::Stack(raw as u32),
        _ => TransportError::Busy,
    }
}

impl GattClient for LinkClient<'_> {
    async fn write_cccd(&mut self, cccd_handle: u16, value: u16) -> Result<(), TransportError> {
        gatt_client::write(self.conn, cccd_handle, &value.to_le_bytes())
            .await
            .map_err(write_error)
    }

    async fn write(&mut self, value_handle: u16, data: &[u8]) -> Result<(), TransportError> {
        gatt_client::write(self.conn, value_handle, data).await.map_err(write_error)
    }
}
