//! `RadioControl` on the SoftDevice
//!
//! Discovery requests only update the shared `DiscoveryController` plan; the
//! advertising or scanning loop in `link` follows it. Disconnects go to the
//! connection held in the node's `LinkSlot`; bond saves go to the storage
//! task.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use nrf_softdevice::ble::Connection;

use super::peer_address;
use super::security::Bonder;
use super::storage::PersistSignal;
use crate::ble::advertising::{DiscoveryController, DiscoveryMode, RadioControl, RadioError};
use crate::ble::bonding::{BondStore, PeerAddress};

/// The node's one live connection
pub struct LinkSlot {
    conn: Mutex<CriticalSectionRawMutex, RefCell<Option<Connection>>>,
}

impl LinkSlot {
    pub const fn new() -> Self {
        Self {
            conn: Mutex::new(RefCell::new(None)),
        }
    }

    pub fn set(&self, conn: &Connection) {
        self.conn.lock(|c| *c.borrow_mut() = Some(conn.clone()));
    }

    pub fn clear(&self) {
        self.conn.lock(|c| *c.borrow_mut() = None);
    }

    pub fn peer(&self) -> Option<PeerAddress> {
        self.conn
            .lock(|c| c.borrow().as_ref().map(|conn| peer_address(&conn.peer_address())))
    }

    fn disconnect(&self, peer: &PeerAddress) -> Result<(), RadioError> {
        self.conn.lock(|c| {
            let slot = c.borrow();
            match slot.as_ref() {
                Some(conn) if peer_address(&conn.peer_address()) == *peer => {
                    conn.disconnect().map_err(|_| RadioError::PeerNotConnected)
                }
                _ => Err(RadioError::PeerNotConnected),
            }
        })
    }
}

impl Default for LinkSlot {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SoftdeviceRadio {
    pub discovery: &'static DiscoveryController,
    pub bonder: &'static Bonder,
    pub link: &'static LinkSlot,
    pub persist: &'static PersistSignal,
}

impl RadioControl for SoftdeviceRadio {
    fn stop_discovery(&mut self) -> Result<(), RadioError> {
        self.discovery.halt();
        Ok(())
    }

    fn start_discovery(&mut self, mode: DiscoveryMode) -> Result<(), RadioError> {
        self.discovery.request(mode);
        Ok(())
    }

    fn set_accept_list(&mut self, peers: &[PeerAddress]) -> Result<(), RadioError> {
        self.discovery.set_accept_list(peers)
    }

    fn delete_bonds(&mut self) -> Result<(), RadioError> {
        self.bonder.clear();
        Ok(())
    }

    /// Hand the table to the storage task; the flash write happens there
    fn persist_bonds(&mut self, bonds: &BondStore) -> Result<(), RadioError> {
        self.persist.signal(bonds.clone());
        debug!("BONDING: queued save of {} bonded peers", bonds.len());
        Ok(())
    }

    fn disconnect(&mut self, peer: &PeerAddress) -> Result<(), RadioError> {
        self.bonder.forget(peer);
        self.link.disconnect(peer)
    }
}
