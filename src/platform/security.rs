//! Pairing and bonding with the SoftDevice
//!
//! Both sides use keyboard-only IO and answer the passkey request with the
//! fixed `STATIC_PASSKEY`, which gives an authenticated (MITM) bond without a
//! screen. Link keys are kept here and mirrored to flash by `storage`; bond
//! membership goes to the registry, which owns the accept list.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;
use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{
    Connection, EncryptionInfo, IdentityKey, IdentityResolutionKey, MasterId, PasskeyReply, SecurityMode,
};
use nrf_softdevice::raw;

use super::{peer_address, stack_address};
use crate::ble::bonding::{PeerAddress, StoredKey};
use crate::ble::connection::{submit, RegistryCommand, RegistryQueue};
use crate::ble::registry::SecurityLevel;
use crate::config::{passkey_digits, MAX_PEERS, STATIC_PASSKEY};

#[derive(Clone, Copy)]
struct LinkKey {
    peer: PeerAddress,
    identity: IdentityKey,
    master_id: MasterId,
    key: EncryptionInfo,
}

impl LinkKey {
    fn to_stored(self) -> StoredKey {
        StoredKey {
            peer: self.peer,
            identity: peer_address(&self.identity.addr),
            irk: self.identity.irk.as_raw().irk,
            ediv: self.master_id.ediv,
            rand: self.master_id.rand,
            ltk: self.key.ltk,
            key_flags: self.key.flags,
        }
    }

    fn from_stored(stored: &StoredKey) -> Self {
        Self {
            peer: stored.peer,
            identity: IdentityKey {
                irk: IdentityResolutionKey::from_raw(raw::ble_gap_irk_t { irk: stored.irk }),
                addr: stack_address(&stored.identity),
            },
            master_id: MasterId {
                ediv: stored.ediv,
                rand: stored.rand,
            },
            key: EncryptionInfo {
                ltk: stored.ltk,
                flags: stored.key_flags,
            },
        }
    }
}

pub fn security_level(mode: SecurityMode) -> SecurityLevel {
    match mode {
        SecurityMode::NoAccess | SecurityMode::Open => SecurityLevel::Open,
        SecurityMode::JustWorks | SecurityMode::Signed => SecurityLevel::Encrypted,
        SecurityMode::Mitm | SecurityMode::SignedMitm => SecurityLevel::Authenticated,
        SecurityMode::LescMitm => SecurityLevel::SecureConnections,
    }
}

pub struct Bonder {
    registry: &'static RegistryQueue,
    keys: Mutex<CriticalSectionRawMutex, RefCell<Vec<LinkKey, MAX_PEERS>>>,
}

impl Bonder {
    pub const fn new(registry: &'static RegistryQueue) -> Self {
        Self {
            registry,
            keys: Mutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Forget every link key
    pub fn clear(&self) {
        self.keys.lock(|k| k.borrow_mut().clear());
        info!("BONDING: link keys cleared");
    }

    pub fn forget(&self, peer: &PeerAddress) {
        self.keys.lock(|k| k.borrow_mut().retain(|entry| entry.peer != *peer));
    }

    /// Snapshot of every key, for the flash record
    pub fn export(&self) -> Vec<StoredKey, MAX_PEERS> {
        self.keys.lock(|k| k.borrow().iter().map(|entry| entry.to_stored()).collect())
    }

    /// Reload keys saved by an earlier `export`. Call at boot.
    pub fn import(&self, stored: &[StoredKey]) {
        self.keys.lock(|k| {
            let mut keys = k.borrow_mut();
            keys.clear();
            for entry in stored.iter().take(MAX_PEERS) {
                let _ = keys.push(LinkKey::from_stored(entry));
            }
        });
        info!("BONDING: {} link keys restored", stored.len().min(MAX_PEERS));
    }

    fn find(&self, conn: &Connection) -> Option<LinkKey> {
        let address = conn.peer_address();
        self.keys.lock(|k| {
            k.borrow()
                .iter()
                .find(|entry| entry.identity.is_match(address))
                .copied()
        })
    }
}

impl SecurityHandler for Bonder {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::KeyboardOnly
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        true
    }

    fn enter_passkey(&self, reply: PasskeyReply) {
        debug!("BONDING: answering passkey request");
        reply.reply(Some(&passkey_digits(STATIC_PASSKEY)));
    }

    fn on_security_update(&self, conn: &Connection, security_mode: SecurityMode) {
        let peer = peer_address(&conn.peer_address());
        let level = security_level(security_mode);
        info!("BONDING: {:?} security now {:?}", peer, level);
        let _ = submit(
            self.registry,
            RegistryCommand::SecurityChanged {
                peer,
                level,
                success: level >= SecurityLevel::Authenticated,
            },
        );
    }

    fn on_bonded(&self, conn: &Connection, master_id: MasterId, key: EncryptionInfo, peer_id: IdentityKey) {
        let peer = peer_address(&conn.peer_address());
        let entry = LinkKey {
            peer,
            identity: peer_id,
            master_id,
            key,
        };
        let stored = self.keys.lock(|k| {
            let mut keys = k.borrow_mut();
            keys.retain(|e| e.peer != peer);
            keys.push(entry).is_ok()
        });
        if !stored {
            error!("BONDING: key table full, {:?} not stored", peer);
            return;
        }
        info!("BONDING: bonded with {:?}", peer);
        let _ = submit(self.registry, RegistryCommand::BondComplete(peer));
    }

    fn get_key(&self, conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        self.find(conn)
            .filter(|entry| entry.master_id == master_id)
            .map(|entry| entry.key)
    }

    fn get_peripheral_key(&self, conn: &Connection) -> Option<(MasterId, EncryptionInfo)> {
        self.find(conn).map(|entry| (entry.master_id, entry.key))
    }
}
