//! Bonding Storage
//!
//! The persisted list of bonded peers, which the accept list is rebuilt from
//! after a reboot, and the link keys that let a bonded peer re-encrypt without
//! pairing again. Both are written to flash as one postcard-encoded
//! `BondRecord`.
//!
//! ```text
//! [magic u32 LE][length u16 LE][postcard BondRecord][0xFF padding to 4 bytes]
//! ```

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::config::MAX_PEERS;

/// Worst-case postcard size of a full table
pub const BOND_STORE_MAX_LEN: usize = 1 + MAX_PEERS * (1 + 6);

/// Worst-case postcard size of one `StoredKey`
const STORED_KEY_MAX_LEN: usize = 2 * (1 + 6) + 16 + 3 + 8 + 16 + 1;

/// Marks a written record; erased flash reads as all ones
pub const BOND_RECORD_MAGIC: u32 = 0x4B4C_4344;

const RECORD_HEADER_LEN: usize = 4 + 2;

/// Buffer size for any record, rounded up to the flash word size
pub const BOND_RECORD_MAX_LEN: usize =
    (RECORD_HEADER_LEN + BOND_STORE_MAX_LEN + 1 + MAX_PEERS * STORED_KEY_MAX_LEN).div_ceil(4) * 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressKind {
    Public,
    RandomStatic,
    RandomPrivateResolvable,
    RandomPrivateNonResolvable,
}

/// Bluetooth device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    pub kind: AddressKind,
    /// Little-endian, as on air
    pub bytes: [u8; 6],
}

impl PeerAddress {
    pub const fn new(kind: AddressKind, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BondingError {
    BondingTableFull,
    DeviceNotFound,
    InvalidData,
    BufferTooSmall,
    /// Flash erase or write failed
    StorageFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BondStore {
    bonded: Vec<PeerAddress, MAX_PEERS>,
}

impl BondStore {
    pub const fn new() -> Self {
        Self { bonded: Vec::new() }
    }

    /// Add a bonded peer. Re-bonding a known peer is not an error.
    pub fn add(&mut self, peer: PeerAddress) -> Result<(), BondingError> {
        if self.contains(&peer) {
            return Ok(());
        }
        self.bonded.push(peer).map_err(|_| {
            error!("BONDING: table full, cannot add {:?}", peer);
            BondingError::BondingTableFull
        })?;
        debug!("BONDING: added {:?}", peer);
        Ok(())
    }

    pub fn remove(&mut self, peer: &PeerAddress) -> Result<(), BondingError> {
        let index = self
            .bonded
            .iter()
            .position(|p| p == peer)
            .ok_or(BondingError::DeviceNotFound)?;
        self.bonded.swap_remove(index);
        debug!("BONDING: removed {:?}", peer);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.bonded.clear();
    }

    pub fn contains(&self, peer: &PeerAddress) -> bool {
        self.bonded.contains(peer)
    }

    pub fn len(&self) -> usize {
        self.bonded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bonded.is_empty()
    }

    pub fn peers(&self) -> &[PeerAddress] {
        &self.bonded
    }

    /// Serialize into `buf`, returning the used prefix
    pub fn encode<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], BondingError> {
        postcard::to_slice(self, buf).map_err(|_| BondingError::BufferTooSmall)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BondingError> {
        let store: BondStore = postcard::from_bytes(bytes).map_err(|_| BondingError::InvalidData)?;
        store.check()?;
        Ok(store)
    }

    fn check(&self) -> Result<(), BondingError> {
        for (i, peer) in self.bonded.iter().enumerate() {
            if self.bonded[..i].contains(peer) {
                warn!("BONDING: duplicate entry {:?} in stored table", peer);
                return Err(BondingError::InvalidData);
            }
        }
        Ok(())
    }
}

/// Link keys of one bonded peer, in the stack's field layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StoredKey {
    /// Address the link came up with
    pub peer: PeerAddress,
    /// Identity address distributed during bonding
    pub identity: PeerAddress,
    pub irk: [u8; 16],
    pub ediv: u16,
    pub rand: [u8; 8],
    pub ltk: [u8; 16],
    pub key_flags: u8,
}

/// Everything a node keeps across power cycles
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BondRecord {
    pub store: BondStore,
    pub keys: Vec<StoredKey, MAX_PEERS>,
}

impl BondRecord {
    /// Frame the record for a flash write. The returned slice is a whole
    /// number of 4-byte words.
    pub fn encode<'b>(&self, buf: &'b mut [u8]) -> Result<&'b [u8], BondingError> {
        if buf.len() < RECORD_HEADER_LEN {
            return Err(BondingError::BufferTooSmall);
        }
        let (header, body) = buf.split_at_mut(RECORD_HEADER_LEN);
        let len = postcard::to_slice(self, body)
            .map_err(|_| BondingError::BufferTooSmall)?
            .len();
        header[..4].copy_from_slice(&BOND_RECORD_MAGIC.to_le_bytes());
        header[4..].copy_from_slice(&(len as u16).to_le_bytes());

        let used = RECORD_HEADER_LEN + len;
        let padded = used.div_ceil(4) * 4;
        if padded > buf.len() {
            return Err(BondingError::BufferTooSmall);
        }
        buf[used..padded].fill(0xFF);
        Ok(&buf[..padded])
    }

    /// Parse a record read back from flash. An erased page is `InvalidData`.
    pub fn decode(bytes: &[u8]) -> Result<Self, BondingError> {
        if bytes.len() < RECORD_HEADER_LEN {
            return Err(BondingError::InvalidData);
        }
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != BOND_RECORD_MAGIC {
            return Err(BondingError::InvalidData);
        }
        let len = u16::from_le_bytes([bytes[4], bytes[5]]) as usize;
        let body = bytes
            .get(RECORD_HEADER_LEN..RECORD_HEADER_LEN + len)
            .ok_or(BondingError::InvalidData)?;
        let record: BondRecord = postcard::from_bytes(body).map_err(|_| BondingError::InvalidData)?;
        record.store.check()?;
        Ok(record)
    }
}
