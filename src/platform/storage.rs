//! Bond record in internal flash
//!
//! One reserved page at the top of flash (kept out of the `FLASH` region in
//! `memory.x`) holds the latest `BondRecord`. The page is rewritten whole on
//! every save. Flash operations complete through SoftDevice events, so
//! `softdevice_task` must be running before `load_bonds` is awaited.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};
use nrf_softdevice::Flash;

use super::security::Bonder;
use crate::ble::bonding::{BondRecord, BondStore, BondingError, BOND_RECORD_MAX_LEN};

pub const BOND_PAGE_ADDR: u32 = 0x000F_F000;
pub const PAGE_SIZE: u32 = 4096;

/// Latest bond table waiting to be written; a newer save replaces an older
/// one not yet written
pub type PersistSignal = Signal<CriticalSectionRawMutex, BondStore>;

/// Read the saved record, restore its keys into the bonder and return the
/// bonded peers. A blank or unreadable page means no bonds.
pub async fn load_bonds(flash: &mut Flash, bonder: &Bonder) -> BondStore {
    let mut page = [0u8; BOND_RECORD_MAX_LEN];
    if flash.read(BOND_PAGE_ADDR, &mut page).await.is_err() {
        error!("BONDING: bond page read failed");
        return BondStore::new();
    }
    match BondRecord::decode(&page) {
        Ok(record) => {
            bonder.import(&record.keys);
            info!("BONDING: loaded {} bonded peers", record.store.len());
            record.store
        }
        Err(BondingError::InvalidData) => {
            info!("BONDING: no saved bonds");
            BondStore::new()
        }
        Err(e) => {
            warn!("BONDING: saved bonds unreadable: {:?}", e);
            BondStore::new()
        }
    }
}

async fn save(flash: &mut Flash, record: &BondRecord) -> Result<(), BondingError> {
    let mut buf = [0xFFu8; BOND_RECORD_MAX_LEN];
    let bytes = record.encode(&mut buf)?;
    flash
        .erase(BOND_PAGE_ADDR, BOND_PAGE_ADDR + PAGE_SIZE)
        .await
        .map_err(|_| BondingError::StorageFailed)?;
    flash
        .write(BOND_PAGE_ADDR, bytes)
        .await
        .map_err(|_| BondingError::StorageFailed)
}

/// Storage task body: write each requested table, with the bonder's current
/// keys, to the bond page
pub async fn run_bond_storage(mut flash: Flash, requests: &'static PersistSignal, bonder: &'static Bonder) -> ! {
    loop {
        let store = requests.wait().await;
        let record = BondRecord {
            keys: bonder.export(),
            store,
        };
        match save(&mut flash, &record).await {
            Ok(()) => info!(
                "BONDING: saved {} bonded peers, {} keys",
                record.store.len(),
                record.keys.len()
            ),
            Err(e) => error!("BONDING: bond save failed: {:?}", e),
        }
    }
}
