//! Connection Management
//!
//! Serializes every registry operation through one work queue. BLE stack
//! callbacks and button handlers only enqueue a `RegistryCommand`; the
//! registry task applies it and carries out the resulting radio actions, so
//! registry state is never mutated from two contexts at once.

use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};

use super::advertising::RadioControl;
use super::bonding::{BondStore, PeerAddress};
use super::registry::{Actions, ConnectionRegistry, RegistryAction, SecurityLevel};
use crate::clock::TimeSource;
use crate::config::PairingConfig;

/// Pending registry operations
pub const REGISTRY_QUEUE_DEPTH: usize = 8;

/// How often an open pairing window is checked for timeout
pub const PAIRING_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryCommand {
    EnterPairing,
    ExitPairing,
    TogglePairing,
    ClearBonds,
    RemovePeer(PeerAddress),
    Connected(PeerAddress),
    Disconnected { peer: PeerAddress, reason: u8 },
    BondComplete(PeerAddress),
    SecurityChanged {
        peer: PeerAddress,
        level: SecurityLevel,
        success: bool,
    },
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionError {
    QueueFull,
}

pub type RegistryQueue = Channel<CriticalSectionRawMutex, RegistryCommand, REGISTRY_QUEUE_DEPTH>;

/// Registry shared between the registry task and read-only users (e.g. the
/// GATT authorization check)
pub type SharedRegistry = Mutex<CriticalSectionRawMutex, RefCell<ConnectionRegistry>>;

/// Boot-time setup: the node's pairing policy and the bonds loaded from
/// storage. Runs before the registry task starts.
pub fn init_registry(registry: &SharedRegistry, pairing: PairingConfig, bonds: &BondStore) {
    registry.lock(|r| {
        let mut r = r.borrow_mut();
        r.set_config(pairing);
        r.restore(bonds);
    });
}

/// Enqueue without waiting; safe from stack callbacks
pub fn submit(queue: &RegistryQueue, command: RegistryCommand) -> Result<(), ConnectionError> {
    queue.try_send(command).map_err(|_| {
        error!("CONNECTION: registry queue full, dropped {:?}", command);
        ConnectionError::QueueFull
    })
}

impl ConnectionRegistry {
    pub fn handle(&mut self, command: RegistryCommand, now_ms: u32) -> Actions {
        match command {
            RegistryCommand::EnterPairing => self.enter_pairing_mode(now_ms),
            RegistryCommand::ExitPairing => self.exit_pairing_mode(),
            RegistryCommand::TogglePairing => self.toggle_pairing_mode(now_ms),
            RegistryCommand::ClearBonds => self.clear_bonds(),
            RegistryCommand::RemovePeer(peer) => self.remove_peer(&peer),
            RegistryCommand::Connected(peer) => self.on_link_connected(peer),
            RegistryCommand::Disconnected { peer, reason } => self.on_link_disconnected(&peer, reason),
            RegistryCommand::BondComplete(peer) => self.on_bond_complete(peer),
            RegistryCommand::SecurityChanged { peer, level, success } => {
                self.on_security_changed(&peer, level, success)
            }
            RegistryCommand::Tick => self.tick(now_ms),
        }
    }
}

/// Carry out registry actions in order. A failing action is logged and the
/// rest still run. Returns the number of failures.
pub fn execute<L: RadioControl>(actions: &[RegistryAction], radio: &mut L) -> usize {
    let mut failures = 0;
    for action in actions {
        let result = match action {
            RegistryAction::StopDiscovery => radio.stop_discovery(),
            RegistryAction::SetAcceptList(peers) => radio.set_accept_list(peers),
            RegistryAction::DeleteBonds => radio.delete_bonds(),
            RegistryAction::PersistBonds(store) => radio.persist_bonds(store),
            RegistryAction::StartDiscovery(mode) => radio.start_discovery(*mode),
            RegistryAction::Disconnect(peer) => radio.disconnect(peer),
        };
        if let Err(e) = result {
            failures += 1;
            error!("CONNECTION: radio action failed: {:?}", e);
        }
    }
    failures
}

/// Apply one command to the shared registry and execute its actions outside
/// the lock
pub fn process<L: RadioControl>(registry: &SharedRegistry, command: RegistryCommand, now_ms: u32, radio: &mut L) -> usize {
    let actions = registry.lock(|r| r.borrow_mut().handle(command, now_ms));
    execute(&actions, radio)
}

/// Registry task body
pub async fn run_registry<T: TimeSource, L: RadioControl>(
    registry: &SharedRegistry,
    queue: &RegistryQueue,
    time: T,
    mut radio: L,
) -> ! {
    let actions = registry.lock(|r| r.borrow_mut().boot());
    execute(&actions, &mut radio);

    loop {
        let command = match select(queue.receive(), Timer::after(PAIRING_CHECK_INTERVAL)).await {
            Either::First(command) => command,
            Either::Second(()) => RegistryCommand::Tick,
        };
        process(registry, command, time.now_ms(), &mut radio);
        // A steady stream of commands must not hold off the pairing timeout
        if command != RegistryCommand::Tick {
            process(registry, RegistryCommand::Tick, time.now_ms(), &mut radio);
        }
    }
}
