//! Connection Registry
//!
//! Owns the peer table (bonded and connected peers), the pairing session and
//! the discovery policy derived from them. Every operation is synchronous and
//! returns the radio actions it requires; nothing here touches the radio.
//!
//! Policy:
//! - a node with no bonds accepts any peer (fresh device),
//! - while pairing, any peer is accepted and the accept list is empty,
//! - otherwise only bonded peers may connect,
//! - a completed bond ends pairing mode.

use heapless::index_map::FnvIndexMap;
use heapless::Vec;

use super::advertising::DiscoveryMode;
use super::bonding::{BondStore, PeerAddress};
use crate::clock::time::elapsed_ms;
use crate::config::{BondPolicy, PairingConfig, MAX_LINKS, MAX_PEERS};

/// Link security, as the BLE security levels 1 to 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityLevel {
    Open = 1,
    Encrypted = 2,
    Authenticated = 3,
    SecureConnections = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerRecord {
    pub address: PeerAddress,
    pub bonded: bool,
    pub connected: bool,
    pub security: SecurityLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PairingSession {
    pub entered_at_ms: u32,
}

/// Radio work requested by a registry operation, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryAction {
    StopDiscovery,
    SetAcceptList(Vec<PeerAddress, MAX_PEERS>),
    DeleteBonds,
    PersistBonds(BondStore),
    StartDiscovery(DiscoveryMode),
    Disconnect(PeerAddress),
}

pub const MAX_ACTIONS: usize = 8;

pub type Actions = Vec<RegistryAction, MAX_ACTIONS>;

fn push(actions: &mut Actions, action: RegistryAction) {
    if actions.push(action).is_err() {
        error!("REGISTRY: action list overflow");
    }
}

pub struct ConnectionRegistry {
    peers: FnvIndexMap<PeerAddress, PeerRecord, MAX_PEERS>,
    pairing: Option<PairingSession>,
    config: PairingConfig,
    discovery: Option<DiscoveryMode>,
}

impl ConnectionRegistry {
    pub const fn new(config: PairingConfig) -> Self {
        Self {
            peers: FnvIndexMap::new(),
            pairing: None,
            config,
            discovery: None,
        }
    }

    /// Replace the node's pairing policy. Call at boot, before `boot()`.
    pub fn set_config(&mut self, config: PairingConfig) {
        self.config = config;
    }

    pub fn config(&self) -> PairingConfig {
        self.config
    }

    /// Load the persisted bond table. Call once at boot, before `boot()`.
    pub fn restore(&mut self, store: &BondStore) {
        for &address in store.peers() {
            let record = PeerRecord {
                address,
                bonded: true,
                connected: false,
                security: SecurityLevel::Open,
            };
            if self.peers.insert(address, record).is_err() {
                warn!("REGISTRY: peer table full, bond {:?} not restored", address);
            }
        }
        info!("REGISTRY: restored {} bonds", self.bonded_count());
    }

    /// Initial discovery for the restored state
    pub fn boot(&mut self) -> Actions {
        let mut actions = Actions::new();
        self.restart_discovery(&mut actions);
        actions
    }

    pub fn is_pairing(&self) -> bool {
        self.pairing.is_some()
    }

    pub fn pairing_session(&self) -> Option<PairingSession> {
        self.pairing
    }

    pub fn peer(&self, address: &PeerAddress) -> Option<&PeerRecord> {
        self.peers.get(address)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    pub fn bonded_count(&self) -> usize {
        self.peers.values().filter(|p| p.bonded).count()
    }

    pub fn connected_count(&self) -> usize {
        self.peers.values().filter(|p| p.connected).count()
    }

    pub fn is_connected(&self) -> bool {
        self.connected_count() > 0
    }

    /// Fresh devices and pairing mode accept unknown peers
    pub fn accepting_new_peers(&self) -> bool {
        self.pairing.is_some() || self.bonded_count() == 0
    }

    /// Peers allowed through the radio filter; empty while pairing
    pub fn accept_list(&self) -> Vec<PeerAddress, MAX_PEERS> {
        if self.pairing.is_some() {
            return Vec::new();
        }
        self.peers
            .values()
            .filter(|p| p.bonded)
            .map(|p| p.address)
            .collect()
    }

    pub fn discovery_mode(&self) -> DiscoveryMode {
        if self.accepting_new_peers() {
            DiscoveryMode::Open
        } else {
            DiscoveryMode::AcceptList
        }
    }

    /// Discovery last requested, `None` while stopped
    pub fn active_discovery(&self) -> Option<DiscoveryMode> {
        self.discovery
    }

    pub fn bond_store(&self) -> BondStore {
        let mut store = BondStore::new();
        for p in self.peers.values().filter(|p| p.bonded) {
            // Capacities match, cannot overflow
            let _ = store.add(p.address);
        }
        store
    }

    /// Notifications and command writes need an encrypted, authenticated link
    pub fn link_authorized(&self, address: &PeerAddress) -> bool {
        self.peers
            .get(address)
            .map(|p| p.connected && p.security >= SecurityLevel::Authenticated)
            .unwrap_or(false)
    }

    fn restart_discovery(&mut self, actions: &mut Actions) {
        push(actions, RegistryAction::StopDiscovery);
        push(actions, RegistryAction::SetAcceptList(self.accept_list()));
        if self.connected_count() >= MAX_LINKS {
            self.discovery = None;
            return;
        }
        let mode = self.discovery_mode();
        push(actions, RegistryAction::StartDiscovery(mode));
        self.discovery = Some(mode);
    }

    fn forget_unbonded(&mut self) {
        self.peers.retain(|_, p| p.bonded || p.connected);
    }

    pub fn enter_pairing_mode(&mut self, now_ms: u32) -> Actions {
        let mut actions = Actions::new();
        if self.pairing.is_some() {
            debug!("REGISTRY: pairing timer restarted");
            self.pairing = Some(PairingSession { entered_at_ms: now_ms });
            return actions;
        }

        self.pairing = Some(PairingSession { entered_at_ms: now_ms });
        info!("REGISTRY: pairing mode on");
        if self.config.bond_policy == BondPolicy::ClearOnPairing {
            self.drop_bonds(&mut actions);
        }
        self.restart_discovery(&mut actions);
        actions
    }

    pub fn exit_pairing_mode(&mut self) -> Actions {
        let mut actions = Actions::new();
        if self.pairing.take().is_none() {
            return actions;
        }
        info!("REGISTRY: pairing mode off, {} bonded", self.bonded_count());
        self.restart_discovery(&mut actions);
        actions
    }

    pub fn toggle_pairing_mode(&mut self, now_ms: u32) -> Actions {
        if self.is_pairing() {
            self.exit_pairing_mode()
        } else {
            self.enter_pairing_mode(now_ms)
        }
    }

    fn drop_bonds(&mut self, actions: &mut Actions) {
        for p in self.peers.values_mut() {
            p.bonded = false;
        }
        self.forget_unbonded();
        push(actions, RegistryAction::DeleteBonds);
        push(actions, RegistryAction::PersistBonds(BondStore::new()));
    }

    /// Forget every bond. Connected peers stay connected but are no longer
    /// bonded.
    pub fn clear_bonds(&mut self) -> Actions {
        let mut actions = Actions::new();
        info!("REGISTRY: clearing {} bonds", self.bonded_count());
        self.drop_bonds(&mut actions);
        self.restart_discovery(&mut actions);
        actions
    }

    /// Un-pair a single peer, disconnecting it if needed
    pub fn remove_peer(&mut self, address: &PeerAddress) -> Actions {
        let mut actions = Actions::new();
        let Some(record) = self.peers.swap_remove(address) else {
            warn!("REGISTRY: remove of unknown peer {:?}", address);
            return actions;
        };
        if record.connected {
            push(&mut actions, RegistryAction::Disconnect(*address));
        }
        if record.bonded {
            push(&mut actions, RegistryAction::PersistBonds(self.bond_store()));
        }
        self.restart_discovery(&mut actions);
        actions
    }

    pub fn on_link_connected(&mut self, address: PeerAddress) -> Actions {
        let mut actions = Actions::new();
        let known = self.peers.get(&address).map(|p| p.bonded).unwrap_or(false);

        if !known && !self.accepting_new_peers() {
            warn!("REGISTRY: rejecting unknown peer {:?}", address);
            push(&mut actions, RegistryAction::Disconnect(address));
            return actions;
        }

        let record = PeerRecord {
            address,
            bonded: known,
            connected: true,
            security: SecurityLevel::Open,
        };
        if self.peers.insert(address, record).is_err() {
            warn!("REGISTRY: peer table full, dropping {:?}", address);
            push(&mut actions, RegistryAction::Disconnect(address));
            return actions;
        }

        info!("REGISTRY: connected {:?} (bonded: {})", address, known);
        if self.connected_count() >= MAX_LINKS {
            self.discovery = None;
        }
        actions
    }

    pub fn on_link_disconnected(&mut self, address: &PeerAddress, reason: u8) -> Actions {
        let mut actions = Actions::new();
        match self.peers.get_mut(address) {
            Some(p) => {
                p.connected = false;
                p.security = SecurityLevel::Open;
            }
            None => {
                debug!("REGISTRY: disconnect of untracked peer (reason {})", reason);
                return actions;
            }
        }
        self.forget_unbonded();
        info!("REGISTRY: disconnected {:?} (reason {})", address, reason);
        self.restart_discovery(&mut actions);
        actions
    }

    /// Pairing finished with a bond. Ends pairing mode.
    pub fn on_bond_complete(&mut self, address: PeerAddress) -> Actions {
        let mut actions = Actions::new();
        match self.peers.get_mut(&address) {
            Some(p) => p.bonded = true,
            None => {
                let record = PeerRecord {
                    address,
                    bonded: true,
                    connected: false,
                    security: SecurityLevel::Open,
                };
                if self.peers.insert(address, record).is_err() {
                    error!("REGISTRY: bond table full, {:?} not stored", address);
                    return actions;
                }
            }
        }
        info!("REGISTRY: bonded {:?}", address);
        push(&mut actions, RegistryAction::PersistBonds(self.bond_store()));

        if self.pairing.take().is_some() {
            info!("REGISTRY: pairing complete");
            self.restart_discovery(&mut actions);
        }
        actions
    }

    /// Security procedure result. A failure on a peer that was never bonded
    /// drops the link unless new peers are welcome.
    pub fn on_security_changed(&mut self, address: &PeerAddress, level: SecurityLevel, success: bool) -> Actions {
        let mut actions = Actions::new();
        let Some(p) = self.peers.get_mut(address) else {
            return actions;
        };

        if success {
            p.security = level;
            debug!("REGISTRY: {:?} security {:?}", address, level);
            return actions;
        }

        warn!("REGISTRY: security failed for {:?}", address);
        let bonded = p.bonded;
        if !bonded && !self.accepting_new_peers() {
            push(&mut actions, RegistryAction::Disconnect(*address));
        }
        actions
    }

    /// Close pairing mode once it has been open for the configured timeout
    pub fn tick(&mut self, now_ms: u32) -> Actions {
        match self.pairing {
            Some(session)
                if self.config.timeout_ms > 0
                    && elapsed_ms(now_ms, session.entered_at_ms) >= self.config.timeout_ms =>
            {
                info!("REGISTRY: pairing timed out");
                self.exit_pairing_mode()
            }
            _ => Actions::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::bonding::AddressKind;

    fn peer(n: u8) -> PeerAddress {
        PeerAddress::new(AddressKind::RandomStatic, [n, 0, 0, 0, 0, 0xC0])
    }

    fn keep_bonds() -> PairingConfig {
        PairingConfig {
            bond_policy: BondPolicy::Keep,
            ..PairingConfig::new()
        }
    }

    #[test]
    fn test_fresh_device_is_open() {
        let mut reg = ConnectionRegistry::new(PairingConfig::new());
        let actions = reg.boot();
        assert!(actions.contains(&RegistryAction::StartDiscovery(DiscoveryMode::Open)));
        assert!(reg.accepting_new_peers());
    }

    #[test]
    fn test_bonded_device_filters() {
        let mut store = BondStore::new();
        store.add(peer(1)).unwrap();
        let mut reg = ConnectionRegistry::new(PairingConfig::new());
        reg.restore(&store);

        let actions = reg.boot();
        assert!(actions.contains(&RegistryAction::StartDiscovery(DiscoveryMode::AcceptList)));
        assert_eq!(reg.accept_list().as_slice(), &[peer(1)]);

        let actions = reg.on_link_connected(peer(2));
        assert_eq!(actions.as_slice(), &[RegistryAction::Disconnect(peer(2))]);
        assert!(reg.peer(&peer(2)).is_none());
    }

    #[test]
    fn test_pairing_timeout() {
        let mut reg = ConnectionRegistry::new(keep_bonds());
        reg.enter_pairing_mode(1_000);
        assert!(reg.tick(60_999).is_empty());
        assert!(reg.is_pairing());
        assert!(!reg.tick(61_000).is_empty());
        assert!(!reg.is_pairing());
    }

    #[test]
    fn test_link_authorized_needs_authentication() {
        let mut reg = ConnectionRegistry::new(PairingConfig::new());
        reg.on_link_connected(peer(1));
        assert!(!reg.link_authorized(&peer(1)));
        reg.on_security_changed(&peer(1), SecurityLevel::Encrypted, true);
        assert!(!reg.link_authorized(&peer(1)));
        reg.on_security_changed(&peer(1), SecurityLevel::Authenticated, true);
        assert!(reg.link_authorized(&peer(1)));
        reg.on_link_disconnected(&peer(1), 0x13);
        assert!(!reg.link_authorized(&peer(1)));
    }

    #[test]
    fn test_no_discovery_while_link_slot_taken() {
        let mut reg = ConnectionRegistry::new(PairingConfig::new());
        reg.boot();
        reg.on_link_connected(peer(1));
        assert_eq!(reg.active_discovery(), None);

        let actions = reg.enter_pairing_mode(0);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, RegistryAction::StartDiscovery(_))));
    }
}
