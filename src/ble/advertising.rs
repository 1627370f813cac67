//! BLE Discovery Controller
//!
//! Bridges registry decisions and the radio. The registry emits actions; a
//! `RadioControl` implementation carries them out. On the firmware side the
//! discovery part is a `DiscoveryController`: a shared plan that the
//! advertising (or scanning) loop follows, restarting whenever the plan
//! changes.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use heapless::Vec;

use super::bonding::{BondStore, PeerAddress};
use crate::config::MAX_PEERS;

/// Who may connect (peripheral) or be connected to (central)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryMode {
    /// Any peer
    Open,
    /// Only peers on the accept list
    AcceptList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    InvalidState,
    /// More entries than the controller's filter table holds
    AcceptListFull,
    PeerNotConnected,
    Storage,
    /// Raw BLE stack error code
    Stack(u32),
}

/// Radio and bond-storage operations driven by the registry
pub trait RadioControl {
    fn stop_discovery(&mut self) -> Result<(), RadioError>;
    fn start_discovery(&mut self, mode: DiscoveryMode) -> Result<(), RadioError>;
    fn set_accept_list(&mut self, peers: &[PeerAddress]) -> Result<(), RadioError>;
    /// Drop all link keys held by the stack
    fn delete_bonds(&mut self) -> Result<(), RadioError>;
    fn persist_bonds(&mut self, bonds: &BondStore) -> Result<(), RadioError>;
    fn disconnect(&mut self, peer: &PeerAddress) -> Result<(), RadioError>;
}

/// What the advertising/scanning loop should currently be doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPlan {
    pub mode: Option<DiscoveryMode>,
    pub accept_list: Vec<PeerAddress, MAX_PEERS>,
    /// Bumped on every change
    pub generation: u32,
}

impl DiscoveryPlan {
    const fn new() -> Self {
        Self {
            mode: None,
            accept_list: Vec::new(),
            generation: 0,
        }
    }
}

pub struct DiscoveryController {
    plan: Mutex<CriticalSectionRawMutex, RefCell<DiscoveryPlan>>,
    changed: Signal<CriticalSectionRawMutex, u32>,
}

impl DiscoveryController {
    pub const fn new() -> Self {
        Self {
            plan: Mutex::new(RefCell::new(DiscoveryPlan::new())),
            changed: Signal::new(),
        }
    }

    fn modify(&self, f: impl FnOnce(&mut DiscoveryPlan)) {
        let generation = self.plan.lock(|p| {
            let mut plan = p.borrow_mut();
            f(&mut plan);
            plan.generation = plan.generation.wrapping_add(1);
            plan.generation
        });
        self.changed.signal(generation);
    }

    pub fn request(&self, mode: DiscoveryMode) {
        debug!("DISCOVERY: requested {:?}", mode);
        self.modify(|p| p.mode = Some(mode));
    }

    pub fn halt(&self) {
        debug!("DISCOVERY: halted");
        self.modify(|p| p.mode = None);
    }

    pub fn set_accept_list(&self, peers: &[PeerAddress]) -> Result<(), RadioError> {
        let list = Vec::from_slice(peers).map_err(|_| RadioError::AcceptListFull)?;
        self.modify(|p| p.accept_list = list);
        Ok(())
    }

    pub fn plan(&self) -> DiscoveryPlan {
        self.plan.lock(|p| p.borrow().clone())
    }

    /// Wait for the next change to the plan
    pub async fn changed(&self) -> DiscoveryPlan {
        self.changed.wait().await;
        self.plan()
    }

    /// Wait until discovery is requested, returning the plan to follow
    pub async fn wait_requested(&self) -> DiscoveryPlan {
        loop {
            let plan = self.plan();
            if plan.mode.is_some() {
                return plan;
            }
            self.changed.wait().await;
        }
    }
}

impl Default for DiscoveryController {
    fn default() -> Self {
        Self::new()
    }
}
