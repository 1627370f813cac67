//! Node Roles
//!
//! One implementation per firmware image. Each binds the four logical buttons
//! to clock or registry commands and, on subscriber nodes, renders the mirror.

pub mod controller;
pub mod display;
pub mod remote;

pub use controller::{CommandError, Controller};
pub use display::Display;
pub use remote::{CommandSender, Remote};

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::ble::subscriber::MirrorObserver;
use crate::clock::ClockMirror;
use crate::input::{ButtonEvent, ButtonHandler};

/// A role driven from two tasks (input and BLE link)
pub struct SharedRole<R> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<R>>,
}

impl<R> SharedRole<R> {
    pub const fn new(role: R) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(role)),
        }
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut R) -> T) -> T {
        self.inner.lock(|r| f(&mut r.borrow_mut()))
    }
}

impl<R: ButtonHandler> ButtonHandler for &SharedRole<R> {
    fn on_button(&mut self, event: ButtonEvent) {
        self.with(|r| r.on_button(event))
    }
}

impl<R: MirrorObserver> MirrorObserver for &SharedRole<R> {
    fn on_mirror_update(&mut self, mirror: &ClockMirror) {
        self.with(|r| r.on_mirror_update(mirror))
    }

    fn on_mirror_stale(&mut self, mirror: &ClockMirror) {
        self.with(|r| r.on_mirror_stale(mirror))
    }
}
